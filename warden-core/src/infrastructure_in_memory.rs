use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::Result;
use crate::infrastructure::LeaseStore;
use crate::types::Lease;

#[derive(Debug, Default)]
struct Inner {
    // Map of resource -> lease
    leases: BTreeMap<String, Lease>,
    // Resources whose token is currently held
    tokens: HashSet<String>,
}

/// Process-local [`LeaseStore`]. Clones share state, so several
/// `LockManager`s (one per agent) can contend on it from different threads.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseStore {
    inner: Arc<Mutex<Inner>>,
}

/// Held token for one resource of an [`InMemoryLeaseStore`].
#[derive(Debug)]
pub struct MemoryToken {
    inner: Arc<Mutex<Inner>>,
    resource: String,
}

impl Drop for MemoryToken {
    fn drop(&mut self) {
        lock(&self.inner).tokens.remove(&self.resource);
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    // A panicking holder cannot leave the maps half-written.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the resource's token outside any lock manager, e.g. to
    /// simulate a peer stuck inside its critical section.
    pub fn hold_token(&self, resource: &str) -> Option<MemoryToken> {
        self.try_lock(resource).ok().flatten()
    }

    /// Inserts a lease directly, bypassing ownership checks.
    pub fn insert(&self, lease: Lease) {
        lock(&self.inner).leases.insert(lease.resource.clone(), lease);
    }
}

impl LeaseStore for InMemoryLeaseStore {
    type Token = MemoryToken;

    fn try_lock(&self, resource: &str) -> Result<Option<MemoryToken>> {
        let mut inner = lock(&self.inner);
        if !inner.tokens.insert(resource.to_string()) {
            return Ok(None);
        }
        Ok(Some(MemoryToken {
            inner: Arc::clone(&self.inner),
            resource: resource.to_string(),
        }))
    }

    fn get(&self, resource: &str) -> Result<Option<Lease>> {
        Ok(lock(&self.inner).leases.get(resource).cloned())
    }

    fn put(&self, _token: &MemoryToken, lease: &Lease) -> Result<()> {
        lock(&self.inner)
            .leases
            .insert(lease.resource.clone(), lease.clone());
        Ok(())
    }

    fn remove(&self, _token: &MemoryToken, resource: &str) -> Result<bool> {
        Ok(lock(&self.inner).leases.remove(resource).is_some())
    }

    fn list(&self) -> Result<Vec<Lease>> {
        Ok(lock(&self.inner).leases.values().cloned().collect())
    }
}
