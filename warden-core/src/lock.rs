//! Lease-based mutual exclusion over named resources.
//!
//! Every mutation runs inside the resource's mutex token: read the current
//! lease, decide, write. The token is released on every exit path, so a
//! crash can at worst leave a token that `RetryPolicy::stale_after` breaks.
//! A lease older than the TTL is stale and treated as free.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::infrastructure::LeaseStore;
use crate::mutex::{RetryPolicy, acquire_with_retry};
use crate::types::{
    Lease, LeaseCheck, LeaseFailureReason, LeaseResult, LeaseView, ReleaseResult,
};

pub struct LockManager<S: LeaseStore> {
    store: S,
    agent_id: String,
    ttl_ms: u64,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl<S: LeaseStore> LockManager<S> {
    pub fn new(store: S, agent_id: impl Into<String>, config: &Config) -> Self {
        Self {
            store,
            agent_id: agent_id.into(),
            ttl_ms: config.lock_ttl_ms(),
            policy: RetryPolicy::from_config(config),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Read-only. Never takes the token.
    pub fn check(&self, resource: &str) -> Result<LeaseCheck> {
        let now = self.clock.now_ms();
        Ok(match self.store.get(resource)? {
            None => LeaseCheck::Free,
            Some(lease) if lease.is_stale(now, self.ttl_ms) => LeaseCheck::Stale(lease),
            Some(lease) => LeaseCheck::LockedBy {
                owner: lease.owner,
                purpose: lease.purpose,
            },
        })
    }

    /// Grants the lease unless a different agent holds a non-stale one.
    /// Re-acquiring one's own lease refreshes it.
    pub fn acquire(&self, resource: &str, purpose: &str) -> Result<LeaseResult> {
        self.with_token(resource, |token| {
            let now = self.clock.now_ms();
            let existing = self.store.get(resource)?;

            let reclaimed_from = match existing {
                Some(lease) if lease.owner != self.agent_id => {
                    if !lease.is_stale(now, self.ttl_ms) {
                        tracing::info!(
                            resource,
                            agent_id = %self.agent_id,
                            held_by = %lease.owner,
                            "lease denied"
                        );
                        return Ok(LeaseResult::Failure {
                            reason: LeaseFailureReason::Conflict,
                            existing_lease: Some(lease),
                        });
                    }
                    Some(lease.owner)
                }
                _ => None,
            };

            let lease = Lease::new(resource, &self.agent_id, purpose, now);
            self.store.put(token, &lease)?;
            match &reclaimed_from {
                Some(previous) => tracing::info!(
                    resource,
                    agent_id = %self.agent_id,
                    previous_owner = %previous,
                    "stale lease reclaimed"
                ),
                None => tracing::info!(resource, agent_id = %self.agent_id, "lease acquired"),
            }
            Ok(LeaseResult::Success {
                lease,
                reclaimed_from,
            })
        })
    }

    /// Owner-only refresh of `acquired_at`. A stale lease the caller still
    /// owns can be renewed as long as nobody reclaimed it.
    pub fn renew(&self, resource: &str) -> Result<LeaseResult> {
        self.with_token(resource, |token| {
            let now = self.clock.now_ms();
            match self.store.get(resource)? {
                None => Ok(LeaseResult::Failure {
                    reason: LeaseFailureReason::NotHeld,
                    existing_lease: None,
                }),
                Some(lease) if lease.owner != self.agent_id => Ok(LeaseResult::Failure {
                    reason: LeaseFailureReason::Denied,
                    existing_lease: Some(lease),
                }),
                Some(mut lease) => {
                    lease.acquired_at = lease.acquired_at.max(now);
                    self.store.put(token, &lease)?;
                    tracing::debug!(resource, agent_id = %self.agent_id, "lease renewed");
                    Ok(LeaseResult::Success {
                        lease,
                        reclaimed_from: None,
                    })
                }
            }
        })
    }

    /// Succeeds for the owner, or for anyone once the lease is stale.
    pub fn release(&self, resource: &str) -> Result<ReleaseResult> {
        self.with_token(resource, |token| {
            let now = self.clock.now_ms();
            match self.store.get(resource)? {
                None => Ok(ReleaseResult::NotHeld),
                Some(lease)
                    if lease.owner != self.agent_id && !lease.is_stale(now, self.ttl_ms) =>
                {
                    tracing::info!(
                        resource,
                        agent_id = %self.agent_id,
                        held_by = %lease.owner,
                        "release denied"
                    );
                    Ok(ReleaseResult::Denied { owner: lease.owner })
                }
                Some(_) => {
                    self.store.remove(token, resource)?;
                    tracing::info!(resource, agent_id = %self.agent_id, "lease released");
                    Ok(ReleaseResult::Released)
                }
            }
        })
    }

    /// All leases, annotated `Active` or `Stale`.
    pub fn status(&self) -> Result<Vec<LeaseView>> {
        let now = self.clock.now_ms();
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|lease| LeaseView {
                state: lease.state(now, self.ttl_ms),
                age_secs: lease.age_ms(now) / 1000,
                lease,
            })
            .collect())
    }

    /// Removes every stale lease. Each removal re-checks staleness under
    /// the resource's token, so a lease renewed meanwhile survives.
    pub fn cleanup(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let mut removed = 0;
        for lease in self.store.list()? {
            if !lease.is_stale(now, self.ttl_ms) {
                continue;
            }
            let gone = self.with_token(&lease.resource, |token| {
                let now = self.clock.now_ms();
                match self.store.get(&lease.resource)? {
                    Some(current) if current.is_stale(now, self.ttl_ms) => {
                        self.store.remove(token, &lease.resource)
                    }
                    _ => Ok(false),
                }
            })?;
            if gone {
                tracing::info!(resource = %lease.resource, owner = %lease.owner, "stale lease removed");
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn with_token<R>(&self, resource: &str, f: impl FnOnce(&S::Token) -> Result<R>) -> Result<R> {
        let token = acquire_with_retry(resource, &self.policy, || self.store.try_lock(resource))?;
        let out = f(&token);
        drop(token);
        out
    }
}
