use crate::error::Result;
use crate::types::Lease;

/// Persistence for leases: one record per resource, plus a resource-scoped
/// mutex token that serializes every mutation of that record.
///
/// `try_lock` must be atomic across processes: at most one caller can hold
/// the token for a given resource. Mutations take the held token as proof.
pub trait LeaseStore {
    type Token;

    /// One attempt at the resource's token. `Ok(None)` if someone holds it.
    fn try_lock(&self, resource: &str) -> Result<Option<Self::Token>>;

    /// Current lease record, stale or not. No token required.
    fn get(&self, resource: &str) -> Result<Option<Lease>>;

    /// Write (or overwrite) the lease for `lease.resource`.
    fn put(&self, token: &Self::Token, lease: &Lease) -> Result<()>;

    /// Remove the lease for `resource`. Returns whether one existed.
    fn remove(&self, token: &Self::Token, resource: &str) -> Result<bool>;

    /// Every lease record in the store. No token required.
    fn list(&self) -> Result<Vec<Lease>>;
}
