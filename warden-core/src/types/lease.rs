use serde::{Deserialize, Serialize};

/// Exclusive claim on one named resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Opaque resource name, usually a repository-relative file path
    pub resource: String,
    /// Agent holding the lease
    pub owner: String,
    /// What the owner is doing with the resource
    pub purpose: String,
    /// When the lease was granted or last renewed (ms since epoch)
    pub acquired_at: u64,
}

impl Lease {
    pub fn new(
        resource: impl Into<String>,
        owner: impl Into<String>,
        purpose: impl Into<String>,
        now: u64,
    ) -> Self {
        Self {
            resource: resource.into(),
            owner: owner.into(),
            purpose: purpose.into(),
            acquired_at: now,
        }
    }

    pub fn age_ms(&self, now: u64) -> u64 {
        super::age_ms(now, self.acquired_at)
    }

    /// A lease strictly older than the TTL no longer blocks anyone.
    pub fn is_stale(&self, now: u64, ttl_ms: u64) -> bool {
        self.age_ms(now) > ttl_ms
    }

    pub fn state(&self, now: u64, ttl_ms: u64) -> LeaseState {
        if self.is_stale(now, ttl_ms) {
            LeaseState::Stale
        } else {
            LeaseState::Active
        }
    }
}

/// Lease states as seen by a reader at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseState {
    /// Lease is held and within its TTL
    Active,
    /// Lease outlived its TTL and may be reclaimed by anyone
    Stale,
}

/// A lease annotated with its state, for `status` listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseView {
    #[serde(flatten)]
    pub lease: Lease,
    pub state: LeaseState,
    pub age_secs: u64,
}

/// Read-only answer to "who holds this resource?".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseCheck {
    Free,
    Stale(Lease),
    LockedBy { owner: String, purpose: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseFailureReason {
    /// Another agent holds a non-stale lease
    Conflict,
    /// Caller is not the owner of a non-stale lease
    Denied,
    /// There is no lease to act on
    NotHeld,
}

impl LeaseFailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaseFailureReason::Conflict => "CONFLICT",
            LeaseFailureReason::Denied => "DENIED",
            LeaseFailureReason::NotHeld => "NOT_HELD",
        }
    }
}

/// Result of `acquire` or `renew`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseResult {
    Success {
        lease: Lease,
        /// Previous owner whose stale lease was taken over
        reclaimed_from: Option<String>,
    },
    Failure {
        reason: LeaseFailureReason,
        existing_lease: Option<Lease>,
    },
}

impl LeaseResult {
    pub fn is_success(&self) -> bool {
        matches!(self, LeaseResult::Success { .. })
    }

    /// Owner of the blocking lease, if the call was refused because of one.
    pub fn held_by(&self) -> Option<&str> {
        match self {
            LeaseResult::Failure {
                existing_lease: Some(lease),
                ..
            } => Some(&lease.owner),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseResult {
    Released,
    /// Nothing to release
    NotHeld,
    /// A different agent holds a non-stale lease
    Denied { owner: String },
}
