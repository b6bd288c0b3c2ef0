//! # warden-core
//!
//! Coordination primitives for autonomous agent processes that share a
//! repository without a central server: lease-based locks over named
//! resources, an advisory registry of who is doing what, single-leader
//! election for the watch process, and at-most-once reactions to events.
//!
//! All state lives in small documents under one directory; every mutation
//! runs inside a mutex token created with `O_CREAT | O_EXCL`.

pub mod client;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod document;
pub mod error;
pub mod events;
pub mod identity;
pub mod idempotency;
pub mod infrastructure;
#[path = "infrastructure_fs.rs"]
pub mod infrastructure_fs;
#[path = "infrastructure_in_memory.rs"]
pub mod infrastructure_in_memory;
#[cfg(feature = "sqlite")]
#[path = "infrastructure_sqlite.rs"]
pub mod infrastructure_sqlite;
pub mod leader;
pub mod lock;
pub mod mutex;
pub mod registry;
pub mod types;
pub mod watch;

pub use error::{ErrorKind, Result, WardenError};

#[cfg(test)]
mod conflict_test;
#[cfg(test)]
mod idempotency_test;
#[cfg(test)]
mod identity_test;
#[cfg(test)]
mod leader_test;
#[cfg(test)]
mod lock_test;
