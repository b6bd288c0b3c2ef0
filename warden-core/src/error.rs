use std::path::PathBuf;

use thiserror::Error;

/// How a caller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Someone else holds the mutex or the leadership. Try later.
    Contention,
    /// The caller skipped a required step (e.g. `register` before `update`).
    Precondition,
    /// The backing store could not be read or written.
    Storage,
}

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("timed out acquiring the {scope} mutex after {attempts} attempts")]
    MutexTimeout { scope: String, attempts: u32 },

    #[error("agent '{0}' is not registered")]
    NotRegistered(String),

    #[error("another leader is active (pid {pid})")]
    LeaderActive { pid: u32 },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unreadable document {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("reaction failed: {0}")]
    Reaction(String),

    #[cfg(feature = "sqlite")]
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl WardenError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        WardenError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        WardenError::Corrupt {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WardenError::MutexTimeout { .. } | WardenError::LeaderActive { .. } => {
                ErrorKind::Contention
            }
            WardenError::NotRegistered(_) => ErrorKind::Precondition,
            _ => ErrorKind::Storage,
        }
    }

    /// Short machine-readable tag, e.g. for CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            WardenError::MutexTimeout { .. } => "MUTEX_TIMEOUT",
            WardenError::NotRegistered(_) => "NOT_REGISTERED",
            WardenError::LeaderActive { .. } => "LEADER_ACTIVE",
            WardenError::Io { .. } => "IO",
            WardenError::Corrupt { .. } => "CORRUPT",
            WardenError::Reaction(_) => "REACTION_FAILED",
            #[cfg(feature = "sqlite")]
            WardenError::Sqlite(_) => "SQLITE",
        }
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
