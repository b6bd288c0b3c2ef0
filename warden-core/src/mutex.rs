//! Short-lived mutual-exclusion tokens guarding read/compare/write sections.
//!
//! A token is an entry that can only be created if it does not exist yet
//! (`O_CREAT | O_EXCL`). Whoever creates it owns the critical section; the
//! guard removes it on drop, on success and failure paths alike. Each token
//! carries a random nonce so a holder never removes a token it no longer owns.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::Config;
use crate::error::{Result, WardenError};

/// Bounded retry schedule for taking a token.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
    /// Tokens older than this are considered abandoned by a crashed holder.
    pub stale_after: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.mutex_attempts.max(1),
            backoff: config.mutex_backoff,
            stale_after: config.mutex_stale_after,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Calls `attempt` until it yields a token, sleeping `backoff` in between.
/// Gives up with [`WardenError::MutexTimeout`] after `policy.attempts` tries.
pub fn acquire_with_retry<T>(
    scope: &str,
    policy: &RetryPolicy,
    mut attempt: impl FnMut() -> Result<Option<T>>,
) -> Result<T> {
    for n in 1..=policy.attempts {
        if let Some(token) = attempt()? {
            return Ok(token);
        }
        if n < policy.attempts {
            std::thread::sleep(policy.backoff);
        }
    }
    tracing::debug!(scope, attempts = policy.attempts, "mutex acquisition timed out");
    Err(WardenError::MutexTimeout {
        scope: scope.to_string(),
        attempts: policy.attempts,
    })
}

/// A breaker that crashed mid-break leaves its `.break` entry behind; after
/// this long it no longer blocks others from breaking the token.
const BREAK_STALE_AFTER: Duration = Duration::from_secs(10);

/// Held mutex token backed by a file. Removed when dropped, unless it was
/// broken as abandoned and someone else has taken it since.
#[derive(Debug)]
pub struct FileToken {
    path: PathBuf,
    nonce: String,
}

impl FileToken {
    /// One atomic attempt. `Ok(None)` means somebody else holds the token.
    pub fn try_create(path: &Path, stale_after: Duration) -> Result<Option<FileToken>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| WardenError::io(parent, e))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let nonce = nanoid::nanoid!(16);
                if let Err(e) = writeln!(file, "{} {nonce}", std::process::id()) {
                    remove_quietly(path)?;
                    return Err(WardenError::io(path, e));
                }
                Ok(Some(FileToken {
                    path: path.to_path_buf(),
                    nonce,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if token_is_abandoned(path, stale_after) {
                    break_abandoned(path, stale_after)?;
                }
                Ok(None)
            }
            Err(e) => Err(WardenError::io(path, e)),
        }
    }

    /// Takes the token with the bounded retry loop.
    pub fn acquire(path: &Path, scope: &str, policy: &RetryPolicy) -> Result<FileToken> {
        acquire_with_retry(scope, policy, || {
            FileToken::try_create(path, policy.stale_after)
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the file at `path` is still the one this token created.
    pub fn is_held(&self) -> bool {
        fs::read_to_string(&self.path)
            .is_ok_and(|content| token_nonce(&content) == Some(self.nonce.as_str()))
    }
}

impl Drop for FileToken {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(content) if token_nonce(&content) == Some(self.nonce.as_str()) => {
                if let Err(e) = fs::remove_file(&self.path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(token = %self.path.display(), error = %e, "failed to remove mutex token");
                    }
                }
            }
            Ok(_) => {
                tracing::warn!(
                    token = %self.path.display(),
                    "mutex token was broken as abandoned and re-taken; leaving it to its new holder"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(token = %self.path.display(), error = %e, "failed to read mutex token");
            }
        }
    }
}

/// Removes an abandoned token. Breakers serialize on a `.break` sibling and
/// re-check the age while holding it: a token that was already broken and
/// re-taken by a live contender is fresh again and is left alone.
fn break_abandoned(path: &Path, stale_after: Duration) -> Result<()> {
    let breaker = with_suffix(path, ".break");
    match OpenOptions::new().write(true).create_new(true).open(&breaker) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if token_is_abandoned(&breaker, BREAK_STALE_AFTER) {
                remove_quietly(&breaker)?;
            }
            return Ok(());
        }
        Err(e) => return Err(WardenError::io(&breaker, e)),
    }

    let broken = if token_is_abandoned(path, stale_after) {
        tracing::warn!(token = %path.display(), "breaking abandoned mutex token");
        remove_quietly(path)
    } else {
        Ok(())
    };
    remove_quietly(&breaker)?;
    broken
}

fn remove_quietly(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WardenError::io(path, e)),
    }
}

/// Tokens hold `<pid> <nonce>`; the pid is informational.
fn token_nonce(content: &str) -> Option<&str> {
    content.split_whitespace().nth(1)
}

fn token_is_abandoned(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > stale_after)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Path of the token guarding `document`, e.g. `agents.json.mutex`.
pub fn token_path_for(document: &Path) -> PathBuf {
    with_suffix(document, ".mutex")
}
