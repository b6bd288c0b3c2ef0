//! Runtime configuration: TTLs, retry policy and the state directory.
//!
//! Every knob has a default and an optional `WARDEN_*` environment override.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Age after which a lease no longer blocks other agents.
pub const LOCK_TTL: Duration = Duration::from_secs(600);
/// Age after which an agent's heartbeat no longer counts as alive.
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(900);
/// How often the leader polls the event source.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const MUTEX_ATTEMPTS: u32 = 50;
pub const MUTEX_BACKOFF: Duration = Duration::from_millis(100);
/// A mutex token this old was left behind by a crashed process.
pub const MUTEX_STALE_AFTER: Duration = Duration::from_secs(30);

/// Well-known resource name of the watcher's leader lease.
pub const LEADER_RESOURCE: &str = "watch-leader";

#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub lock_ttl: Duration,
    pub heartbeat_ttl: Duration,
    pub poll_interval: Duration,
    pub mutex_attempts: u32,
    pub mutex_backoff: Duration,
    pub mutex_stale_after: Duration,
    /// Optional time-based fallback for the leader marker. `None` means the
    /// marker is judged by process liveness only.
    pub leader_stale_after: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".warden"),
            lock_ttl: LOCK_TTL,
            heartbeat_ttl: HEARTBEAT_TTL,
            poll_interval: POLL_INTERVAL,
            mutex_attempts: MUTEX_ATTEMPTS,
            mutex_backoff: MUTEX_BACKOFF,
            mutex_stale_after: MUTEX_STALE_AFTER,
            leader_stale_after: None,
        }
    }
}

impl Config {
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `WARDEN_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os("WARDEN_DIR").filter(|v| !v.is_empty()) {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_u64("WARDEN_LOCK_TTL_SECS") {
            config.lock_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("WARDEN_HEARTBEAT_TTL_SECS") {
            config.heartbeat_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("WARDEN_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = env_u64("WARDEN_MUTEX_ATTEMPTS") {
            config.mutex_attempts = n.clamp(1, u32::MAX as u64) as u32;
        }
        if let Some(ms) = env_u64("WARDEN_MUTEX_BACKOFF_MS") {
            config.mutex_backoff = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("WARDEN_LEADER_STALE_SECS") {
            config.leader_stale_after = Some(Duration::from_secs(secs));
        }
        config
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.state_dir.join("locks")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.state_dir.join("agents.json")
    }

    pub fn responses_path(&self) -> PathBuf {
        self.state_dir.join("responses.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.state_dir.join("events.jsonl")
    }

    pub fn leader_marker_path(&self) -> PathBuf {
        self.state_dir.join(format!("{LEADER_RESOURCE}.json"))
    }

    pub fn watch_status_path(&self) -> PathBuf {
        self.state_dir.join("watch-status.json")
    }

    pub fn watch_log_path(&self) -> PathBuf {
        self.state_dir.join("watch.log")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub(crate) fn lock_ttl_ms(&self) -> u64 {
        self.lock_ttl.as_millis() as u64
    }

    pub(crate) fn heartbeat_ttl_ms(&self) -> u64 {
        self.heartbeat_ttl.as_millis() as u64
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok().filter(|v| !v.is_empty())?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring non-numeric override");
            None
        }
    }
}
