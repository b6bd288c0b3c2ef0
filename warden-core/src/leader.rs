//! Single-leader election for the watch process.
//!
//! The leader marker is created atomically (no-clobber) with the holder's
//! pid already inside it. A marker is never judged by age alone: the
//! recorded process is probed for liveness, and only a dead owner's marker
//! is reclaimed. `Config::leader_stale_after` optionally adds a time-based
//! fallback on top of that.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::document::{create_json_exclusive, read_json_opt, remove_if_exists};
use crate::error::{Result, WardenError};

/// Capability to ask whether a process is still running.
pub trait ProcessLiveness {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Liveness via `kill(pid, 0)`: no signal is delivered, only existence and
/// permission are checked.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsLiveness;

#[cfg(unix)]
impl ProcessLiveness for OsLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            // Exists, owned by someone else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(not(unix))]
impl ProcessLiveness for OsLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        // No cheap probe here; `leader_stale_after` is the recovery path.
        pid != 0
    }
}

/// Asks a running leader to shut down (SIGTERM). Returns whether the
/// signal was delivered.
#[cfg(unix)]
pub fn terminate(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok(),
        _ => false,
    }
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> bool {
    false
}

/// Contents of the leader marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderMarker {
    pub pid: u32,
    pub acquired_at: u64,
}

/// Lifecycle of a process competing for leadership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Idle,
    AttemptingLease,
    Leading,
    Rejected,
}

pub struct LeaderElection<L: ProcessLiveness> {
    marker_path: PathBuf,
    liveness: L,
    pid: u32,
    /// Optional fallback: a leader that has not refreshed its marker within
    /// this window is presumed dead even if its pid answers.
    stale_after_ms: Option<u64>,
    clock: Arc<dyn Clock>,
}

impl<L: ProcessLiveness> LeaderElection<L> {
    pub fn new(config: &Config, liveness: L) -> Self {
        Self {
            marker_path: config.leader_marker_path(),
            liveness,
            pid: std::process::id(),
            stale_after_ms: config.leader_stale_after.map(|d| d.as_millis() as u64),
            clock: Arc::new(SystemClock),
        }
    }

    /// Compete as a different pid than the current process.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker_path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current marker, if any.
    pub fn current(&self) -> Result<Option<LeaderMarker>> {
        read_json_opt(&self.marker_path)
    }

    /// Whether the recorded leader should still be treated as running.
    pub fn is_live(&self, marker: &LeaderMarker) -> bool {
        if marker.pid == self.pid {
            // A marker naming our own pid was left by an earlier process
            // that happened to have the same pid.
            return false;
        }
        if !self.liveness.is_alive(marker.pid) {
            return false;
        }
        match self.stale_after_ms {
            Some(window) => self.clock.now_ms().saturating_sub(marker.acquired_at) <= window,
            None => true,
        }
    }

    /// Becomes leader or reports who is. A dead leader's marker is removed
    /// and acquisition retried once.
    pub fn try_acquire(&self) -> Result<LeaderGuard> {
        if let Some(marker) = self.try_create()? {
            return Ok(self.guard(marker));
        }

        let existing = match self.current() {
            Ok(existing) => existing,
            Err(WardenError::Corrupt { path, source }) => {
                tracing::warn!(marker = %path.display(), error = %source, "unreadable leader marker; reclaiming");
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(marker) = &existing {
            if self.is_live(marker) {
                tracing::info!(pid = self.pid, leader_pid = marker.pid, "another leader is active");
                return Err(WardenError::LeaderActive { pid: marker.pid });
            }
            tracing::warn!(pid = self.pid, dead_pid = marker.pid, "reclaiming leader marker from dead process");
        }
        self.remove_if_unchanged(existing.as_ref())?;

        if let Some(marker) = self.try_create()? {
            return Ok(self.guard(marker));
        }
        // Lost the retry to another starter.
        let winner = self.current().ok().flatten().map(|m| m.pid).unwrap_or(0);
        Err(WardenError::LeaderActive { pid: winner })
    }

    /// Moves `acquired_at` forward so the time fallback sees the leader as
    /// fresh. Only rewrites the exact marker `guard` last wrote; returns
    /// `false` if it was removed or replaced, even by a marker with the same
    /// pid.
    ///
    /// A challenger that reclaims a stale marker between the read and the
    /// write is overwritten; its own next refresh then finds this marker
    /// instead of its own and it steps down.
    pub fn refresh(&self, guard: &mut LeaderGuard) -> Result<bool> {
        let ours = LeaderMarker {
            pid: guard.pid,
            acquired_at: guard.acquired_at,
        };
        if self.current()?.as_ref() != Some(&ours) {
            return Ok(false);
        }
        let refreshed = LeaderMarker {
            acquired_at: self.clock.now_ms(),
            ..ours
        };
        crate::document::write_json(&self.marker_path, &refreshed)?;
        guard.acquired_at = refreshed.acquired_at;
        Ok(true)
    }

    fn try_create(&self) -> Result<Option<LeaderMarker>> {
        let marker = LeaderMarker {
            pid: self.pid,
            acquired_at: self.clock.now_ms(),
        };
        if !create_json_exclusive(&self.marker_path, &marker)? {
            return Ok(None);
        }
        tracing::info!(pid = self.pid, "leadership acquired");
        Ok(Some(marker))
    }

    fn remove_if_unchanged(&self, seen: Option<&LeaderMarker>) -> Result<()> {
        let now = match self.current() {
            Ok(now) => now,
            Err(WardenError::Corrupt { .. }) => None,
            Err(e) => return Err(e),
        };
        if now.as_ref() == seen {
            remove_if_exists(&self.marker_path)?;
        }
        Ok(())
    }

    fn guard(&self, marker: LeaderMarker) -> LeaderGuard {
        LeaderGuard {
            marker_path: self.marker_path.clone(),
            pid: marker.pid,
            acquired_at: marker.acquired_at,
            released: false,
        }
    }
}

/// Proof of leadership. Dropping it (normal return, error, or unwinding
/// panic) removes the marker if it still names this leader.
#[derive(Debug)]
pub struct LeaderGuard {
    marker_path: PathBuf,
    pid: u32,
    /// What the marker said when this guard last wrote it
    acquired_at: u64,
    released: bool,
}

impl LeaderGuard {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn acquired_at(&self) -> u64 {
        self.acquired_at
    }

    pub fn release(mut self) -> Result<bool> {
        self.released = true;
        release_marker(&self.marker_path, self.pid)
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = release_marker(&self.marker_path, self.pid) {
            tracing::warn!(error = %e, "failed to remove leader marker");
        }
    }
}

fn release_marker(path: &Path, pid: u32) -> Result<bool> {
    match read_json_opt::<LeaderMarker>(path) {
        Ok(Some(marker)) if marker.pid == pid => {
            let removed = remove_if_exists(path)?;
            tracing::info!(pid, "leadership released");
            Ok(removed)
        }
        Ok(_) => Ok(false),
        Err(e) => Err(e),
    }
}
