//! The leader's poll step and the supervisor state machine around it.
//!
//! The async loop, signal handling and scheduling live in the CLI; this
//! module is the synchronous core those drive: one `poll_once` per tick.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::document::{read_json_opt, write_json};
use crate::error::Result;
use crate::events::{EventSource, Reactor, is_trigger};
use crate::idempotency::{GuardOutcome, IdempotencyGuard, ResponseHistory, Trigger};
use crate::leader::{LeaderElection, LeaderGuard, LeaderMarker, ProcessLiveness, WatchState};

/// The watcher's own persisted state, readable by `watch status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchStatus {
    pub pid: u32,
    pub started_at: u64,
    pub last_checked: u64,
    /// Highest event `seq` fully handled
    pub cursor: u64,
    pub polls: u64,
    pub reactions: u64,
    pub suppressed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WatchStatus {
    pub fn load(path: &Path) -> Result<Option<WatchStatus>> {
        read_json_opt(path)
    }
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub seen: usize,
    pub emitted: usize,
    pub suppressed: usize,
    /// Events that are not triggers (reactions, own messages)
    pub ignored: usize,
    /// Set when a reaction failed; the cursor stops before that event.
    pub failed: Option<String>,
}

pub struct Watcher<E, R, H>
where
    E: EventSource,
    R: Reactor,
    H: ResponseHistory,
{
    id: String,
    source: E,
    reactor: R,
    guard: IdempotencyGuard<H>,
    status_path: PathBuf,
    status: WatchStatus,
    clock: Arc<dyn Clock>,
}

impl<E, R, H> Watcher<E, R, H>
where
    E: EventSource,
    R: Reactor,
    H: ResponseHistory,
{
    /// Resumes from the previous run's cursor if a status document exists.
    pub fn new(
        id: impl Into<String>,
        source: E,
        reactor: R,
        guard: IdempotencyGuard<H>,
        config: &Config,
        pid: u32,
    ) -> Result<Self> {
        let status_path = config.watch_status_path();
        let previous = WatchStatus::load(&status_path)?.unwrap_or_default();
        let now = crate::clock::now_ms();
        let status = WatchStatus {
            pid,
            started_at: now,
            last_checked: previous.last_checked,
            cursor: previous.cursor,
            polls: 0,
            reactions: 0,
            suppressed: 0,
            last_error: None,
        };
        Ok(Self {
            id: id.into(),
            source,
            reactor,
            guard,
            status_path,
            status,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.status.started_at = clock.now_ms();
        self.clock = Arc::new(clock);
        self
    }

    pub fn status(&self) -> &WatchStatus {
        &self.status
    }

    pub fn reactor(&self) -> &R {
        &self.reactor
    }

    /// Reads new events, reacts to each trigger at most once, advances the
    /// cursor and persists the status document.
    pub fn poll_once(&mut self) -> Result<PollReport> {
        let events = self.source.poll(self.status.cursor)?;
        let mut report = PollReport {
            seen: events.len(),
            ..PollReport::default()
        };

        for event in &events {
            if !is_trigger(event, &self.id) {
                report.ignored += 1;
                self.status.cursor = event.seq;
                continue;
            }
            let reactor = &mut self.reactor;
            let outcome = self.guard.run(Trigger::Observed(event), &self.source, |key| {
                reactor.react(event, key)
            });
            match outcome {
                Ok(GuardOutcome::Emitted { .. }) => report.emitted += 1,
                Ok(GuardOutcome::Suppressed { .. }) => report.suppressed += 1,
                Err(e) => {
                    tracing::warn!(event_id = %event.id, error = %e, "reaction failed; will retry");
                    report.failed = Some(e.to_string());
                    break;
                }
            }
            self.status.cursor = event.seq;
        }

        self.status.polls += 1;
        self.status.reactions += report.emitted as u64;
        self.status.suppressed += report.suppressed as u64;
        self.status.last_error = report.failed.clone();
        self.status.last_checked = self.clock.now_ms();
        write_json(&self.status_path, &self.status)?;

        tracing::debug!(
            seen = report.seen,
            emitted = report.emitted,
            suppressed = report.suppressed,
            cursor = self.status.cursor,
            "poll complete"
        );
        Ok(report)
    }
}

/// Drives `Idle -> AttemptingLease -> {Leading | Rejected}` and back to
/// `Idle` on stop, always releasing the lease first.
pub struct Supervisor<L: ProcessLiveness> {
    election: LeaderElection<L>,
    state: WatchState,
}

impl<L: ProcessLiveness> Supervisor<L> {
    pub fn new(election: LeaderElection<L>) -> Self {
        Self {
            election,
            state: WatchState::Idle,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn election(&self) -> &LeaderElection<L> {
        &self.election
    }

    pub fn start(&mut self) -> Result<LeaderGuard> {
        self.state = WatchState::AttemptingLease;
        match self.election.try_acquire() {
            Ok(guard) => {
                self.state = WatchState::Leading;
                Ok(guard)
            }
            Err(e) => {
                self.state = WatchState::Rejected;
                Err(e)
            }
        }
    }

    /// Per-tick upkeep while leading. `Ok(false)` means leadership was
    /// lost (the marker was removed or taken over) and the caller should
    /// stop polling.
    pub fn tick(&self, guard: &mut LeaderGuard) -> Result<bool> {
        let leading = self.election.refresh(guard)?;
        if !leading {
            tracing::warn!(pid = guard.pid(), "leader marker no longer ours");
        }
        Ok(leading)
    }

    pub fn stop(&mut self, guard: LeaderGuard) -> Result<()> {
        let out = guard.release().map(|_| ());
        self.state = WatchState::Idle;
        out
    }
}

/// Snapshot answered by `watch status`.
#[derive(Debug, Clone, Serialize)]
pub struct WatchReport {
    pub leader: Option<LeaderMarker>,
    pub leader_alive: bool,
    pub status: Option<WatchStatus>,
    pub last_checked_age_secs: Option<u64>,
}

pub fn watch_report<L: ProcessLiveness>(
    election: &LeaderElection<L>,
    config: &Config,
    now: u64,
) -> Result<WatchReport> {
    let leader = election.current()?;
    let leader_alive = leader.as_ref().is_some_and(|m| election.is_live(m));
    let status = WatchStatus::load(&config.watch_status_path())?;
    let last_checked_age_secs = status
        .as_ref()
        .filter(|s| s.last_checked > 0)
        .map(|s| now.saturating_sub(s.last_checked) / 1000);
    Ok(WatchReport {
        leader,
        leader_alive,
        status,
        last_checked_age_secs,
    })
}
