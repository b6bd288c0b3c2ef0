//! `warden watch`: the leader's poll loop, plus `stop`, `status` and the
//! detached `--background` launcher.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::signal;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;

use warden_core::client::WardenClient;
use warden_core::clock::now_ms;
use warden_core::events::{AppendReactor, Reactor};
use warden_core::identity::AGENT_ID_ENV;
use warden_core::leader::terminate;
use warden_core::watch::{Supervisor, Watcher, WatchReport, watch_report};
use warden_core::WardenError;

use crate::handlers::Reply;
use crate::reactor::CommandReactor;

/// How long `watch stop` waits for the leader to remove its marker.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_POLL: Duration = Duration::from_millis(100);
/// `tokio::time::interval` panics on a zero period.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// A background child that dies this quickly failed to start.
const BACKGROUND_GRACE: Duration = Duration::from_millis(300);

pub struct WatchOptions {
    pub exec: Option<String>,
    pub interval: Option<Duration>,
}

#[derive(Serialize)]
pub struct StopResponse {
    pub pid: u32,
    pub stopped: bool,
}

#[derive(Serialize)]
pub struct BackgroundResponse {
    pub pid: u32,
    pub log: String,
}

pub async fn run(client: WardenClient, options: WatchOptions) -> Reply {
    let mut supervisor = Supervisor::new(client.election());
    let mut guard = match supervisor.start() {
        Ok(guard) => guard,
        Err(e) => return Reply::error(&e),
    };

    let reactor: Box<dyn Reactor + Send> = match options.exec {
        Some(command) => Box::new(CommandReactor::new(command, client.events(), client.agent_id())),
        None => Box::new(AppendReactor::new(client.events(), client.agent_id())),
    };
    // On error the guard is dropped here, which removes the marker.
    let mut watcher = match Watcher::new(
        client.agent_id(),
        client.events(),
        reactor,
        client.new_guard(),
        client.config(),
        guard.pid(),
    ) {
        Ok(watcher) => watcher,
        Err(e) => return Reply::error(&e),
    };

    let interval = options
        .interval
        .unwrap_or(client.config().poll_interval)
        .max(MIN_POLL_INTERVAL);
    let shutdown = Arc::new(Notify::new());
    listen_for_shutdown(&shutdown);

    tracing::info!(
        agent_id = %client.agent_id(),
        pid = guard.pid(),
        interval_secs = interval.as_secs(),
        cursor = watcher.status().cursor,
        "watching for events"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut lost_leadership = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match tokio::task::block_in_place(|| watcher.poll_once()) {
                    Ok(report) if report.emitted > 0 || report.failed.is_some() => {
                        tracing::info!(
                            seen = report.seen,
                            emitted = report.emitted,
                            suppressed = report.suppressed,
                            failed = report.failed.is_some(),
                            "poll"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "poll failed; retrying next tick"),
                }
                match supervisor.tick(&mut guard) {
                    Ok(true) => {}
                    Ok(false) => {
                        lost_leadership = true;
                        break;
                    }
                    Err(e) => tracing::warn!(error = %e, "could not refresh leader marker"),
                }
            }
            () = shutdown.notified() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    let status = watcher.status().clone();
    if let Err(e) = supervisor.stop(guard) {
        return Reply::error(&e);
    }
    if lost_leadership {
        return Reply::refused(status, "leadership lost; watcher stopped");
    }
    let line = format!(
        "watcher stopped after {} poll(s), {} reaction(s)",
        status.polls, status.reactions
    );
    Reply::ok(status, line)
}

fn listen_for_shutdown(shutdown: &Arc<Notify>) {
    let notify = Arc::clone(shutdown);
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            notify.notify_one();
        }
    });

    #[cfg(unix)]
    {
        let notify = Arc::clone(shutdown);
        tokio::spawn(async move {
            if let Ok(mut sigterm) = signal::unix::signal(signal::unix::SignalKind::terminate()) {
                if sigterm.recv().await.is_some() {
                    notify.notify_one();
                }
            }
        });
    }
}

/// Asks the live leader to exit and waits for it to give up its marker.
pub async fn stop(client: &WardenClient) -> Reply {
    let election = client.election();
    let marker = match election.current() {
        Ok(Some(marker)) => marker,
        Ok(None) => return Reply::refused(serde_json::Value::Null, "no watcher is running"),
        Err(e) => return Reply::error(&e),
    };
    let pid = marker.pid;

    if !election.is_live(&marker) {
        return Reply::refused(
            StopResponse { pid, stopped: false },
            format!("watcher pid {pid} is not running (stale marker)"),
        );
    }
    if !terminate(pid) {
        return Reply::refused(
            StopResponse { pid, stopped: false },
            format!("could not signal watcher pid {pid}"),
        );
    }

    let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(STOP_POLL).await;
        match election.current() {
            Ok(Some(current)) if current.pid == pid => continue,
            _ => {
                return Reply::ok(
                    StopResponse { pid, stopped: true },
                    format!("watcher pid {pid} stopped"),
                );
            }
        }
    }
    Reply::refused(
        StopResponse { pid, stopped: false },
        format!("watcher pid {pid} did not exit within {}s", STOP_TIMEOUT.as_secs()),
    )
}

/// Exit 0 while a live leader exists, 1 otherwise.
pub fn status(client: &WardenClient) -> Reply {
    match watch_report(&client.election(), client.config(), now_ms()) {
        Ok(report) => {
            let line = status_line(&report);
            if report.leader_alive {
                Reply::ok(report, line)
            } else {
                Reply::refused(report, line)
            }
        }
        Err(e) => Reply::error(&e),
    }
}

pub fn status_line(report: &WatchReport) -> String {
    let checked = match report.last_checked_age_secs {
        Some(age) => format!("last checked {age}s ago"),
        None => "never polled".to_string(),
    };
    match &report.leader {
        Some(leader) if report.leader_alive => format!("watcher pid {} running, {checked}", leader.pid),
        Some(leader) => format!("watcher pid {} is gone (stale marker), {checked}", leader.pid),
        None => format!("no watcher running, {checked}"),
    }
}

/// Re-runs this command without `--background`, detached from the terminal,
/// with output appended to `watch.log`.
pub async fn spawn_background(client: &WardenClient) -> Reply {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(source) => {
            return Reply::error(&WardenError::Io {
                path: "current executable".into(),
                source,
            });
        }
    };
    let args: Vec<OsString> = std::env::args_os()
        .skip(1)
        .filter(|arg| arg != "--background")
        .collect();

    let log_path = client.config().watch_log_path();
    let open_log = || OpenOptions::new().create(true).append(true).open(&log_path);
    let (stdout, stderr) = match open_log().and_then(|out| Ok((out, open_log()?))) {
        Ok(pair) => pair,
        Err(source) => {
            return Reply::error(&WardenError::Io {
                path: log_path.clone(),
                source,
            });
        }
    };

    // The child's parent pid differs from ours, so pass the identity along.
    let spawned = Command::new(&exe)
        .args(&args)
        .env(AGENT_ID_ENV, client.agent_id())
        .env("WARDEN_DIR", client.config().state_dir())
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(source) => return Reply::error(&WardenError::Io { path: exe, source }),
    };

    tokio::time::sleep(BACKGROUND_GRACE).await;
    let log = log_path.display().to_string();
    match child.try_wait() {
        Ok(Some(exit)) => Reply::refused(
            BackgroundResponse { pid: child.id(), log },
            format!("background watcher exited immediately ({exit}); see {}", log_path.display()),
        ),
        _ => {
            let pid = child.id();
            Reply::ok(
                BackgroundResponse { pid, log },
                format!("watcher started in background, pid {pid}"),
            )
        }
    }
}
