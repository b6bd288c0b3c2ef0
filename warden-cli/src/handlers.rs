use std::process::ExitCode;

use serde::Serialize;

use warden_core::client::WardenClient;
use warden_core::conflict::ConflictEngine;
use warden_core::idempotency::GuardOutcome;
use warden_core::types::{
    AgentRecord, ConflictReport, Lease, LeaseCheck, LeaseResult, ReleaseResult,
};
use warden_core::{ErrorKind, WardenError};

use crate::{AgentCommand, LockCommand};

// ─── Exit Codes ─────────────────────────────────────────────────────────────

pub const EXIT_OK: u8 = 0;
/// Locked, conflicting, denied, contended, or a skipped precondition.
pub const EXIT_REFUSED: u8 = 1;
/// Unreadable or unwritable state.
pub const EXIT_STORAGE: u8 = 2;

// ─── Response Envelope ──────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

/// What a command prints: a JSON envelope on stdout, one human-readable
/// line on stderr, and its exit code.
pub struct Reply {
    pub exit: u8,
    pub status: String,
    pub body: ApiResponse<serde_json::Value>,
}

impl Reply {
    pub fn ok(data: impl Serialize, status: impl Into<String>) -> Self {
        Self::with_data(EXIT_OK, true, data, status)
    }

    /// An expected "no": the answer is valid but the caller should not proceed.
    pub fn refused(data: impl Serialize, status: impl Into<String>) -> Self {
        Self::with_data(EXIT_REFUSED, false, data, status)
    }

    pub fn error(err: &WardenError) -> Self {
        let exit = match err.kind() {
            ErrorKind::Contention | ErrorKind::Precondition => EXIT_REFUSED,
            ErrorKind::Storage => EXIT_STORAGE,
        };
        Self {
            exit,
            status: format!("error: {err}"),
            body: ApiResponse {
                success: false,
                data: None,
                error: Some(err.to_string()),
                code: Some(err.code()),
            },
        }
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        Self {
            exit: EXIT_STORAGE,
            status: format!("error: {msg}"),
            body: ApiResponse {
                success: false,
                data: None,
                error: Some(msg),
                code: Some("USAGE"),
            },
        }
    }

    fn with_data(exit: u8, success: bool, data: impl Serialize, status: impl Into<String>) -> Self {
        Self {
            exit,
            status: status.into(),
            body: ApiResponse {
                success,
                data: serde_json::to_value(data).ok(),
                error: None,
                code: None,
            },
        }
    }

    pub fn emit(self) -> ExitCode {
        match serde_json::to_string_pretty(&self.body) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!(error = %e, "could not encode response"),
        }
        eprintln!("{}", self.status);
        ExitCode::from(self.exit)
    }
}

// ─── Response Types ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct CheckResponse {
    pub resource: String,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

#[derive(Serialize)]
pub struct LeaseResponse {
    #[serde(flatten)]
    pub lease: Lease,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reclaimed_from: Option<String>,
}

#[derive(Serialize)]
pub struct LeaseFailureResponse {
    pub resource: String,
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_by: Option<String>,
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub resource: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

#[derive(Serialize)]
pub struct EvictResponse {
    pub evicted: usize,
}

#[derive(Serialize)]
pub struct DeregisterResponse {
    pub agent_id: String,
    pub removed: bool,
}

#[derive(Serialize)]
pub struct ConflictsResponse {
    pub resources: Vec<String>,
    pub conflicts: Vec<ConflictReport>,
}

#[derive(Serialize)]
pub struct ActResponse {
    pub key: String,
    pub emitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction_id: Option<String>,
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub name: &'static str,
    pub version: &'static str,
}

// ─── Lock Manager ───────────────────────────────────────────────────────────

pub fn lock(client: &WardenClient, action: LockCommand) -> Reply {
    let locks = client.locks();
    match action {
        LockCommand::Check { resource } => match locks.check(&resource) {
            Ok(check) => check_reply(resource, check),
            Err(e) => Reply::error(&e),
        },
        LockCommand::Acquire { resource, purpose } => match locks.acquire(&resource, &purpose) {
            Ok(result) => lease_reply(&resource, result, "acquired"),
            Err(e) => Reply::error(&e),
        },
        LockCommand::Renew { resource } => match locks.renew(&resource) {
            Ok(result) => lease_reply(&resource, result, "renewed"),
            Err(e) => Reply::error(&e),
        },
        LockCommand::Release { resource } => match locks.release(&resource) {
            Ok(result) => release_reply(resource, result),
            Err(e) => Reply::error(&e),
        },
        LockCommand::Status => match locks.status() {
            Ok(leases) => {
                let status = format!("{} lease(s)", leases.len());
                Reply::ok(leases, status)
            }
            Err(e) => Reply::error(&e),
        },
        LockCommand::Cleanup => match locks.cleanup() {
            Ok(evicted) => Reply::ok(
                EvictResponse { evicted },
                format!("removed {evicted} stale lease(s)"),
            ),
            Err(e) => Reply::error(&e),
        },
    }
}

pub fn check_reply(resource: String, check: LeaseCheck) -> Reply {
    match check {
        LeaseCheck::Free => {
            let status = format!("{resource} is free");
            Reply::ok(
                CheckResponse {
                    resource,
                    state: "FREE",
                    owner: None,
                    purpose: None,
                },
                status,
            )
        }
        LeaseCheck::Stale(lease) => {
            let status = format!("{resource} is free (stale lease by {})", lease.owner);
            Reply::ok(
                CheckResponse {
                    resource,
                    state: "STALE",
                    owner: Some(lease.owner),
                    purpose: Some(lease.purpose),
                },
                status,
            )
        }
        LeaseCheck::LockedBy { owner, purpose } => {
            let status = if purpose.is_empty() {
                format!("{resource} is locked by {owner}")
            } else {
                format!("{resource} is locked by {owner} ({purpose})")
            };
            Reply::refused(
                CheckResponse {
                    resource,
                    state: "LOCKED",
                    owner: Some(owner),
                    purpose: Some(purpose),
                },
                status,
            )
        }
    }
}

pub fn lease_reply(resource: &str, result: LeaseResult, verb: &str) -> Reply {
    match result {
        LeaseResult::Success {
            lease,
            reclaimed_from,
        } => {
            let status = match &reclaimed_from {
                Some(previous) => format!("{verb} {resource} (reclaimed stale lease from {previous})"),
                None => format!("{verb} {resource}"),
            };
            Reply::ok(
                LeaseResponse {
                    lease,
                    reclaimed_from,
                },
                status,
            )
        }
        LeaseResult::Failure {
            reason,
            existing_lease,
        } => {
            let held_by = existing_lease.map(|l| l.owner);
            let status = match &held_by {
                Some(owner) => format!("{resource}: {} (held by {owner})", reason.as_str()),
                None => format!("{resource}: {}", reason.as_str()),
            };
            Reply::refused(
                LeaseFailureResponse {
                    resource: resource.to_string(),
                    reason: reason.as_str(),
                    held_by,
                },
                status,
            )
        }
    }
}

pub fn release_reply(resource: String, result: ReleaseResult) -> Reply {
    match result {
        ReleaseResult::Released => {
            let status = format!("released {resource}");
            Reply::ok(
                ReleaseResponse {
                    resource,
                    outcome: "RELEASED",
                    owner: None,
                },
                status,
            )
        }
        // Releasing nothing leaves the world as the caller wanted it.
        ReleaseResult::NotHeld => {
            let status = format!("{resource} was not locked");
            Reply::ok(
                ReleaseResponse {
                    resource,
                    outcome: "NOT_HELD",
                    owner: None,
                },
                status,
            )
        }
        ReleaseResult::Denied { owner } => {
            let status = format!("{resource} is held by {owner}; not released");
            Reply::refused(
                ReleaseResponse {
                    resource,
                    outcome: "DENIED",
                    owner: Some(owner),
                },
                status,
            )
        }
    }
}

// ─── Coordination Registry ──────────────────────────────────────────────────

pub fn agent(client: &WardenClient, action: AgentCommand) -> Reply {
    let registry = client.registry();
    let id = client.agent_id();
    match action {
        AgentCommand::Register { task, resources } => {
            let resources = parse_optional(resources.as_deref());
            record_reply(registry.register(id, &task, resources), "registered")
        }
        AgentCommand::Update { task, resources } => {
            let resources = parse_optional(resources.as_deref());
            record_reply(registry.update(id, &task, resources), "updated")
        }
        AgentCommand::Heartbeat => record_reply(registry.heartbeat(id), "heartbeat from"),
        AgentCommand::Deregister => match registry.deregister(id) {
            Ok(removed) => {
                let status = if removed {
                    format!("deregistered {id}")
                } else {
                    format!("{id} was not registered")
                };
                Reply::ok(
                    DeregisterResponse {
                        agent_id: id.to_string(),
                        removed,
                    },
                    status,
                )
            }
            Err(e) => Reply::error(&e),
        },
        AgentCommand::Status => match registry.status() {
            Ok(agents) => {
                let status = format!("{} active agent(s)", agents.len());
                Reply::ok(agents, status)
            }
            Err(e) => Reply::error(&e),
        },
        AgentCommand::Cleanup => match registry.cleanup() {
            Ok(evicted) => Reply::ok(
                EvictResponse { evicted },
                format!("evicted {evicted} stale agent(s)"),
            ),
            Err(e) => Reply::error(&e),
        },
        AgentCommand::CheckConflicts { resources } => {
            let resources = ConflictEngine::parse_resources(&resources);
            match registry.check_conflicts(id, &resources) {
                Ok(conflicts) => conflicts_reply(resources, conflicts),
                Err(e) => Reply::error(&e),
            }
        }
    }
}

fn parse_optional(raw: Option<&str>) -> Vec<String> {
    raw.map(ConflictEngine::parse_resources).unwrap_or_default()
}

fn record_reply(result: warden_core::Result<AgentRecord>, verb: &str) -> Reply {
    match result {
        Ok(record) => {
            let status = format!("{verb} {}", record.id);
            Reply::ok(record, status)
        }
        Err(e) => Reply::error(&e),
    }
}

pub fn conflicts_reply(resources: Vec<String>, conflicts: Vec<ConflictReport>) -> Reply {
    if conflicts.is_empty() {
        return Reply::ok(
            ConflictsResponse {
                resources,
                conflicts,
            },
            "no conflicts",
        );
    }
    let status = conflicts
        .iter()
        .map(|c| format!("{} is used by {} ({})", c.resource, c.agent_id, c.task))
        .collect::<Vec<_>>()
        .join("; ");
    Reply::refused(
        ConflictsResponse {
            resources,
            conflicts,
        },
        status,
    )
}

// ─── Events ─────────────────────────────────────────────────────────────────

pub fn post(client: &WardenClient, body: &str) -> Reply {
    match client.post(body) {
        Ok(event) => {
            let status = format!("posted {} (seq {})", event.id, event.seq);
            Reply::ok(event, status)
        }
        Err(e) => Reply::error(&e),
    }
}

pub fn act(client: &WardenClient, key: &str, body: &str) -> Reply {
    match client.act(key, body) {
        Ok(GuardOutcome::Emitted { key, reaction_id }) => {
            let status = format!("emitted {reaction_id} for {key}");
            Reply::ok(
                ActResponse {
                    key,
                    emitted: true,
                    reaction_id: Some(reaction_id),
                },
                status,
            )
        }
        Ok(GuardOutcome::Suppressed { key }) => {
            let status = format!("already acted on {key}; skipped");
            Reply::ok(
                ActResponse {
                    key,
                    emitted: false,
                    reaction_id: None,
                },
                status,
            )
        }
        Err(e) => Reply::error(&e),
    }
}

pub fn version() -> Reply {
    Reply::ok(
        VersionResponse {
            name: "warden",
            version: env!("CARGO_PKG_VERSION"),
        },
        format!("warden {}", env!("CARGO_PKG_VERSION")),
    )
}
