//! Stable agent identity across invocations of one session.
//!
//! Ownership checks (`release`, `update`, `heartbeat`) only work if every
//! command run by the same agent presents the same id, so the id is derived
//! once and persisted under `sessions/`.

use std::path::{Path, PathBuf};

use crate::document::{create_json_exclusive, read_json_opt, write_json};
use crate::error::Result;

pub const AGENT_ID_ENV: &str = "WARDEN_AGENT_ID";
pub const SESSION_ENV: &str = "WARDEN_SESSION";

/// Key selecting the identity file: `WARDEN_SESSION`, else the parent
/// process id (the shell or harness driving this agent).
pub fn session_key() -> String {
    if let Ok(session) = std::env::var(SESSION_ENV) {
        let session = session.trim();
        if !session.is_empty() {
            return sanitize(session);
        }
    }
    format!("ppid-{}", parent_pid())
}

#[cfg(unix)]
fn parent_pid() -> u32 {
    std::os::unix::process::parent_id()
}

#[cfg(not(unix))]
fn parent_pid() -> u32 {
    std::process::id()
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn identity_path(sessions_dir: &Path, session: &str) -> PathBuf {
    sessions_dir.join(format!("{session}.json"))
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Identity {
    agent_id: String,
}

/// `WARDEN_AGENT_ID` if set; otherwise the id persisted for `session`,
/// minting `agent-<nanoid>` on first use.
pub fn resolve_agent_id(sessions_dir: &Path, session: &str) -> Result<String> {
    if let Ok(id) = std::env::var(AGENT_ID_ENV) {
        let id = id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }
    load_or_create(sessions_dir, session)
}

/// Two first invocations racing in the same session agree on one id: the
/// file is created exclusively and the loser adopts the winner's id.
pub fn load_or_create(sessions_dir: &Path, session: &str) -> Result<String> {
    let path = identity_path(sessions_dir, session);
    if let Some(identity) = read_json_opt::<Identity>(&path)? {
        return Ok(identity.agent_id);
    }
    let minted = Identity {
        agent_id: format!("agent-{}", nanoid::nanoid!(8)),
    };
    if create_json_exclusive(&path, &minted)? {
        tracing::debug!(agent_id = %minted.agent_id, session, "minted agent identity");
        return Ok(minted.agent_id);
    }
    match read_json_opt::<Identity>(&path)? {
        Some(identity) => Ok(identity.agent_id),
        // Created and removed again in between; ours is as good as any.
        None => {
            write_json(&path, &minted)?;
            Ok(minted.agent_id)
        }
    }
}
