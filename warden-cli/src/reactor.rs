//! Reacting to events by running a user-supplied shell command.

use std::process::{Command, Stdio};
use std::sync::Arc;

use warden_core::events::{Appended, EventStore, Reactor};
use warden_core::types::{Event, NewEvent};
use warden_core::{Result, WardenError};

pub const EVENT_ID_ENV: &str = "WARDEN_EVENT_ID";
pub const EVENT_AUTHOR_ENV: &str = "WARDEN_EVENT_AUTHOR";
pub const EVENT_BODY_ENV: &str = "WARDEN_EVENT_BODY";
pub const IDEMPOTENCY_KEY_ENV: &str = "WARDEN_IDEMPOTENCY_KEY";

/// Runs `command` once per trigger with the event in its environment and
/// appends the command's stdout as the reaction body. A non-zero exit is a
/// failed reaction, so the trigger is retried on the next poll.
pub struct CommandReactor {
    command: String,
    sink: Arc<dyn EventStore>,
    author: String,
}

impl CommandReactor {
    pub fn new(command: impl Into<String>, sink: Arc<dyn EventStore>, author: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            sink,
            author: author.into(),
        }
    }
}

impl Reactor for CommandReactor {
    fn react(&mut self, event: &Event, key: &str) -> Result<Appended> {
        let output = shell(&self.command)
            .env(EVENT_ID_ENV, &event.id)
            .env(EVENT_AUTHOR_ENV, &event.author)
            .env(EVENT_BODY_ENV, &event.body)
            .env(IDEMPOTENCY_KEY_ENV, key)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| WardenError::Reaction(format!("could not run `{}`: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WardenError::Reaction(format!(
                "`{}` exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let body = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let reaction = self.sink.append_once(NewEvent::reaction(
            &self.author,
            body,
            Some(event.id.clone()),
            key,
        ))?;
        tracing::debug!(
            event_id = %event.id,
            reaction_id = %reaction.event().id,
            new = reaction.is_new(),
            "command reaction appended"
        );
        Ok(reaction)
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}
