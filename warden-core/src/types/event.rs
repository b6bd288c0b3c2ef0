use serde::{Deserialize, Serialize};

pub const KIND_MESSAGE: &str = "message";
pub const KIND_REACTION: &str = "reaction";

/// One entry in the shared event stream the watcher polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the store; strictly increasing
    pub seq: u64,
    pub id: String,
    pub kind: String,
    pub author: String,
    pub body: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Idempotency key of the trigger this event reacts to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// An event before the store has assigned it a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub id: String,
    pub kind: String,
    pub author: String,
    pub body: String,
    pub reply_to: Option<String>,
    pub key: Option<String>,
}

impl NewEvent {
    pub fn message(author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: nanoid::nanoid!(12),
            kind: KIND_MESSAGE.to_string(),
            author: author.into(),
            body: body.into(),
            reply_to: None,
            key: None,
        }
    }

    pub fn reaction(
        author: impl Into<String>,
        body: impl Into<String>,
        reply_to: Option<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            id: nanoid::nanoid!(12),
            kind: KIND_REACTION.to_string(),
            author: author.into(),
            body: body.into(),
            reply_to,
            key: Some(key.into()),
        }
    }

    pub fn into_event(self, seq: u64, now: u64) -> Event {
        Event {
            seq,
            id: self.id,
            kind: self.kind,
            author: self.author,
            body: self.body,
            created_at: now,
            reply_to: self.reply_to,
            key: self.key,
        }
    }
}

/// "This trigger already produced a reaction."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub key: String,
    pub reaction_id: String,
    pub recorded_at: u64,
}
