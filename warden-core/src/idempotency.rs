//! At-most-once reactions to triggering events.
//!
//! The key for a reaction to an observed event is derived from the event id
//! alone, so polling the same event again (or restarting the watcher) finds
//! the earlier record and suppresses the duplicate.
//!
//! Every reaction carries its key in the event stream, and that tag is what
//! decides. The response history is a fast index over it: a reaction that
//! reached the stream but never got recorded (the history was locked, or the
//! process died in between) is found by key, the record is written after the
//! fact, and the trigger is suppressed. Writers racing on the same key are
//! settled by [`crate::events::EventSink::append_once`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::document::DocumentStore;
use crate::error::Result;
use crate::events::{Appended, EventSource};
use crate::types::{Event, ResponseRecord};

const OBSERVED_PREFIX: &str = "response-to-";

/// What caused a reaction.
#[derive(Debug, Clone, Copy)]
pub enum Trigger<'a> {
    /// A directly requested action with a caller-supplied key
    Direct(&'a str),
    /// A reaction to an event seen in the stream
    Observed(&'a Event),
}

/// Deterministic idempotency key for a trigger.
pub fn derive_key(trigger: Trigger<'_>) -> String {
    match trigger {
        Trigger::Direct(key) => key.to_string(),
        Trigger::Observed(event) => format!("{OBSERVED_PREFIX}{}", event.id),
    }
}

/// Durable record of reactions already emitted.
pub trait ResponseHistory {
    fn has_responded(&self, key: &str) -> Result<bool>;

    /// Records a reaction. Returns `false` if `key` was already recorded,
    /// in which case the existing record is left untouched.
    fn record_response(&self, key: &str, reaction_id: &str, now: u64) -> Result<bool>;
}

impl<T: ResponseHistory + ?Sized> ResponseHistory for Arc<T> {
    fn has_responded(&self, key: &str) -> Result<bool> {
        (**self).has_responded(key)
    }

    fn record_response(&self, key: &str, reaction_id: &str, now: u64) -> Result<bool> {
        (**self).record_response(key, reaction_id, now)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseDoc {
    #[serde(default)]
    pub responses: Vec<ResponseRecord>,
}

/// [`ResponseHistory`] kept in a single shared document.
pub struct DocumentHistory<D: DocumentStore<ResponseDoc>> {
    doc: D,
}

impl<D: DocumentStore<ResponseDoc>> DocumentHistory<D> {
    pub fn new(doc: D) -> Self {
        Self { doc }
    }

    pub fn records(&self) -> Result<Vec<ResponseRecord>> {
        Ok(self.doc.load()?.responses)
    }
}

impl<D: DocumentStore<ResponseDoc>> ResponseHistory for DocumentHistory<D> {
    fn has_responded(&self, key: &str) -> Result<bool> {
        Ok(self.doc.load()?.responses.iter().any(|r| r.key == key))
    }

    fn record_response(&self, key: &str, reaction_id: &str, now: u64) -> Result<bool> {
        self.doc.update(|doc| {
            if doc.responses.iter().any(|r| r.key == key) {
                return false;
            }
            doc.responses.push(ResponseRecord {
                key: key.to_string(),
                reaction_id: reaction_id.to_string(),
                recorded_at: now,
            });
            true
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Emitted { key: String, reaction_id: String },
    Suppressed { key: String },
}

pub struct IdempotencyGuard<H: ResponseHistory> {
    history: H,
    clock: Arc<dyn Clock>,
}

impl<H: ResponseHistory> IdempotencyGuard<H> {
    pub fn new(history: H) -> Self {
        Self {
            history,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn has_responded(&self, key: &str) -> Result<bool> {
        self.history.has_responded(key)
    }

    /// Call only after the reaction has been durably emitted.
    pub fn record_response(&self, key: &str, reaction_id: &str) -> Result<bool> {
        self.history
            .record_response(key, reaction_id, self.clock.now_ms())
    }

    /// Check, emit, record. `emit` runs only if neither the history nor
    /// `ledger` knows a reaction for the trigger, and must tag what it
    /// appends with the key it is given. If `emit` fails nothing is
    /// recorded, so the trigger is retried on the next poll. If recording
    /// fails the error is returned, and the next call finds the reaction in
    /// `ledger` instead of emitting it again.
    pub fn run<L: EventSource + ?Sized>(
        &self,
        trigger: Trigger<'_>,
        ledger: &L,
        emit: impl FnOnce(&str) -> Result<Appended>,
    ) -> Result<GuardOutcome> {
        let key = derive_key(trigger);
        if self.has_responded(&key)? {
            tracing::info!(key = %key, "reaction already emitted; skipping");
            return Ok(GuardOutcome::Suppressed { key });
        }
        if let Some(existing) = ledger.find_reaction(&key)? {
            tracing::warn!(
                key = %key,
                reaction_id = %existing.id,
                "reaction found in the stream without a record; recording it now"
            );
            self.record_response(&key, &existing.id)?;
            return Ok(GuardOutcome::Suppressed { key });
        }
        match emit(&key)? {
            Appended::New(reaction) => {
                self.record_response(&key, &reaction.id)?;
                tracing::info!(key = %key, reaction_id = %reaction.id, "reaction emitted");
                Ok(GuardOutcome::Emitted {
                    key,
                    reaction_id: reaction.id,
                })
            }
            Appended::Existing(reaction) => {
                self.record_response(&key, &reaction.id)?;
                tracing::info!(key = %key, reaction_id = %reaction.id, "lost the race for this key; skipping");
                Ok(GuardOutcome::Suppressed { key })
            }
        }
    }
}
