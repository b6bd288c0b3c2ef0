//! The shared event stream the watcher polls, and the reactions it emits.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::clock::now_ms;
use crate::error::{Result, WardenError};
use crate::mutex::{FileToken, RetryPolicy, token_path_for};
use crate::types::{Event, KIND_REACTION, NewEvent};

/// Read side of an event store.
pub trait EventSource {
    /// Events with `seq > after`, oldest first.
    fn poll(&self, after: u64) -> Result<Vec<Event>>;

    /// The earliest reaction tagged with `key`, if one was ever appended.
    fn find_reaction(&self, key: &str) -> Result<Option<Event>> {
        Ok(self
            .poll(0)?
            .into_iter()
            .find(|e| e.kind == KIND_REACTION && e.key.as_deref() == Some(key)))
    }
}

/// Result of [`EventSink::append_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    /// The event was written by this call
    New(Event),
    /// A reaction with the same key was already in the stream; nothing was written
    Existing(Event),
}

impl Appended {
    pub fn event(&self) -> &Event {
        match self {
            Appended::New(event) | Appended::Existing(event) => event,
        }
    }

    pub fn into_event(self) -> Event {
        match self {
            Appended::New(event) | Appended::Existing(event) => event,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Appended::New(_))
    }
}

/// Write side of an event store.
pub trait EventSink {
    /// Appends an event and returns it with its assigned position.
    fn append(&self, event: NewEvent) -> Result<Event>;

    /// Appends a keyed reaction unless one with the same key already exists.
    /// The check and the write are a single step with respect to every other
    /// writer of the store. Events without a key are always appended.
    fn append_once(&self, event: NewEvent) -> Result<Appended>;
}

/// A store that can be both polled and appended to.
pub trait EventStore: EventSource + EventSink + Send + Sync {}

impl<T: EventSource + EventSink + Send + Sync + ?Sized> EventStore for T {}

impl<T: EventSource + ?Sized> EventSource for Arc<T> {
    fn poll(&self, after: u64) -> Result<Vec<Event>> {
        (**self).poll(after)
    }

    fn find_reaction(&self, key: &str) -> Result<Option<Event>> {
        (**self).find_reaction(key)
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn append(&self, event: NewEvent) -> Result<Event> {
        (**self).append(event)
    }

    fn append_once(&self, event: NewEvent) -> Result<Appended> {
        (**self).append_once(event)
    }
}

/// Emits a reaction to a triggering event.
pub trait Reactor {
    /// Returns the reaction tagged with `key`. Must only return `Ok` once the
    /// reaction is durable; [`Appended::Existing`] means another writer got
    /// there first.
    fn react(&mut self, event: &Event, key: &str) -> Result<Appended>;
}

impl<R: Reactor + ?Sized> Reactor for Box<R> {
    fn react(&mut self, event: &Event, key: &str) -> Result<Appended> {
        (**self).react(event, key)
    }
}

/// Append-only JSON-lines event store; one event per line.
#[derive(Debug, Clone)]
pub struct JsonlEventStore {
    path: PathBuf,
    policy: RetryPolicy,
}

impl JsonlEventStore {
    pub fn new(path: impl Into<PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            policy,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<Event>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WardenError::io(&self.path, e)),
        };
        // Readers don't take the token; a line still being appended has no
        // trailing newline yet and belongs to the next read.
        let complete = match raw.rfind('\n') {
            Some(end) => &raw[..=end],
            None => "",
        };
        complete
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| WardenError::corrupt(&self.path, e)))
            .collect()
    }
}

impl EventSource for JsonlEventStore {
    fn poll(&self, after: u64) -> Result<Vec<Event>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|e| e.seq > after)
            .collect())
    }
}

impl JsonlEventStore {
    /// Writes one line. Caller holds the events token and has read `existing`
    /// under it.
    fn write_locked(&self, existing: &[Event], event: NewEvent) -> Result<Event> {
        let last_seq = existing.last().map(|e| e.seq).unwrap_or(0);
        let event = event.into_event(last_seq + 1, now_ms());

        let mut line = serde_json::to_string(&event).map_err(|e| WardenError::corrupt(&self.path, e))?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| WardenError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| WardenError::io(&self.path, e))?;
        Ok(event)
    }
}

impl EventSink for JsonlEventStore {
    fn append(&self, event: NewEvent) -> Result<Event> {
        let _token = FileToken::acquire(&token_path_for(&self.path), "events", &self.policy)?;
        let existing = self.read_all()?;
        self.write_locked(&existing, event)
    }

    fn append_once(&self, event: NewEvent) -> Result<Appended> {
        let _token = FileToken::acquire(&token_path_for(&self.path), "events", &self.policy)?;
        let existing = self.read_all()?;
        if let Some(key) = event.key.as_deref() {
            let prior = existing
                .iter()
                .find(|e| e.kind == KIND_REACTION && e.key.as_deref() == Some(key));
            if let Some(prior) = prior {
                return Ok(Appended::Existing(prior.clone()));
            }
        }
        self.write_locked(&existing, event).map(Appended::New)
    }
}

type Composer = Box<dyn Fn(&Event) -> String + Send>;

/// Reacts by appending a `reaction` event that replies to the trigger.
pub struct AppendReactor<S: EventSink> {
    sink: S,
    author: String,
    compose: Composer,
}

impl<S: EventSink> AppendReactor<S> {
    pub fn new(sink: S, author: impl Into<String>) -> Self {
        Self {
            sink,
            author: author.into(),
            compose: Box::new(|event: &Event| format!("acknowledged {}", event.id)),
        }
    }

    pub fn with_composer(mut self, compose: impl Fn(&Event) -> String + Send + 'static) -> Self {
        self.compose = Box::new(compose);
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: EventSink> Reactor for AppendReactor<S> {
    fn react(&mut self, event: &Event, key: &str) -> Result<Appended> {
        let body = (self.compose)(event);
        self.sink.append_once(NewEvent::reaction(
            &self.author,
            body,
            Some(event.id.clone()),
            key,
        ))
    }
}

/// Whether an event should get a reaction from `watcher_id`: reactions and
/// the watcher's own events never do.
pub fn is_trigger(event: &Event, watcher_id: &str) -> bool {
    event.kind != KIND_REACTION && event.author != watcher_id
}
