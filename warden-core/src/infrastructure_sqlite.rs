//! SQLite-backed event store and response history.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! warden-core = { path = "../warden-core", features = ["sqlite"] }
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::clock::now_ms;
use crate::error::Result;
use crate::events::{Appended, EventSink, EventSource};
use crate::idempotency::ResponseHistory;
use crate::types::{Event, KIND_REACTION, NewEvent};

/// Events and responses in one database. Uses WAL mode so the watcher can
/// poll while agents append.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT NOT NULL UNIQUE,
                kind       TEXT NOT NULL,
                author     TEXT NOT NULL,
                body       TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                reply_to   TEXT,
                key        TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_events_key ON events(key);

            CREATE TABLE IF NOT EXISTS responses (
                key         TEXT PRIMARY KEY,
                reaction_id TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<Event> {
        Ok(Event {
            seq: row.get(0)?,
            id: row.get(1)?,
            kind: row.get(2)?,
            author: row.get(3)?,
            body: row.get(4)?,
            created_at: row.get(5)?,
            reply_to: row.get(6)?,
            key: row.get(7)?,
        })
    }

    fn insert(conn: &Connection, event: NewEvent) -> Result<Event> {
        let now = now_ms();
        conn.execute(
            "INSERT INTO events (id, kind, author, body, created_at, reply_to, key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id,
                event.kind,
                event.author,
                event.body,
                now,
                event.reply_to,
                event.key,
            ],
        )?;
        let seq = conn.last_insert_rowid() as u64;
        Ok(event.into_event(seq, now))
    }

    fn reaction_by_key(conn: &Connection, key: &str) -> Result<Option<Event>> {
        let event = conn
            .query_row(
                "SELECT seq, id, kind, author, body, created_at, reply_to, key
                 FROM events WHERE key = ?1 AND kind = ?2 ORDER BY seq LIMIT 1",
                params![key, KIND_REACTION],
                Self::row_to_event,
            )
            .optional()?;
        Ok(event)
    }
}

impl EventSource for SqliteEventStore {
    fn poll(&self, after: u64) -> Result<Vec<Event>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT seq, id, kind, author, body, created_at, reply_to, key
             FROM events WHERE seq > ?1 ORDER BY seq",
        )?;
        let events = stmt
            .query_map(params![after], Self::row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    fn find_reaction(&self, key: &str) -> Result<Option<Event>> {
        Self::reaction_by_key(&self.conn(), key)
    }
}

impl EventSink for SqliteEventStore {
    fn append(&self, event: NewEvent) -> Result<Event> {
        Self::insert(&self.conn(), event)
    }

    fn append_once(&self, event: NewEvent) -> Result<Appended> {
        let mut conn = self.conn();
        // IMMEDIATE takes the write lock up front, so no other process can
        // insert the same key between the lookup and the insert.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if let Some(key) = event.key.as_deref() {
            if let Some(prior) = Self::reaction_by_key(&tx, key)? {
                return Ok(Appended::Existing(prior));
            }
        }
        let appended = Self::insert(&tx, event)?;
        tx.commit()?;
        Ok(Appended::New(appended))
    }
}

impl ResponseHistory for SqliteEventStore {
    fn has_responded(&self, key: &str) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM responses WHERE key = ?1",
                params![key],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn record_response(&self, key: &str, reaction_id: &str, now: u64) -> Result<bool> {
        let rows = self.conn().execute(
            "INSERT OR IGNORE INTO responses (key, reaction_id, recorded_at) VALUES (?1, ?2, ?3)",
            params![key, reaction_id, now],
        )?;
        Ok(rows > 0)
    }
}
