//! High-level client wiring the coordination pieces to their on-disk
//! stores under one state directory. The CLI delegates to this.

use std::fs;
use std::sync::Arc;

use crate::config::Config;
use crate::document::JsonDocument;
use crate::error::{Result, WardenError};
use crate::events::{EventSink, EventStore, JsonlEventStore};
use crate::idempotency::{
    DocumentHistory, GuardOutcome, IdempotencyGuard, ResponseDoc, ResponseHistory, Trigger,
};
use crate::identity;
use crate::infrastructure_fs::FsLeaseStore;
use crate::leader::{LeaderElection, OsLiveness};
use crate::lock::LockManager;
use crate::mutex::RetryPolicy;
use crate::registry::{Registry, RegistryDoc};
use crate::types::NewEvent;

pub type FsLockManager = LockManager<FsLeaseStore>;
pub type FsRegistry = Registry<JsonDocument<RegistryDoc>>;
pub type SharedHistory = Arc<dyn ResponseHistory + Send + Sync>;

/// Where events and response history live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventBackend {
    /// `events.jsonl` and `responses.json` in the state directory
    Jsonl,
    /// One SQLite database holding both
    #[cfg(feature = "sqlite")]
    Sqlite(std::path::PathBuf),
}

impl EventBackend {
    /// Parses `"jsonl"` or `"sqlite:<path>"`.
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        if raw == "jsonl" {
            return Ok(EventBackend::Jsonl);
        }
        if let Some(path) = raw.strip_prefix("sqlite:") {
            if path.is_empty() {
                return Err("sqlite backend needs a path: sqlite:<path>".to_string());
            }
            #[cfg(feature = "sqlite")]
            return Ok(EventBackend::Sqlite(std::path::PathBuf::from(path)));
            #[cfg(not(feature = "sqlite"))]
            return Err(
                "SQLite event store requested but the `sqlite` feature is not enabled. \
                 Rebuild with: cargo build --features sqlite"
                    .to_string(),
            );
        }
        Err(format!(
            "Unknown event backend '{raw}'. Use 'jsonl' or 'sqlite:<path>'"
        ))
    }
}

pub struct WardenClient {
    config: Config,
    agent_id: String,
    locks: FsLockManager,
    registry: FsRegistry,
    events: Arc<dyn EventStore>,
    guard: IdempotencyGuard<SharedHistory>,
}

impl WardenClient {
    /// Opens the state directory, resolving this session's agent identity.
    pub fn open(config: Config, backend: &EventBackend) -> Result<Self> {
        fs::create_dir_all(&config.state_dir).map_err(|e| WardenError::io(&config.state_dir, e))?;
        let agent_id =
            identity::resolve_agent_id(&config.sessions_dir(), &identity::session_key())?;
        Self::open_as(config, backend, agent_id)
    }

    /// Opens the state directory acting as `agent_id`.
    pub fn open_as(config: Config, backend: &EventBackend, agent_id: impl Into<String>) -> Result<Self> {
        let agent_id = agent_id.into();
        fs::create_dir_all(&config.state_dir).map_err(|e| WardenError::io(&config.state_dir, e))?;
        let policy = RetryPolicy::from_config(&config);

        let locks = LockManager::new(
            FsLeaseStore::new(config.locks_dir(), config.mutex_stale_after),
            agent_id.clone(),
            &config,
        );
        let registry = Registry::new(JsonDocument::new(config.registry_path(), policy), &config);

        let (events, history): (Arc<dyn EventStore>, SharedHistory) = match backend {
            EventBackend::Jsonl => {
                let events: Arc<dyn EventStore> =
                    Arc::new(JsonlEventStore::new(config.events_path(), policy));
                let history: SharedHistory = Arc::new(DocumentHistory::new(
                    JsonDocument::<ResponseDoc>::new(config.responses_path(), policy),
                ));
                (events, history)
            }
            #[cfg(feature = "sqlite")]
            EventBackend::Sqlite(path) => {
                let store = Arc::new(crate::infrastructure_sqlite::SqliteEventStore::open(path)?);
                let events: Arc<dyn EventStore> = store.clone();
                let history: SharedHistory = store;
                (events, history)
            }
        };

        Ok(Self {
            config,
            agent_id,
            locks,
            registry,
            events,
            guard: IdempotencyGuard::new(history),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn locks(&self) -> &FsLockManager {
        &self.locks
    }

    pub fn registry(&self) -> &FsRegistry {
        &self.registry
    }

    pub fn events(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.events)
    }

    pub fn guard(&self) -> &IdempotencyGuard<SharedHistory> {
        &self.guard
    }

    /// A fresh guard over the same history, for handing to a watcher.
    pub fn new_guard(&self) -> IdempotencyGuard<SharedHistory> {
        IdempotencyGuard::new(Arc::clone(self.guard.history()))
    }

    pub fn election(&self) -> LeaderElection<OsLiveness> {
        LeaderElection::new(&self.config, OsLiveness)
    }

    /// Appends a `message` event authored by this agent.
    pub fn post(&self, body: &str) -> Result<crate::types::Event> {
        self.events.append(NewEvent::message(&self.agent_id, body))
    }

    /// Directly triggered action with a caller-supplied idempotency key:
    /// the reaction event is appended at most once per key, even when
    /// several agents act on the same key at the same moment.
    pub fn act(&self, key: &str, body: &str) -> Result<GuardOutcome> {
        self.guard.run(Trigger::Direct(key), &self.events, |key| {
            self.events
                .append_once(NewEvent::reaction(&self.agent_id, body, None, key))
        })
    }
}
