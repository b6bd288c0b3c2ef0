use serde::{Deserialize, Serialize};

/// One live participant in the coordination registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub task: String,
    /// Resources the agent says it is touching. Advisory only.
    #[serde(default)]
    pub resources: Vec<String>,
    pub started_at: u64,
    pub heartbeat_at: u64,
}

impl AgentRecord {
    pub fn new(id: impl Into<String>, task: impl Into<String>, resources: Vec<String>, now: u64) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            resources,
            started_at: now,
            heartbeat_at: now,
        }
    }

    pub fn heartbeat_age_ms(&self, now: u64) -> u64 {
        super::age_ms(now, self.heartbeat_at)
    }

    pub fn is_stale(&self, now: u64, ttl_ms: u64) -> bool {
        self.heartbeat_age_ms(now) > ttl_ms
    }

    pub fn touches(&self, resource: &str) -> bool {
        self.resources.iter().any(|r| r == resource)
    }

    /// Moves the heartbeat forward, never backward.
    pub fn beat(&mut self, now: u64) {
        self.heartbeat_at = self.heartbeat_at.max(now);
    }
}

/// Another agent already declares a resource the caller wants to touch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub resource: String,
    pub agent_id: String,
    pub task: String,
    pub heartbeat_age_secs: u64,
}

/// An active agent as shown by `agent status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: AgentRecord,
    pub heartbeat_age_secs: u64,
}
