//! Advisory registry of active agents: who is working on what, and when
//! they were last heard from. It gives visibility, not exclusion.
//!
//! Records whose heartbeat is older than the TTL are evicted on read, so
//! correctness never depends on `cleanup` being run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::conflict::ConflictEngine;
use crate::document::DocumentStore;
use crate::error::{Result, WardenError};
use crate::types::{AgentRecord, AgentView, ConflictReport};

/// On-disk shape of the registry document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryDoc {
    #[serde(default)]
    pub agents: Vec<AgentRecord>,
}

impl RegistryDoc {
    fn find_mut(&mut self, id: &str) -> Option<&mut AgentRecord> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    fn evict_stale(&mut self, now: u64, ttl_ms: u64) -> Vec<AgentRecord> {
        let (stale, live) = std::mem::take(&mut self.agents)
            .into_iter()
            .partition(|a: &AgentRecord| a.is_stale(now, ttl_ms));
        self.agents = live;
        stale
    }
}

pub struct Registry<D: DocumentStore<RegistryDoc>> {
    doc: D,
    ttl_ms: u64,
    clock: Arc<dyn Clock>,
}

impl<D: DocumentStore<RegistryDoc>> Registry<D> {
    pub fn new(doc: D, config: &Config) -> Self {
        Self {
            doc,
            ttl_ms: config.heartbeat_ttl_ms(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Idempotent upsert: any previous record for `id` is replaced.
    pub fn register(&self, id: &str, task: &str, resources: Vec<String>) -> Result<AgentRecord> {
        let record = self.doc.update(|doc| {
            let now = self.clock.now_ms();
            doc.agents.retain(|a| a.id != id);
            let record = AgentRecord::new(id, task, resources, now);
            doc.agents.push(record.clone());
            record
        })?;
        tracing::info!(agent_id = id, task, "agent registered");
        Ok(record)
    }

    /// Merges a new task and resource set into an existing record and
    /// refreshes its heartbeat. An empty task or resource list keeps the
    /// previous value.
    pub fn update(&self, id: &str, task: &str, resources: Vec<String>) -> Result<AgentRecord> {
        let updated = self.doc.update(|doc| {
            let now = self.clock.now_ms();
            let record = doc.find_mut(id)?;
            if !task.is_empty() {
                record.task = task.to_string();
            }
            if !resources.is_empty() {
                record.resources = resources;
            }
            record.beat(now);
            Some(record.clone())
        })?;
        let record = updated.ok_or_else(|| WardenError::NotRegistered(id.to_string()))?;
        tracing::debug!(agent_id = id, task = %record.task, "agent updated");
        Ok(record)
    }

    pub fn heartbeat(&self, id: &str) -> Result<AgentRecord> {
        self.doc
            .update(|doc| {
                let now = self.clock.now_ms();
                let record = doc.find_mut(id)?;
                record.beat(now);
                Some(record.clone())
            })?
            .ok_or_else(|| WardenError::NotRegistered(id.to_string()))
    }

    /// Returns whether a record was removed.
    pub fn deregister(&self, id: &str) -> Result<bool> {
        let removed = self.doc.update(|doc| {
            let before = doc.agents.len();
            doc.agents.retain(|a| a.id != id);
            doc.agents.len() != before
        })?;
        if removed {
            tracing::info!(agent_id = id, "agent deregistered");
        }
        Ok(removed)
    }

    /// Agents whose heartbeat is within the TTL. Stale records are filtered
    /// from the answer and, if the document mutex is free, written out.
    pub fn list_active(&self) -> Result<Vec<AgentRecord>> {
        let now = self.clock.now_ms();
        let mut doc = self.doc.load()?;
        let stale = doc.evict_stale(now, self.ttl_ms);
        if !stale.is_empty() {
            match self.cleanup() {
                Ok(_) => {}
                Err(e) if e.kind() == crate::error::ErrorKind::Contention => {
                    tracing::debug!(error = %e, "skipping eviction write-back");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(doc.agents)
    }

    /// Active agents with their heartbeat ages, most recently heard first.
    pub fn status(&self) -> Result<Vec<AgentView>> {
        let now = self.clock.now_ms();
        let mut views: Vec<AgentView> = self
            .list_active()?
            .into_iter()
            .map(|agent| AgentView {
                heartbeat_age_secs: agent.heartbeat_age_ms(now) / 1000,
                agent,
            })
            .collect();
        views.sort_by_key(|v| v.heartbeat_age_secs);
        Ok(views)
    }

    /// Other active agents that declared any of `resources`.
    pub fn check_conflicts(&self, requesting_agent: &str, resources: &[String]) -> Result<Vec<ConflictReport>> {
        let active = self.list_active()?;
        Ok(ConflictEngine::check(
            requesting_agent,
            resources,
            &active,
            self.clock.now_ms(),
        ))
    }

    /// Eagerly evicts stale records. Returns how many were removed.
    pub fn cleanup(&self) -> Result<usize> {
        let stale = self.doc.update(|doc| {
            let now = self.clock.now_ms();
            doc.evict_stale(now, self.ttl_ms)
        })?;
        for agent in &stale {
            tracing::info!(agent_id = %agent.id, task = %agent.task, "stale agent evicted");
        }
        Ok(stale.len())
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}
