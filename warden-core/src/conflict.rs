use crate::types::{AgentRecord, ConflictReport};

/// Pure overlap detection between the resources a caller is about to touch
/// and the resources other active agents have declared.
pub struct ConflictEngine;

impl ConflictEngine {
    /// One report per (resource, other agent) pair. The caller's own record
    /// never conflicts with itself. Candidates are reported in input order.
    pub fn check(
        requesting_agent: &str,
        candidates: &[String],
        active_agents: &[AgentRecord],
        now: u64,
    ) -> Vec<ConflictReport> {
        let mut reports = Vec::new();
        for resource in candidates {
            for agent in active_agents {
                if agent.id == requesting_agent || !agent.touches(resource) {
                    continue;
                }
                reports.push(ConflictReport {
                    resource: resource.clone(),
                    agent_id: agent.id.clone(),
                    task: agent.task.clone(),
                    heartbeat_age_secs: agent.heartbeat_age_ms(now) / 1000,
                });
            }
        }
        reports
    }

    /// Splits a comma-separated resource list, dropping blanks and duplicates.
    pub fn parse_resources(raw: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if !out.iter().any(|r| r == part) {
                out.push(part.to_string());
            }
        }
        out
    }
}
