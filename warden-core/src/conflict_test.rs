#[cfg(test)]
mod tests {
    use crate::conflict::ConflictEngine;
    use crate::types::AgentRecord;

    // =========================================================================
    // Helper
    // =========================================================================
    fn agent(id: &str, resources: &[&str]) -> AgentRecord {
        AgentRecord::new(
            id,
            format!("task of {id}"),
            resources.iter().map(|r| r.to_string()).collect(),
            1_000,
        )
    }

    fn res(items: &[&str]) -> Vec<String> {
        items.iter().map(|r| r.to_string()).collect()
    }

    // =========================================================================
    // Overlap detection
    // =========================================================================

    #[test]
    fn disjoint_resources_do_not_conflict() {
        let active = vec![agent("a", &["src/a.rs"])];
        let reports = ConflictEngine::check("b", &res(&["src/b.rs"]), &active, 2_000);
        assert!(reports.is_empty());
    }

    #[test]
    fn shared_resource_is_reported_with_owner_task() {
        let active = vec![agent("a", &["config.go", "main.go"])];
        let reports = ConflictEngine::check("b", &res(&["config.go"]), &active, 4_000);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].resource, "config.go");
        assert_eq!(reports[0].agent_id, "a");
        assert_eq!(reports[0].task, "task of a");
        assert_eq!(reports[0].heartbeat_age_secs, 3);
    }

    #[test]
    fn own_declaration_is_not_a_conflict() {
        let active = vec![agent("a", &["config.go"])];
        let reports = ConflictEngine::check("a", &res(&["config.go"]), &active, 2_000);
        assert!(reports.is_empty());
    }

    #[test]
    fn every_overlapping_agent_is_listed() {
        let active = vec![
            agent("a", &["x"]),
            agent("b", &["x", "y"]),
            agent("c", &["z"]),
        ];
        let reports = ConflictEngine::check("me", &res(&["x", "y"]), &active, 1_000);
        let pairs: Vec<(&str, &str)> = reports
            .iter()
            .map(|r| (r.resource.as_str(), r.agent_id.as_str()))
            .collect();
        assert_eq!(pairs, vec![("x", "a"), ("x", "b"), ("y", "b")]);
    }

    #[test]
    fn exact_match_only() {
        let active = vec![agent("a", &["src/config.go"])];
        let reports = ConflictEngine::check("b", &res(&["config.go"]), &active, 1_000);
        assert!(reports.is_empty());
    }

    // =========================================================================
    // Resource list parsing
    // =========================================================================

    #[test]
    fn parse_resources_trims_and_dedups() {
        assert_eq!(
            ConflictEngine::parse_resources(" a.rs, b.rs ,,a.rs "),
            vec!["a.rs".to_string(), "b.rs".to_string()]
        );
        assert!(ConflictEngine::parse_resources("").is_empty());
    }
}
