#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use crate::identity::load_or_create;

    #[test]
    fn same_session_reuses_its_id() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create(dir.path(), "ppid-100").unwrap();
        assert!(first.starts_with("agent-"));
        assert_eq!(load_or_create(dir.path(), "ppid-100").unwrap(), first);
        assert!(dir.path().join("ppid-100.json").exists());
    }

    #[test]
    fn sessions_get_distinct_ids() {
        let dir = tempfile::tempdir().unwrap();
        let a = load_or_create(dir.path(), "ppid-100").unwrap();
        let b = load_or_create(dir.path(), "ppid-200").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn existing_identity_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("s.json"), r#"{"agent_id":"agent-first"}"#).unwrap();
        assert_eq!(load_or_create(dir.path(), "s").unwrap(), "agent-first");
    }

    #[test]
    fn first_invocations_racing_agree_on_one_id() {
        const INVOCATIONS: usize = 6;
        for round in 0..10 {
            let dir = tempfile::tempdir().unwrap();
            let barrier = Arc::new(Barrier::new(INVOCATIONS));
            let handles: Vec<_> = (0..INVOCATIONS)
                .map(|_| {
                    let sessions = dir.path().to_path_buf();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        load_or_create(&sessions, "ppid-7").unwrap()
                    })
                })
                .collect();

            let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            assert!(ids.iter().all(|id| *id == ids[0]), "round {round}: {ids:?}");
            assert_eq!(load_or_create(dir.path(), "ppid-7").unwrap(), ids[0]);
        }
    }
}
