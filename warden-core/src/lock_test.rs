#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::infrastructure::LeaseStore;
    use crate::infrastructure_in_memory::InMemoryLeaseStore;
    use crate::lock::LockManager;
    use crate::types::{Lease, LeaseCheck, LeaseFailureReason, LeaseResult, LeaseState, ReleaseResult};
    use crate::WardenError;

    const TTL_MS: u64 = 600_000;

    fn config() -> Config {
        Config {
            mutex_attempts: 3,
            mutex_backoff: Duration::from_millis(1),
            ..Config::default()
        }
    }

    fn manager(store: &InMemoryLeaseStore, agent: &str, clock: &ManualClock) -> LockManager<InMemoryLeaseStore> {
        LockManager::new(store.clone(), agent, &config()).with_clock(clock.clone())
    }

    #[test]
    fn check_reports_free_locked_and_stale() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(1_000);
        let a = manager(&store, "agent_a", &clock);

        assert_eq!(a.check("config.go").unwrap(), LeaseCheck::Free);

        assert!(a.acquire("config.go", "editing").unwrap().is_success());
        assert_eq!(
            a.check("config.go").unwrap(),
            LeaseCheck::LockedBy {
                owner: "agent_a".into(),
                purpose: "editing".into()
            }
        );

        // Exactly at the TTL the lease still holds
        clock.advance(TTL_MS);
        assert!(matches!(a.check("config.go").unwrap(), LeaseCheck::LockedBy { .. }));

        clock.advance(1);
        assert!(matches!(a.check("config.go").unwrap(), LeaseCheck::Stale(_)));
    }

    #[test]
    fn check_does_not_mutate() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(1_000);
        store.insert(Lease::new("x", "agent_a", "old", 0));
        clock.set(TTL_MS * 10);

        let b = manager(&store, "agent_b", &clock);
        assert!(matches!(b.check("x").unwrap(), LeaseCheck::Stale(_)));
        assert_eq!(b.status().unwrap().len(), 1);
    }

    #[test]
    fn second_agent_gets_conflict_naming_owner() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(1_000);
        let a = manager(&store, "agent_a", &clock);
        let b = manager(&store, "agent_b", &clock);

        assert!(a.acquire("config.go", "editing").unwrap().is_success());
        let result = b.acquire("config.go", "also editing").unwrap();
        assert!(matches!(
            result,
            LeaseResult::Failure { reason: LeaseFailureReason::Conflict, .. }
        ));
        assert_eq!(result.held_by(), Some("agent_a"));
    }

    #[test]
    fn reacquire_by_owner_refreshes_lease() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(1_000);
        let a = manager(&store, "agent_a", &clock);

        a.acquire("x", "first").unwrap();
        clock.advance(5_000);
        let LeaseResult::Success { lease, reclaimed_from } = a.acquire("x", "second").unwrap() else {
            panic!("owner re-acquire should succeed");
        };
        assert_eq!(lease.acquired_at, 6_000);
        assert_eq!(lease.purpose, "second");
        assert_eq!(reclaimed_from, None);
    }

    #[test]
    fn stale_lease_can_be_reclaimed_by_another_agent() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(1_000);
        let a = manager(&store, "agent_a", &clock);
        let b = manager(&store, "agent_b", &clock);

        a.acquire("x", "editing").unwrap();
        clock.advance(TTL_MS + 1);

        let LeaseResult::Success { lease, reclaimed_from } = b.acquire("x", "taking over").unwrap() else {
            panic!("stale lease should be reclaimable");
        };
        assert_eq!(lease.owner, "agent_b");
        assert_eq!(reclaimed_from.as_deref(), Some("agent_a"));
        assert!(matches!(b.check("x").unwrap(), LeaseCheck::LockedBy { owner, .. } if owner == "agent_b"));
    }

    #[test]
    fn release_by_non_owner_is_denied_and_lease_unchanged() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(1_000);
        let a = manager(&store, "agent_a", &clock);
        let b = manager(&store, "agent_b", &clock);

        a.acquire("x", "editing").unwrap();
        let before = store.list().unwrap();

        assert_eq!(
            b.release("x").unwrap(),
            ReleaseResult::Denied {
                owner: "agent_a".into()
            }
        );
        assert_eq!(store.list().unwrap(), before);
    }

    #[test]
    fn release_by_owner_or_after_staleness() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(1_000);
        let a = manager(&store, "agent_a", &clock);
        let b = manager(&store, "agent_b", &clock);

        a.acquire("x", "editing").unwrap();
        assert_eq!(a.release("x").unwrap(), ReleaseResult::Released);
        assert_eq!(a.release("x").unwrap(), ReleaseResult::NotHeld);

        a.acquire("y", "editing").unwrap();
        clock.advance(TTL_MS + 1);
        assert_eq!(b.release("y").unwrap(), ReleaseResult::Released);
        assert_eq!(b.check("y").unwrap(), LeaseCheck::Free);
    }

    #[test]
    fn renew_is_owner_only() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(1_000);
        let a = manager(&store, "agent_a", &clock);
        let b = manager(&store, "agent_b", &clock);

        assert!(matches!(
            a.renew("x").unwrap(),
            LeaseResult::Failure { reason: LeaseFailureReason::NotHeld, .. }
        ));

        a.acquire("x", "editing").unwrap();
        clock.advance(TTL_MS - 10);
        assert!(a.renew("x").unwrap().is_success());
        clock.advance(20);
        // Would have gone stale without the renewal
        assert!(matches!(b.check("x").unwrap(), LeaseCheck::LockedBy { .. }));

        assert!(matches!(
            b.renew("x").unwrap(),
            LeaseResult::Failure { reason: LeaseFailureReason::Denied, .. }
        ));
    }

    #[test]
    fn status_annotates_active_and_stale() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(TTL_MS * 2);
        store.insert(Lease::new("old", "agent_a", "x", 0));
        store.insert(Lease::new("new", "agent_a", "x", TTL_MS * 2 - 3_000));

        let a = manager(&store, "agent_a", &clock);
        let views = a.status().unwrap();
        let states: Vec<(&str, LeaseState, u64)> = views
            .iter()
            .map(|v| (v.lease.resource.as_str(), v.state, v.age_secs))
            .collect();
        assert_eq!(
            states,
            vec![("new", LeaseState::Active, 3), ("old", LeaseState::Stale, TTL_MS * 2 / 1000)]
        );
    }

    #[test]
    fn cleanup_removes_only_stale_leases() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(TTL_MS * 2);
        store.insert(Lease::new("old1", "agent_a", "x", 0));
        store.insert(Lease::new("old2", "agent_b", "x", 10));
        store.insert(Lease::new("fresh", "agent_b", "x", TTL_MS * 2));

        let a = manager(&store, "agent_a", &clock);
        assert_eq!(a.cleanup().unwrap(), 2);
        assert_eq!(a.cleanup().unwrap(), 0);
        let left: Vec<String> = store.list().unwrap().into_iter().map(|l| l.resource).collect();
        assert_eq!(left, vec!["fresh".to_string()]);
    }

    #[test]
    fn held_token_times_out_distinct_from_conflict() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(1_000);
        let a = manager(&store, "agent_a", &clock);

        let _stuck = store.hold_token("x").unwrap();
        let err = a.acquire("x", "editing").unwrap_err();
        assert!(matches!(err, WardenError::MutexTimeout { attempts: 3, .. }));
        assert_eq!(err.kind(), crate::ErrorKind::Contention);

        // Release path uses the same token
        assert!(matches!(a.release("x"), Err(WardenError::MutexTimeout { .. })));
        // Reads never need it
        assert_eq!(a.check("x").unwrap(), LeaseCheck::Free);
    }

    #[test]
    fn token_is_released_after_failure() {
        let store = InMemoryLeaseStore::new();
        let clock = ManualClock::new(1_000);
        let a = manager(&store, "agent_a", &clock);
        let b = manager(&store, "agent_b", &clock);

        a.acquire("x", "editing").unwrap();
        assert!(!b.acquire("x", "editing").unwrap().is_success());
        // If the failed call had leaked the token, this would time out
        assert!(store.hold_token("x").is_some());
    }
}
