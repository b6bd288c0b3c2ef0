#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::clock::ManualClock;
    use crate::config::Config;
    use crate::leader::{LeaderElection, LeaderMarker, ProcessLiveness, WatchState};
    use crate::watch::{Supervisor, watch_report};
    use crate::WardenError;

    /// Pids in the set are alive.
    #[derive(Clone, Default)]
    struct FakeLiveness {
        alive: Arc<Mutex<HashSet<u32>>>,
    }

    impl FakeLiveness {
        fn spawn(&self, pid: u32) {
            self.alive.lock().unwrap().insert(pid);
        }

        fn kill(&self, pid: u32) {
            self.alive.lock().unwrap().remove(&pid);
        }
    }

    impl ProcessLiveness for FakeLiveness {
        fn is_alive(&self, pid: u32) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        config: Config,
        procs: FakeLiveness,
        clock: ManualClock,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let config = Config::with_state_dir(tmp.path());
            Self {
                _tmp: tmp,
                config,
                procs: FakeLiveness::default(),
                clock: ManualClock::new(1_000),
            }
        }

        fn election(&self, pid: u32) -> LeaderElection<FakeLiveness> {
            self.procs.spawn(pid);
            LeaderElection::new(&self.config, self.procs.clone())
                .with_pid(pid)
                .with_clock(self.clock.clone())
        }
    }

    #[test]
    fn only_one_leader_while_it_lives() {
        let fx = Fixture::new();
        let first = fx.election(100).try_acquire().unwrap();

        let err = fx.election(200).try_acquire().unwrap_err();
        assert!(matches!(err, WardenError::LeaderActive { pid: 100 }));
        assert_eq!(err.kind(), crate::ErrorKind::Contention);

        // The rejected starter left the marker alone
        let marker = fx.election(300).current().unwrap().unwrap();
        assert_eq!(marker.pid, 100);
        drop(first);
    }

    #[test]
    fn dead_leader_is_replaced() {
        let fx = Fixture::new();
        let first = fx.election(100).try_acquire().unwrap();
        fx.procs.kill(100);
        // Simulate a crash: the guard never runs its cleanup
        std::mem::forget(first);

        let third = fx.election(300).try_acquire().unwrap();
        assert_eq!(third.pid(), 300);
        assert_eq!(fx.election(300).current().unwrap().unwrap().pid, 300);
    }

    #[test]
    fn guard_drop_removes_marker() {
        let fx = Fixture::new();
        let election = fx.election(100);
        {
            let _guard = election.try_acquire().unwrap();
            assert!(election.marker_path().exists());
        }
        assert!(!election.marker_path().exists());
    }

    #[test]
    fn release_reports_removal() {
        let fx = Fixture::new();
        let election = fx.election(100);
        let guard = election.try_acquire().unwrap();
        assert!(guard.release().unwrap());
        assert!(!election.marker_path().exists());
        assert!(fx.election(200).try_acquire().is_ok());
    }

    #[test]
    fn guard_leaves_foreign_marker_alone() {
        let fx = Fixture::new();
        let election = fx.election(100);
        let mut guard = election.try_acquire().unwrap();

        crate::document::write_json(
            election.marker_path(),
            &LeaderMarker {
                pid: 999,
                acquired_at: 0,
            },
        )
        .unwrap();
        assert!(!election.refresh(&mut guard).unwrap());
        assert!(!guard.release().unwrap());
        assert_eq!(election.current().unwrap().unwrap().pid, 999);
    }

    #[test]
    fn own_pid_marker_is_reclaimed() {
        let fx = Fixture::new();
        let election = fx.election(100);
        std::mem::forget(election.try_acquire().unwrap());

        // Same pid, new process: the old marker is not a live rival
        let again = election.try_acquire().unwrap();
        assert_eq!(again.pid(), 100);
    }

    #[test]
    fn corrupt_marker_is_reclaimed() {
        let fx = Fixture::new();
        let election = fx.election(100);
        std::fs::create_dir_all(election.marker_path().parent().unwrap()).unwrap();
        std::fs::write(election.marker_path(), "{not json").unwrap();

        let guard = election.try_acquire().unwrap();
        assert_eq!(election.current().unwrap().unwrap().pid, guard.pid());
    }

    #[test]
    fn stale_fallback_needs_opt_in() {
        let mut fx = Fixture::new();
        let first = fx.election(100).try_acquire().unwrap();
        fx.clock.advance(3_600_000);
        // Alive pid, old marker, no fallback configured
        assert!(fx.election(200).try_acquire().is_err());
        std::mem::forget(first);

        fx.config.leader_stale_after = Some(Duration::from_secs(60));
        let second = fx.election(200).try_acquire().unwrap();
        assert_eq!(second.pid(), 200);
    }

    #[test]
    fn refresh_keeps_leader_fresh() {
        let mut fx = Fixture::new();
        fx.config.leader_stale_after = Some(Duration::from_secs(60));
        let leader = fx.election(100);
        let mut guard = leader.try_acquire().unwrap();

        fx.clock.advance(50_000);
        assert!(leader.refresh(&mut guard).unwrap());
        fx.clock.advance(50_000);

        assert!(fx.election(200).try_acquire().is_err());
        assert_eq!(leader.current().unwrap().unwrap().acquired_at, 51_000);
    }

    #[test]
    fn stalled_leader_does_not_overwrite_its_successor() {
        let mut fx = Fixture::new();
        fx.config.leader_stale_after = Some(Duration::from_secs(60));
        let old = fx.election(100);
        let mut stalled = old.try_acquire().unwrap();

        fx.clock.advance(120_000);
        let successor = fx.election(200);
        let mut current = successor.try_acquire().unwrap();

        assert!(!old.refresh(&mut stalled).unwrap());
        let marker = successor.current().unwrap().unwrap();
        assert_eq!(marker.pid, 200);
        assert_eq!(marker.acquired_at, 121_000);
        assert!(successor.refresh(&mut current).unwrap());
    }

    #[test]
    fn refresh_rejects_a_same_pid_marker_it_did_not_write() {
        let fx = Fixture::new();
        let election = fx.election(100);
        let mut guard = election.try_acquire().unwrap();

        // A later process that reused pid 100 took the marker over
        let replacement = LeaderMarker {
            pid: 100,
            acquired_at: 9_999,
        };
        crate::document::write_json(election.marker_path(), &replacement).unwrap();

        assert!(!election.refresh(&mut guard).unwrap());
        assert_eq!(election.current().unwrap().unwrap(), replacement);
        assert_eq!(guard.acquired_at(), 1_000);
    }

    #[test]
    fn supervisor_walks_the_state_machine() {
        let fx = Fixture::new();
        let mut leader = Supervisor::new(fx.election(100));
        assert_eq!(leader.state(), WatchState::Idle);

        let mut guard = leader.start().unwrap();
        assert_eq!(leader.state(), WatchState::Leading);

        let mut rival = Supervisor::new(fx.election(200));
        assert!(rival.start().is_err());
        assert_eq!(rival.state(), WatchState::Rejected);

        assert!(leader.tick(&mut guard).unwrap());
        leader.stop(guard).unwrap();
        assert_eq!(leader.state(), WatchState::Idle);
        assert!(!leader.election().marker_path().exists());

        assert!(rival.start().is_ok());
        assert_eq!(rival.state(), WatchState::Leading);
    }

    #[test]
    fn report_reflects_leader_liveness() {
        let fx = Fixture::new();
        let observer = fx.election(1);

        let report = watch_report(&observer, &fx.config, 1_000).unwrap();
        assert!(report.leader.is_none());
        assert!(!report.leader_alive);
        assert!(report.status.is_none());

        let guard = fx.election(100).try_acquire().unwrap();
        let report = watch_report(&observer, &fx.config, 1_000).unwrap();
        assert!(report.leader_alive);

        fx.procs.kill(100);
        let report = watch_report(&observer, &fx.config, 1_000).unwrap();
        assert_eq!(report.leader.map(|m| m.pid), Some(100));
        assert!(!report.leader_alive);
        drop(guard);
    }
}
