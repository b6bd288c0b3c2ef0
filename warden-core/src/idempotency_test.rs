#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use crate::clock::ManualClock;
    use crate::document::JsonDocument;
    use crate::events::{Appended, EventSink, EventSource, JsonlEventStore};
    use crate::idempotency::{
        DocumentHistory, GuardOutcome, IdempotencyGuard, ResponseDoc, ResponseHistory, Trigger,
        derive_key,
    };
    use crate::mutex::{FileToken, RetryPolicy, token_path_for};
    use crate::types::{KIND_REACTION, NewEvent};
    use crate::WardenError;

    type History = DocumentHistory<JsonDocument<ResponseDoc>>;

    fn quick() -> RetryPolicy {
        RetryPolicy {
            attempts: 2,
            backoff: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    fn history(dir: &tempfile::TempDir) -> History {
        DocumentHistory::new(JsonDocument::new(dir.path().join("responses.json"), quick()))
    }

    fn guard(dir: &tempfile::TempDir) -> IdempotencyGuard<History> {
        IdempotencyGuard::new(history(dir)).with_clock(ManualClock::new(42))
    }

    fn ledger(dir: &tempfile::TempDir) -> JsonlEventStore {
        JsonlEventStore::new(dir.path().join("events.jsonl"), quick())
    }

    /// A reaction that was emitted somewhere the ledger does not see.
    fn detached(id: &str, key: &str) -> crate::Result<Appended> {
        let mut reaction = NewEvent::reaction("watcher", "ok", None, key);
        reaction.id = id.to_string();
        Ok(Appended::New(reaction.into_event(1, 0)))
    }

    #[test]
    fn keys_are_deterministic() {
        let event = NewEvent::message("alice", "hi").into_event(1, 0);
        assert_eq!(
            derive_key(Trigger::Observed(&event)),
            format!("response-to-{}", event.id)
        );
        assert_eq!(
            derive_key(Trigger::Observed(&event)),
            derive_key(Trigger::Observed(&event.clone()))
        );
        assert_eq!(derive_key(Trigger::Direct("deploy-42")), "deploy-42");
    }

    #[test]
    fn same_event_twice_emits_once() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(&dir);
        let events = ledger(&dir);
        let event = NewEvent::message("alice", "please review").into_event(1, 0);
        let emitted = Cell::new(0);

        let first = guard
            .run(Trigger::Observed(&event), &events, |key| {
                emitted.set(emitted.get() + 1);
                detached("r1", key)
            })
            .unwrap();
        let second = guard
            .run(Trigger::Observed(&event), &events, |key| {
                emitted.set(emitted.get() + 1);
                detached("r2", key)
            })
            .unwrap();

        let key = format!("response-to-{}", event.id);
        assert_eq!(
            first,
            GuardOutcome::Emitted {
                key: key.clone(),
                reaction_id: "r1".to_string()
            }
        );
        assert_eq!(second, GuardOutcome::Suppressed { key });
        assert_eq!(emitted.get(), 1);
        assert_eq!(guard.history().records().unwrap().len(), 1);
    }

    #[test]
    fn emit_receives_the_derived_key() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(&dir);
        let seen = std::cell::RefCell::new(String::new());

        guard
            .run(Trigger::Direct("job-7"), &ledger(&dir), |key| {
                *seen.borrow_mut() = key.to_string();
                detached("r", key)
            })
            .unwrap();
        assert_eq!(*seen.borrow(), "job-7");
    }

    #[test]
    fn history_survives_a_new_guard() {
        let dir = tempfile::tempdir().unwrap();
        let events = ledger(&dir);
        guard(&dir)
            .run(Trigger::Direct("k"), &events, |key| detached("r", key))
            .unwrap();

        // A restarted process sees the earlier record
        let restarted = guard(&dir);
        assert!(restarted.has_responded("k").unwrap());
        let outcome = restarted
            .run(Trigger::Direct("k"), &events, |_| panic!("must not emit twice"))
            .unwrap();
        assert!(matches!(outcome, GuardOutcome::Suppressed { .. }));
    }

    #[test]
    fn failed_emit_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(&dir);
        let events = ledger(&dir);

        let err = guard
            .run(Trigger::Direct("k"), &events, |_| {
                Err(WardenError::Reaction("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, WardenError::Reaction(_)));
        assert!(!guard.has_responded("k").unwrap());

        let outcome = guard
            .run(Trigger::Direct("k"), &events, |key| detached("r", key))
            .unwrap();
        assert!(matches!(outcome, GuardOutcome::Emitted { .. }));
    }

    #[test]
    fn unrecorded_reaction_in_the_stream_is_not_repeated() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(&dir);
        let events = ledger(&dir);
        let earlier = events
            .append(NewEvent::reaction("watcher", "done", None, "deploy-9"))
            .unwrap();

        let outcome = guard
            .run(Trigger::Direct("deploy-9"), &events, |_| panic!("must not emit twice"))
            .unwrap();

        assert_eq!(
            outcome,
            GuardOutcome::Suppressed {
                key: "deploy-9".to_string()
            }
        );
        // The missing record is written from the stream
        let records = guard.history().records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reaction_id, earlier.id);
    }

    #[test]
    fn failed_record_after_emit_does_not_emit_again() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(&dir);
        let events = ledger(&dir);
        let emit = |key: &str| {
            events.append_once(NewEvent::reaction("watcher", "done", None, key))
        };

        let held = FileToken::try_create(
            &token_path_for(&dir.path().join("responses.json")),
            Duration::from_secs(30),
        )
        .unwrap()
        .unwrap();
        let err = guard.run(Trigger::Direct("k"), &events, emit).unwrap_err();
        assert!(matches!(err, WardenError::MutexTimeout { .. }), "{err}");
        drop(held);

        let outcome = guard.run(Trigger::Direct("k"), &events, emit).unwrap();
        assert!(matches!(outcome, GuardOutcome::Suppressed { .. }));

        let reactions: Vec<_> = events
            .poll(0)
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == KIND_REACTION)
            .collect();
        assert_eq!(reactions.len(), 1);
        assert!(guard.has_responded("k").unwrap());
    }

    #[test]
    fn losing_an_append_race_counts_as_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(&dir);
        let events = ledger(&dir);
        let winner = NewEvent::reaction("other", "first", None, "k").into_event(7, 0);

        let outcome = guard
            .run(Trigger::Direct("k"), &events, |_| {
                Ok(Appended::Existing(winner.clone()))
            })
            .unwrap();

        assert!(matches!(outcome, GuardOutcome::Suppressed { .. }));
        assert_eq!(guard.history().records().unwrap()[0].reaction_id, winner.id);
    }

    #[test]
    fn record_response_keeps_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);

        assert!(history.record_response("k", "first", 1).unwrap());
        assert!(!history.record_response("k", "second", 2).unwrap());

        let records = history.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reaction_id, "first");
        assert_eq!(records[0].recorded_at, 1);
    }

    #[test]
    fn record_uses_guard_clock() {
        let dir = tempfile::tempdir().unwrap();
        let guard = guard(&dir);
        guard.record_response("k", "r").unwrap();
        assert_eq!(guard.history().records().unwrap()[0].recorded_at, 42);
    }
}
