mod support;

use std::sync::Barrier;
use std::thread;

use activestore::{CasOutcome, Record, SpinOutcome, StoreError, WriteOutcome, codec};
use serde_json::{Value, json};
use support::{Item, increment, item, memory_store, no_backoff};

fn must_not_run(_: &mut Record<Item>) {
    panic!("transform must not run");
}

#[test]
fn create_if_absent_then_find_expected_transformed_record() {
    let (store, _) = memory_store();
    let outcome = store
        .create_if_absent("item1", None, |record| {
            record.fields.a1 = Some("foo".to_string());
        })
        .expect("create should run");
    assert_eq!(outcome, WriteOutcome::Success);

    let found = store
        .find("item1")
        .expect("find should run")
        .expect("item1 should exist");
    assert_eq!(found, item("item1", "foo"));
}

#[test]
fn create_if_absent_unset_field_expected_absent_from_stored_value() {
    let (store, _) = memory_store();
    store
        .create_if_absent("item1", Some(0), |record| {
            record.fields.a1 = Some("foo".to_string());
        })
        .expect("create should run");

    let raw = store
        .connection()
        .expect("connection should build")
        .get_raw("item1")
        .expect("get should run")
        .expect("item1 should be stored");
    let Value::Object(stored) = codec::decode(&raw).expect("stored bytes should decode") else {
        panic!("stored value should be an object");
    };

    let mut keys: Vec<&str> = stored.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["a1", "created_at", "id"]);
    assert_eq!(stored["id"], json!("item1"));
    assert_eq!(stored["a1"], json!("foo"));
    assert!(stored["created_at"].is_u64());
}

#[test]
fn create_if_absent_existing_key_expected_conflict_and_value_kept() {
    let (store, _) = memory_store();
    store
        .create(item("item1", "first"))
        .expect("create should run");

    let outcome = store
        .create_if_absent("item1", None, |record| {
            record.fields.a1 = Some("second".to_string());
        })
        .expect("create should run");

    assert_eq!(outcome, WriteOutcome::Conflict);
    let found = store.find("item1").expect("find").expect("item1 exists");
    assert_eq!(found.fields.a1.as_deref(), Some("first"));
}

#[test]
fn conditional_update_without_contention_expected_success() {
    let (store, _) = memory_store();
    store.create(item("item1", "foo")).expect("create should run");

    let outcome = store
        .conditional_update("item1", None, |record| {
            assert_eq!(record.fields.a1.as_deref(), Some("foo"));
            record.fields.a2 = Some("bar".to_string());
        })
        .expect("update should run");

    assert_eq!(outcome, CasOutcome::Success);
    let found = store.find("item1").expect("find").expect("item1 exists");
    assert_eq!(found.fields.a1.as_deref(), Some("foo"));
    assert_eq!(found.fields.a2.as_deref(), Some("bar"));
}

#[test]
fn conditional_update_concurrent_write_expected_conflict_and_other_value_kept() {
    let (store, _) = memory_store();
    store.create(item("item1", "foo")).expect("create should run");

    let outcome = store
        .conditional_update("item1", None, |record| {
            store
                .save(&item("item1", "concurrent"), None)
                .expect("concurrent save should run");
            record.fields.a1 = Some("mine".to_string());
        })
        .expect("update should run");

    assert_eq!(outcome, CasOutcome::Conflict);
    let found = store.find("item1").expect("find").expect("item1 exists");
    assert_eq!(found.fields.a1.as_deref(), Some("concurrent"));
}

#[test]
fn conditional_update_missing_record_expected_not_found_without_transform() {
    let (store, _) = memory_store();
    let outcome = store
        .conditional_update("missing", None, |_| panic!("transform must not run"))
        .expect("update should run");
    assert_eq!(outcome, CasOutcome::NotFound);
    assert_eq!(store.find("missing").expect("find should run"), None);
}

#[test]
fn conditional_update_keeps_created_at_expected_unchanged() {
    let (store, _) = memory_store();
    let mut record = item("item1", "foo");
    record.created_at = 1_234;
    store.create(record).expect("create should run");

    store
        .conditional_update("item1", None, increment)
        .expect("update should run");

    let found = store.find("item1").expect("find").expect("item1 exists");
    assert_eq!(found.created_at, 1_234);
    assert_eq!(found.fields.count, Some(1));
}

#[test]
fn conditional_update_or_create_missing_record_expected_transform_once() {
    let (store, _) = memory_store();
    let mut calls = 0;

    let outcome = store
        .conditional_update_or_create("item1", None, |record| {
            calls += 1;
            increment(record);
        })
        .expect("update should run");

    assert_eq!(outcome, WriteOutcome::Success);
    assert_eq!(calls, 1);
    let found = store.find("item1").expect("find").expect("item1 exists");
    assert_eq!(found.fields.count, Some(1));
}

#[test]
fn conditional_update_or_create_existing_record_expected_transform_once() {
    let (store, _) = memory_store();
    store.create(item("item1", "foo")).expect("create should run");
    let mut calls = 0;

    let outcome = store
        .conditional_update_or_create("item1", None, |record| {
            calls += 1;
            increment(record);
        })
        .expect("update should run");

    assert_eq!(outcome, WriteOutcome::Success);
    assert_eq!(calls, 1);
}

#[test]
fn conditional_update_or_create_losing_both_races_expected_conflict_and_transform_once() {
    let (store, _) = memory_store();
    let mut calls = 0;

    let outcome = store
        .conditional_update_or_create("item1", None, |record| {
            calls += 1;
            store
                .save(&item("item1", "concurrent"), None)
                .expect("concurrent save should run");
            record.fields.a1 = Some("mine".to_string());
        })
        .expect("update should run");

    assert_eq!(outcome, WriteOutcome::Conflict);
    assert_eq!(calls, 1);
    let found = store.find("item1").expect("find").expect("item1 exists");
    assert_eq!(found.fields.a1.as_deref(), Some("concurrent"));
}

#[test]
fn spin_until_success_two_injected_conflicts_expected_third_attempt_wins() {
    let (store, _) = memory_store();
    let mut calls = 0;

    let outcome = store
        .spin_until_success("item1", None, |record| {
            calls += 1;
            if calls <= 2 {
                store
                    .save(&item("item1", &format!("interloper-{calls}")), None)
                    .expect("interfering save should run");
            }
            record.fields.a2 = Some("winner".to_string());
        })
        .expect("spin should run");

    assert_eq!(outcome, SpinOutcome::Success { attempts: 3 });
    assert_eq!(calls, 3);
    let found = store.find("item1").expect("find").expect("item1 exists");
    assert_eq!(found.fields.a1.as_deref(), Some("interloper-2"));
    assert_eq!(found.fields.a2.as_deref(), Some("winner"));
}

#[test]
fn spin_until_success_bounded_policy_expected_exhausted() {
    let (store, _) = memory_store();
    store.create(item("item1", "foo")).expect("create should run");
    let mut calls = 0;

    let outcome = store
        .spin_until_success_with(&no_backoff(3), "item1", None, |record| {
            calls += 1;
            store
                .save(&item("item1", "always-first"), None)
                .expect("interfering save should run");
            increment(record);
        })
        .expect("spin should run");

    assert_eq!(outcome, SpinOutcome::Exhausted { attempts: 3 });
    assert_eq!(calls, 3);
    let found = store.find("item1").expect("find").expect("item1 exists");
    assert_eq!(found.fields.count, None);
}

#[test]
fn create_if_absent_racing_threads_expected_one_success_one_conflict() {
    let (store, _) = memory_store();
    let barrier = Barrier::new(2);

    let outcomes: Vec<(&str, WriteOutcome)> = thread::scope(|scope| {
        let handles: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|name| {
                let store = &store;
                let barrier = &barrier;
                scope.spawn(move || {
                    let outcome = store
                        .create_if_absent("contested", None, |record| {
                            barrier.wait();
                            record.fields.a1 = Some(name.to_string());
                        })
                        .expect("create should run");
                    (name, outcome)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread should not panic"))
            .collect()
    });

    let winners: Vec<&str> = outcomes
        .iter()
        .filter(|(_, outcome)| *outcome == WriteOutcome::Success)
        .map(|(name, _)| *name)
        .collect();
    assert_eq!(winners.len(), 1);
    assert!(
        outcomes
            .iter()
            .any(|(_, outcome)| *outcome == WriteOutcome::Conflict)
    );

    let found = store
        .find("contested")
        .expect("find")
        .expect("contested should exist");
    assert_eq!(found.fields.a1.as_deref(), Some(winners[0]));
}

#[test]
fn spin_until_success_concurrent_counters_expected_no_lost_increments() {
    let (store, _) = memory_store();
    let threads = 4;
    let per_thread = 25;

    thread::scope(|scope| {
        for _ in 0..threads {
            let store = &store;
            scope.spawn(move || {
                for _ in 0..per_thread {
                    let outcome = store
                        .spin_until_success("counter", None, increment)
                        .expect("spin should run");
                    assert!(outcome.is_success());
                }
            });
        }
    });

    let found = store.find("counter").expect("find").expect("counter exists");
    assert_eq!(found.fields.count, Some(threads * per_thread));
}

#[test]
fn invalid_keys_expected_rejected_before_backend_and_transform() {
    let (store, backend) = memory_store();
    let long = "k".repeat(251);

    for id in ["", "  ", long.as_str()] {
        assert!(matches!(
            store.conditional_update(id, None, must_not_run),
            Err(StoreError::KeyValidation(_))
        ));
        assert!(matches!(
            store.conditional_update_or_create(id, None, must_not_run),
            Err(StoreError::KeyValidation(_))
        ));
        assert!(matches!(
            store.create_if_absent(id, None, must_not_run),
            Err(StoreError::KeyValidation(_))
        ));
        assert!(matches!(
            store.spin_until_success(id, None, must_not_run),
            Err(StoreError::KeyValidation(_))
        ));
    }

    assert_eq!(backend.operations(), 0);
    assert_eq!(backend.connects(), 0);
}

#[test]
fn unreachable_backend_expected_error_not_outcome() {
    let (store, backend) = memory_store();
    backend.set_available(false);

    assert!(matches!(
        store.conditional_update_or_create("item1", None, increment),
        Err(StoreError::BackendUnreachable(_))
    ));

    backend.set_available(true);
    assert_eq!(
        store
            .conditional_update_or_create("item1", None, increment)
            .expect("update should run once backend is back"),
        WriteOutcome::Success
    );
}

#[test]
fn corrupted_stored_value_expected_data_corruption_error() {
    let (store, _) = memory_store();
    store
        .connection()
        .expect("connection should build")
        .set_raw("item1", b"{not json", 0)
        .expect("raw set should run");

    assert!(matches!(
        store.conditional_update("item1", None, increment),
        Err(StoreError::DataCorruption(_))
    ));
    assert!(matches!(
        store.find("item1"),
        Err(StoreError::DataCorruption(_))
    ));
}
