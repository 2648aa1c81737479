//! Error handling tests for the record store.

use parking_lot::Mutex;
use record_store::{
    ChangeAction, Fields, FnValidator, MemoryArea, PersistenceError, Record, RecordStore,
    Registry, RegistryConfig, Rules, StoreConfig, StoreError, StoreEvent, StoreSnapshot,
    Timestamp, ValidationError, Violation, ViolationKind,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn fields(value: Value) -> Fields {
    value.as_object().cloned().unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn test_store() -> RecordStore {
    RecordStore::open("items", Arc::new(MemoryArea::new()), StoreConfig::default())
}

fn validated_store(rules: Rules) -> RecordStore {
    test_store().with_validator(Arc::new(rules))
}

fn counting_listener(store: &RecordStore) -> (Arc<AtomicUsize>, record_store::Subscription) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let sub = store.subscribe(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    (count, sub)
}

// --- Validation Errors ---

#[test]
fn test_validation_lists_every_violation() {
    let store = validated_store(Rules::new().required(["a", "b"]).one_of("kind", ["x", "y"]));

    let err = store.create(fields(json!({"kind": "z"}))).unwrap_err();
    let StoreError::Validation(v) = err else {
        panic!("expected validation error");
    };
    assert_eq!(v.fields().collect::<Vec<_>>(), vec!["a", "b", "kind"]);
    assert_eq!(v.violations()[0].kind, ViolationKind::Missing);
    assert_eq!(v.violations()[2].kind, ViolationKind::Format);
}

#[test]
fn test_validation_failure_changes_nothing() {
    let store = validated_store(Rules::new().required(["name"]));
    let (events, _sub) = counting_listener(&store);

    let ok = store.create(fields(json!({"name": "kept"}))).unwrap();
    let before = store.get_all();

    assert!(store.create(fields(json!({"name": "  "}))).is_err());
    assert!(store.update(&ok.id, fields(json!({"name": null}))).is_err());
    assert!(store
        .bulk_update(vec![Record {
            fields: fields(json!({})),
            ..ok.clone()
        }])
        .is_err());

    assert_eq!(store.get_all(), before);
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn test_zero_and_false_count_as_present() {
    let store = validated_store(Rules::new().required(["qty", "done"]));
    assert!(store.create(fields(json!({"qty": 0, "done": false}))).is_ok());
}

#[test]
fn test_validation_disabled_by_config() {
    let store = RecordStore::open(
        "items",
        Arc::new(MemoryArea::new()),
        StoreConfig {
            validate: false,
            ..Default::default()
        },
    )
    .with_validator(Arc::new(Rules::new().required(["name"])));

    assert!(store.create(fields(json!({}))).is_ok());
}

#[test]
fn test_custom_validator() {
    let store = test_store().with_validator(Arc::new(FnValidator(|record: &Record| {
        match record.get("qty").and_then(Value::as_i64) {
            Some(q) if q > 100 => Err(ValidationError::single(Violation::format(
                "qty",
                "at most 100",
            ))),
            _ => Ok(()),
        }
    })));

    assert!(store.create(fields(json!({"qty": 5}))).is_ok());
    let err = store.create(fields(json!({"qty": 500}))).unwrap_err();
    assert_eq!(err.to_string(), "Validation failed: at most 100");
}

// --- Record Errors ---

#[test]
fn test_update_missing_record() {
    let store = test_store();
    let (events, _sub) = counting_listener(&store);

    let err = store.update("nope", fields(json!({"x": 1}))).unwrap_err();
    assert!(matches!(err, StoreError::RecordNotFound(ref id) if id.as_str() == "nope"));
    assert_eq!(events.load(Ordering::SeqCst), 0);
}

#[test]
fn test_delete_missing_record_is_quiet() {
    let store = test_store();
    let (events, _sub) = counting_listener(&store);

    assert!(!store.delete("nope").unwrap());
    assert_eq!(events.load(Ordering::SeqCst), 0);
}

#[test]
fn test_duplicate_requested_id() {
    let store = test_store();
    store.create(fields(json!({"id": 7, "n": 1}))).unwrap();

    let err = store.create(fields(json!({"id": "7", "n": 2}))).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId(_)));
    assert_eq!(store.get_by_id("7").unwrap().get("n"), Some(&json!(1)));
}

#[test]
fn test_non_scalar_requested_id() {
    let store = test_store();
    let err = store.create(fields(json!({"id": [1, 2]}))).unwrap_err();
    assert!(matches!(err, StoreError::Validation(ref v) if v.names("id")));
}

#[test]
fn test_bulk_update_duplicate_ids() {
    let store = test_store();
    let a = store.create(fields(json!({"n": 1}))).unwrap();

    let err = store.bulk_update(vec![a.clone(), a.clone()]).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateId(_)));
    assert_eq!(store.get_all(), vec![a]);
}

// --- Import Errors ---

#[test]
fn test_import_rejects_malformed_snapshots() {
    let store = test_store();
    store.create(fields(json!({"n": 1}))).unwrap();

    for bad in [
        json!(null),
        json!([1, 2]),
        json!({"storeName": "items"}),
        json!({"data": "nope"}),
        json!({"data": [{"n": 1}]}),
    ] {
        let err = store.import_value(&bad, false).unwrap_err();
        assert!(matches!(err, StoreError::ImportFormat(_)), "{}", bad);
    }
    assert_eq!(store.count(), 1);
}

#[test]
fn test_import_duplicate_ids_rejected() {
    let store = test_store();
    let now = Timestamp::now();
    let record = Record {
        id: "a".into(),
        created_at: now,
        updated_at: now,
        fields: Fields::new(),
    };
    let snapshot = StoreSnapshot {
        store_name: "items".into(),
        version: "1.0".into(),
        exported_at: now,
        records: vec![record.clone(), record],
    };

    let err = store.import(&snapshot, false).unwrap_err();
    assert!(matches!(err, StoreError::ImportFormat(_)));
    assert_eq!(store.count(), 0);
}

#[test]
fn test_import_is_all_or_nothing() {
    let store = validated_store(Rules::new().required(["name"]));
    store.create(fields(json!({"id": "keep", "name": "kept"}))).unwrap();

    let snapshot = json!({"data": [
        {"id": "a", "name": "ok", "createdAt": "2024-01-01T00:00:00.000Z", "updatedAt": "2024-01-01T00:00:00.000Z"},
        {"id": "b", "createdAt": "2024-01-01T00:00:00.000Z", "updatedAt": "2024-01-01T00:00:00.000Z"}
    ]});

    for merge in [false, true] {
        let err = store.import_value(&snapshot, merge).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        let ids: Vec<_> = store.get_all().into_iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec!["keep".to_string()]);
    }
}

#[test]
fn test_registry_import_rejects_bad_entry_up_front() {
    let registry = Registry::new(Arc::new(MemoryArea::new()), RegistryConfig::default());
    let items = registry.open_store("items", None);
    items.create(fields(json!({"n": 1}))).unwrap();

    let snapshot = json!({"storages": {
        "items": {"data": []},
        "other": {"data": 5}
    }});
    let err = registry.import_value(&snapshot, false).unwrap_err();
    assert!(matches!(err, StoreError::ImportFormat(_)));
    assert_eq!(items.count(), 1);
}

// --- Persistence Errors ---

#[test]
fn test_quota_exceeded_keeps_memory_and_skips_notify() {
    init_tracing();
    let area = Arc::new(MemoryArea::with_quota(300));
    let store = RecordStore::open("items", area, StoreConfig::default());
    let (events, _sub) = counting_listener(&store);

    store.create(fields(json!({"n": 1}))).unwrap();
    let err = store
        .create(fields(json!({"blob": "x".repeat(400)})))
        .unwrap_err();

    assert!(err.is_persistence());
    assert!(matches!(
        err,
        StoreError::Persistence(PersistenceError::QuotaExceeded { limit: 300, .. })
    ));
    assert_eq!(store.count(), 2);
    assert!(store.is_dirty());
    assert_eq!(events.load(Ordering::SeqCst), 1);
}

#[test]
fn test_delete_blocked_leaves_record() {
    let registry = Registry::new(Arc::new(MemoryArea::new()), RegistryConfig::default());
    let owners = registry.open_store("owners", None);
    let pets = registry.open_store("pets", None);
    let guard = registry.reference_guard("pets", "ownerId").unwrap();

    let owner = owners.create(fields(json!({"name": "Ada"}))).unwrap();
    pets.create(fields(json!({"name": "Rex", "ownerId": owner.id.as_str()})))
        .unwrap();

    let err = owners.delete_guarded(&owner.id, &[&guard]).unwrap_err();
    match err {
        StoreError::DeleteBlocked { store, id, reason } => {
            assert_eq!(store, "owners");
            assert_eq!(id, owner.id);
            assert!(reason.contains("pets"));
        }
        other => panic!("expected DeleteBlocked, got {:?}", other),
    }
    assert!(owners.exists(&owner.id));
    assert!(registry.reference_guard("vets", "ownerId").is_none());
}

// --- Listener Errors ---

#[test]
fn test_failing_listener_does_not_affect_others() {
    init_tracing();
    let store = test_store();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let _bad = store.subscribe(|_| Err("listener failed".into()));
    let _panics = store.subscribe(|_| panic!("listener panicked"));
    let sink = seen.clone();
    let _good = store.subscribe(move |event| {
        sink.lock().push(event.action);
        Ok(())
    });

    let record = store.create(fields(json!({"n": 1}))).unwrap();
    store.delete(&record.id).unwrap();

    assert_eq!(*seen.lock(), vec![ChangeAction::Create, ChangeAction::Delete]);
    assert_eq!(store.listener_count(), 3);
}

#[test]
fn test_slow_channel_subscriber_is_dropped() {
    let store = test_store();
    let handle = store.subscribe_channel(1);

    store.create(fields(json!({"n": 1}))).unwrap();
    store.create(fields(json!({"n": 2}))).unwrap();
    store.create(fields(json!({"n": 3}))).unwrap();

    let events = handle.drain();
    assert!(matches!(events[0], StoreEvent::Change(_)));
    assert_eq!(store.listener_count(), 0);
}
