//! Change notification classification, scoping and delivery

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::common::*;

// ============================================================================
// Classification
// ============================================================================

#[test]
fn put_batch_of_new_keys_is_one_insert_notification() {
    let store = memory_store();
    let recorder = subscribe(&store, SubscribeType::Local);

    store
        .put_batch(&[entry("a", "1"), entry("b", "2")])
        .unwrap();
    store.flush_notifications();

    let seen = recorder.notifications();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].insert_entries, vec![entry("a", "1"), entry("b", "2")]);
    assert!(seen[0].update_entries.is_empty());
    assert!(seen[0].delete_entries.is_empty());
    assert_eq!(seen[0].device_id, LOCAL_DEVICE);
}

#[test]
fn delete_batch_skips_missing_key() {
    let store = memory_store();
    store
        .put_batch(&[entry("a", "1"), entry("c", "3")])
        .unwrap();
    let recorder = subscribe(&store, SubscribeType::Local);

    store
        .delete_batch(&[Key::from("a"), Key::from("b"), Key::from("c")])
        .unwrap();
    store.flush_notifications();

    let seen = recorder.notifications();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].delete_entries, vec![entry("a", "1"), entry("c", "3")]);
}

#[test]
fn identical_reput_is_an_update() {
    let store = memory_store();
    store.put("k", "v").unwrap();
    let recorder = subscribe(&store, SubscribeType::Local);

    store.put("k", "v").unwrap();
    store.flush_notifications();

    let seen = recorder.notifications();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].update_entries, vec![entry("k", "v")]);
}

#[test]
fn mixed_batch_classification_keeps_call_order() {
    let store = memory_store();
    store
        .put_batch(&[entry("old2", "x"), entry("old1", "y")])
        .unwrap();
    let recorder = subscribe(&store, SubscribeType::Local);

    store
        .put_batch(&[
            entry("new2", "a"),
            entry("old2", "b"),
            entry("new1", "c"),
            entry("old1", "d"),
        ])
        .unwrap();
    store.flush_notifications();

    let seen = recorder.notifications();
    assert_eq!(keys(&seen[0].insert_entries), vec!["new2", "new1"]);
    assert_eq!(keys(&seen[0].update_entries), vec!["old2", "old1"]);
}

// ============================================================================
// Scopes
// ============================================================================

#[test]
fn scope_filters_by_origin() {
    let store = memory_store();
    let local = subscribe(&store, SubscribeType::Local);
    let remote = subscribe(&store, SubscribeType::Remote);
    let all = subscribe(&store, SubscribeType::All);

    store.put("l", "1").unwrap();
    store
        .apply_remote_batch("peer", &[entry("r", "2")], &[])
        .unwrap();
    store.flush_notifications();

    assert_eq!(local.count(), 1);
    assert_eq!(remote.count(), 1);
    assert_eq!(all.count(), 2);
    assert_eq!(remote.notifications()[0].device_id, "peer");
    assert_eq!(keys(&remote.notifications()[0].insert_entries), vec!["r"]);
}

#[test]
fn overlapping_scopes_deliver_once() {
    let store = memory_store();
    let recorder = Recorder::new();
    let observer: Arc<dyn KvStoreObserver> = recorder.clone();
    store
        .subscribe_kv_store(SubscribeType::Local, &observer)
        .unwrap();
    store.subscribe_kv_store(SubscribeType::All, &observer).unwrap();

    store.put("k", "v").unwrap();
    store.flush_notifications();
    assert_eq!(recorder.count(), 1);
}

#[test]
fn subscription_errors() {
    let store = memory_store();
    let recorder = Recorder::new();
    let observer: Arc<dyn KvStoreObserver> = recorder.clone();

    assert_eq!(
        store.unsubscribe_kv_store(SubscribeType::All, &observer),
        Err(Status::NotSubscribed)
    );
    store.subscribe_kv_store(SubscribeType::All, &observer).unwrap();
    assert_eq!(
        store.subscribe_kv_store(SubscribeType::Local, &observer),
        Err(Status::AlreadySubscribed)
    );

    store
        .unsubscribe_kv_store(SubscribeType::Local, &observer)
        .unwrap();
    assert_eq!(
        store.unsubscribe_kv_store(SubscribeType::Local, &observer),
        Err(Status::NotSubscribed)
    );

    // Remote scope is still active
    store.put("k", "v").unwrap();
    store
        .apply_remote_batch("peer", &[entry("r", "v")], &[])
        .unwrap();
    store.flush_notifications();
    assert_eq!(recorder.count(), 1);
}

#[test]
fn observer_limit() {
    let store = memory_store();
    let mut observers = Vec::new();
    for _ in 0..8 {
        observers.push(subscribe(&store, SubscribeType::All));
    }
    let extra: Arc<dyn KvStoreObserver> = Recorder::new();
    assert!(matches!(
        store.subscribe_kv_store(SubscribeType::All, &extra),
        Err(Status::OverMaxSubscribeLimits { .. })
    ));
}

// ============================================================================
// Delivery
// ============================================================================

#[test]
fn notifications_arrive_in_batch_order() {
    let store = memory_store();
    let recorder = subscribe(&store, SubscribeType::Local);

    for i in 0..50 {
        store.put(format!("k{:02}", i), "v").unwrap();
    }
    store.flush_notifications();

    let seen: Vec<String> = recorder
        .notifications()
        .iter()
        .map(|n| keys(&n.insert_entries).remove(0))
        .collect();
    let expected: Vec<String> = (0..50).map(|i| format!("k{:02}", i)).collect();
    assert_eq!(seen, expected);
}

#[test]
fn blocking_observer_does_not_stall_writers() {
    let store = memory_store();
    let gate = Gate::new();
    let observer: Arc<dyn KvStoreObserver> = gate.clone();
    store.subscribe_kv_store(SubscribeType::All, &observer).unwrap();

    let started = Instant::now();
    for i in 0..10 {
        store.put(format!("k{}", i), "v").unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(store.get("k9").unwrap(), Value::from("v"));

    gate.release();
    store.flush_notifications();
    assert_eq!(gate.entered(), 10);
}

#[test]
fn backlog_past_warn_depth_is_delivered_in_full() {
    let store = memory_store();
    let gate = Gate::new();
    let observer: Arc<dyn KvStoreObserver> = gate.clone();
    store.subscribe_kv_store(SubscribeType::Local, &observer).unwrap();
    let recorder = subscribe(&store, SubscribeType::Local);

    let writes = ManagerConfig::default().dispatch_warn_depth + 100;
    for i in 0..writes {
        store.put(format!("k{:05}", i), "v").unwrap();
    }

    gate.release();
    store.flush_notifications();
    assert_eq!(gate.entered(), writes);
    assert_eq!(recorder.count(), writes);
    assert_eq!(
        keys(&recorder.notifications()[writes - 1].insert_entries),
        vec![format!("k{:05}", writes - 1)]
    );
}

#[test]
fn close_delivers_pending_then_drops_observers() {
    let store = memory_store();
    let recorder = subscribe(&store, SubscribeType::All);
    store.put("a", "1").unwrap();
    store.put("b", "2").unwrap();
    store.close();

    assert_eq!(recorder.count(), 2);
    assert!(matches!(store.put("c", "3"), Err(Status::StoreNotOpen(_))));
}
