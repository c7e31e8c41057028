//! Transaction semantics: deferred notification, commit diff, rollback

use std::sync::Arc;

use crate::common::*;

fn peer_directory() -> Arc<MemoryDeviceDirectory> {
    let directory = Arc::new(MemoryDeviceDirectory::with_local_id(LOCAL_DEVICE));
    directory.register("net-peer", "peer");
    directory
}

#[test]
fn commit_overwrite_of_existing_key_is_one_update() {
    let store = memory_store();
    store.put("a", "v0").unwrap();
    let recorder = subscribe(&store, SubscribeType::Local);

    store.start_transaction().unwrap();
    store.put("a", "v1").unwrap();
    store.put("a", "v2").unwrap();
    store.flush_notifications();
    assert_eq!(recorder.count(), 0);

    store.commit().unwrap();
    store.flush_notifications();

    let seen = recorder.notifications();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].update_entries, vec![entry("a", "v2")]);
    assert!(seen[0].insert_entries.is_empty());
}

#[test]
fn commit_of_new_key_is_one_insert() {
    let store = memory_store();
    let recorder = subscribe(&store, SubscribeType::Local);

    store.start_transaction().unwrap();
    store.put("a", "v1").unwrap();
    store.put("a", "v2").unwrap();
    store.commit().unwrap();
    store.flush_notifications();

    let seen = recorder.notifications();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].insert_entries, vec![entry("a", "v2")]);
}

#[test]
fn commit_classifies_against_transaction_start() {
    let store = memory_store();
    store
        .put_batch(&[entry("kept", "1"), entry("restored", "2"), entry("gone", "3")])
        .unwrap();
    let recorder = subscribe(&store, SubscribeType::Local);

    store.start_transaction().unwrap();
    store.put("restored", "changed").unwrap();
    store.put("restored", "2").unwrap();
    store.delete("gone").unwrap();
    store.put("temp", "x").unwrap();
    store.delete("temp").unwrap();
    store.put("fresh", "y").unwrap();
    store.commit().unwrap();
    store.flush_notifications();

    let seen = recorder.notifications();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].update_entries, vec![entry("restored", "2")]);
    assert_eq!(seen[0].delete_entries, vec![entry("gone", "3")]);
    assert_eq!(seen[0].insert_entries, vec![entry("fresh", "y")]);
}

#[test]
fn reads_inside_transaction_see_writes() {
    let store = memory_store();
    store.start_transaction().unwrap();
    store.put("a", "1").unwrap();
    assert_eq!(store.get("a").unwrap(), Value::from("1"));
    assert!(store.in_transaction());
    store.commit().unwrap();
    assert!(!store.in_transaction());
}

#[test]
fn rollback_restores_and_notifies_nothing() {
    let store = memory_store();
    store
        .put_batch(&[entry("a", "1"), entry("b", "2")])
        .unwrap();
    let before = store.get_entries("").unwrap();
    let recorder = subscribe(&store, SubscribeType::All);

    store.start_transaction().unwrap();
    store.put("a", "changed").unwrap();
    store.delete("b").unwrap();
    store.put("c", "new").unwrap();
    store.clear().unwrap();
    store.put("d", "late").unwrap();
    store.rollback().unwrap();
    store.flush_notifications();

    assert_eq!(store.get_entries("").unwrap(), before);
    assert_eq!(recorder.count(), 0);
}

#[test]
fn transaction_state_errors() {
    let store = memory_store();
    assert!(store.commit().unwrap_err().is_invalid_argument());
    assert!(store.rollback().unwrap_err().is_invalid_argument());

    store.start_transaction().unwrap();
    assert!(store.start_transaction().unwrap_err().is_invalid_argument());
    store.rollback().unwrap();

    // Back to idle; a new transaction may start
    store.start_transaction().unwrap();
    store.commit().unwrap();
}

#[test]
fn empty_commit_notifies_nothing() {
    let store = memory_store();
    let recorder = subscribe(&store, SubscribeType::All);
    store.start_transaction().unwrap();
    store.delete("absent").unwrap();
    store.commit().unwrap();
    store.flush_notifications();
    assert_eq!(recorder.count(), 0);
}

#[test]
fn remote_batches_bypass_the_transaction() {
    let store = memory_store();
    let local = subscribe(&store, SubscribeType::Local);
    let remote = subscribe(&store, SubscribeType::Remote);

    store.start_transaction().unwrap();
    store.put("mine", "1").unwrap();
    store
        .apply_remote_batch("peer", &[entry("theirs", "2")], &[])
        .unwrap();
    store.flush_notifications();
    assert_eq!(local.count(), 0);
    assert_eq!(remote.count(), 1);

    store.rollback().unwrap();
    assert_eq!(store.get("mine"), Err(Status::KeyNotFound));
    assert_eq!(store.get("theirs").unwrap(), Value::from("2"));
}

#[test]
fn rollback_keeps_owner_and_write_time_of_remote_entries() {
    let backend = Arc::new(MemoryBackend::new());
    let store = store_on_backend(Arc::clone(&backend), Options::in_memory(), peer_directory());

    store
        .apply_remote_batch("peer", &[entry("k", "remote")], &[])
        .unwrap();
    store.put("mine", "1").unwrap();
    let original = backend.get(b"k").unwrap().unwrap();
    let by_write_time = store
        .get_entries_with_query_str("^OrderByWriteTime ^IS_ASC")
        .unwrap();

    store.start_transaction().unwrap();
    store.put("k", "local").unwrap();
    store.delete("mine").unwrap();
    store.rollback().unwrap();

    assert_eq!(backend.get(b"k").unwrap(), Some(original));
    assert_eq!(
        store
            .get_entries_with_query_str("^OrderByWriteTime ^IS_ASC")
            .unwrap(),
        by_write_time
    );

    store.remove_device_data("net-peer").unwrap();
    assert_eq!(store.get("k"), Err(Status::KeyNotFound));
    assert_eq!(store.get("mine").unwrap(), Value::from("1"));
}

#[test]
fn failed_rollback_keeps_transaction_open() {
    let backend = Arc::new(MemoryBackend::new());
    let store = store_on_backend(Arc::clone(&backend), Options::in_memory(), peer_directory());
    store.put("k", "before").unwrap();

    store.start_transaction().unwrap();
    store.put("k", "txn").unwrap();
    backend.inject_write_failure(true);
    assert!(matches!(store.rollback(), Err(Status::Error(_))));
    assert!(store.in_transaction());
    assert_eq!(store.get("k").unwrap(), Value::from("txn"));

    backend.inject_write_failure(false);
    store.rollback().unwrap();
    assert!(!store.in_transaction());
    assert_eq!(store.get("k").unwrap(), Value::from("before"));
}

#[test]
fn failed_write_inside_transaction_can_still_commit() {
    let backend = Arc::new(MemoryBackend::new());
    let store = store_on_backend(Arc::clone(&backend), Options::in_memory(), peer_directory());
    let recorder = subscribe(&store, SubscribeType::Local);

    store.start_transaction().unwrap();
    store.put("a", "1").unwrap();
    backend.inject_write_failure(true);
    assert!(store.put("b", "2").is_err());
    backend.inject_write_failure(false);
    store.commit().unwrap();
    store.flush_notifications();

    let seen = recorder.notifications();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].insert_entries, vec![entry("a", "1")]);
}
