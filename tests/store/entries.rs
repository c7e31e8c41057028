//! Entry validation and basic mutation/read behaviour

use crate::common::*;

// ============================================================================
// Validation boundaries
// ============================================================================

#[test]
fn key_length_boundary() {
    let store = memory_store();
    assert!(store.put(vec![b'k'; 1024], "v").is_ok());
    let err = store.put(vec![b'k'; 1025], "v").unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn value_size_boundary() {
    let store = memory_store();
    assert!(store.put("big", vec![0u8; 4 * 1024 * 1024]).is_ok());
    let err = store.put("bigger", vec![0u8; 4 * 1024 * 1024 + 1]).unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(store.get("bigger"), Err(Status::KeyNotFound));
}

#[test]
fn empty_and_blank_keys_rejected() {
    let store = memory_store();
    assert!(store.put("", "v").unwrap_err().is_invalid_argument());
    assert!(store.put("  \t", "v").unwrap_err().is_invalid_argument());
    assert!(store.get("").unwrap_err().is_invalid_argument());
    assert!(store.delete(" ").unwrap_err().is_invalid_argument());
}

#[test]
fn device_store_uses_shorter_key_limit() {
    let store = device_store(std::sync::Arc::new(MemoryDeviceDirectory::with_local_id(
        LOCAL_DEVICE,
    )));
    let limit = Limits::default().max_device_key_bytes;
    assert!(store.put(vec![b'k'; limit], "v").is_ok());
    assert!(store
        .put(vec![b'k'; limit + 1], "v")
        .unwrap_err()
        .is_invalid_argument());
}

#[test]
fn invalid_batch_element_applies_nothing() {
    let store = memory_store();
    let recorder = subscribe(&store, SubscribeType::All);

    let err = store
        .put_batch(&[entry("a", "1"), entry("", "2"), entry("c", "3")])
        .unwrap_err();
    assert!(err.is_invalid_argument());

    let err = store
        .delete_batch(&[Key::from("a"), Key::from(vec![b'k'; 2000])])
        .unwrap_err();
    assert!(err.is_invalid_argument());

    store.flush_notifications();
    assert_eq!(store.get("a"), Err(Status::KeyNotFound));
    assert_eq!(store.get("c"), Err(Status::KeyNotFound));
    assert_eq!(recorder.count(), 0);
}

// ============================================================================
// Mutations and reads
// ============================================================================

#[test]
fn put_get_overwrite() {
    let store = memory_store();
    store.put("k", "v1").unwrap();
    store.put("k", "v2").unwrap();
    assert_eq!(store.get("k").unwrap(), Value::from("v2"));
}

#[test]
fn delete_absent_key_is_silent_success() {
    let store = memory_store();
    let recorder = subscribe(&store, SubscribeType::All);
    store.delete("missing").unwrap();
    store.delete_batch(&[Key::from("x"), Key::from("y")]).unwrap();
    store.flush_notifications();
    assert_eq!(recorder.count(), 0);
}

#[test]
fn empty_batches_are_no_ops() {
    let store = memory_store();
    let recorder = subscribe(&store, SubscribeType::All);
    store.put_batch(&[]).unwrap();
    store.delete_batch(&[]).unwrap();
    store.flush_notifications();
    assert_eq!(recorder.count(), 0);
}

#[test]
fn get_entries_by_prefix_in_key_order() {
    let store = memory_store();
    store
        .put_batch(&[
            entry("user:2", "b"),
            entry("user:1", "a"),
            entry("group:1", "g"),
            entry("user:10", "c"),
        ])
        .unwrap();

    assert_eq!(
        keys(&store.get_entries("user:").unwrap()),
        vec!["user:1", "user:10", "user:2"]
    );
    assert_eq!(store.get_entries("").unwrap().len(), 4);
    assert!(store.get_entries("none").unwrap().is_empty());
    assert!(store
        .get_entries(vec![b'p'; 1025])
        .unwrap_err()
        .is_invalid_argument());
}

#[test]
fn clear_removes_everything() {
    let store = memory_store();
    store
        .put_batch(&[entry("a", "1"), entry("b", "2")])
        .unwrap();
    let recorder = subscribe(&store, SubscribeType::Local);

    store.clear().unwrap();
    store.flush_notifications();

    assert!(store.get_entries("").unwrap().is_empty());
    let seen = recorder.notifications();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].is_clear);
    assert_eq!(seen[0].delete_entries, vec![entry("a", "1"), entry("b", "2")]);
    assert!(seen[0].insert_entries.is_empty());
}

#[test]
fn clear_on_empty_store_is_silent() {
    let store = memory_store();
    let recorder = subscribe(&store, SubscribeType::All);
    store.clear().unwrap();
    store.flush_notifications();
    assert_eq!(recorder.count(), 0);
}

#[test]
fn store_identity() {
    let store = memory_store();
    assert_eq!(store.get_store_id(), "test_store");
    assert_eq!(store.app_id(), "test_app");
    assert_eq!(store.local_device_id(), LOCAL_DEVICE);
    assert_eq!(
        store.get_security_level().unwrap(),
        Options::default().security_level
    );
}

// ============================================================================
// Device collaboration
// ============================================================================

#[test]
fn device_data_is_kept_per_device() {
    let directory = std::sync::Arc::new(MemoryDeviceDirectory::with_local_id(LOCAL_DEVICE));
    directory.register("net-peer", "peer");
    let store = device_store(directory);

    store.put("k", "mine").unwrap();
    store
        .apply_remote_batch("peer", &[entry("k", "theirs")], &[])
        .unwrap();

    assert_eq!(store.get("k").unwrap(), Value::from("mine"));
    assert_eq!(store.get_entries("").unwrap(), vec![entry("k", "mine")]);
    assert_eq!(
        store.get_entries_with_query_str("").unwrap(),
        vec![entry("k", "mine"), entry("k", "theirs")]
    );

    let cursor = store.get_result_set("").unwrap();
    assert!(cursor.move_to_first());
    assert_eq!(cursor.get_entry().unwrap(), entry("k", "mine"));
}

#[test]
fn device_store_notifications_carry_user_keys() {
    let directory = std::sync::Arc::new(MemoryDeviceDirectory::with_local_id(LOCAL_DEVICE));
    let store = device_store(directory);
    let local = subscribe(&store, SubscribeType::Local);
    let remote = subscribe(&store, SubscribeType::Remote);

    store.put("k", "1").unwrap();
    store.put("k", "2").unwrap();
    store
        .apply_remote_batch("peer", &[entry("r", "x")], &[])
        .unwrap();
    store.start_transaction().unwrap();
    store.delete("k").unwrap();
    store.commit().unwrap();
    store.clear().unwrap();
    store.flush_notifications();

    let seen = local.notifications();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0].insert_entries, vec![entry("k", "1")]);
    assert_eq!(seen[1].update_entries, vec![entry("k", "2")]);
    assert_eq!(seen[2].delete_entries, vec![entry("k", "2")]);
    assert!(seen[3].is_clear);
    assert_eq!(seen[3].delete_entries, vec![entry("r", "x")]);
    assert_eq!(remote.notifications()[0].insert_entries, vec![entry("r", "x")]);
}

#[test]
fn remove_device_data() {
    let directory = std::sync::Arc::new(MemoryDeviceDirectory::with_local_id(LOCAL_DEVICE));
    directory.register("net-peer", "peer");
    let store = device_store(directory);

    store.put("k", "mine").unwrap();
    store
        .apply_remote_batch("peer", &[entry("a", "1"), entry("b", "2")], &[])
        .unwrap();
    let recorder = subscribe(&store, SubscribeType::Local);

    store.remove_device_data("net-peer").unwrap();
    store.flush_notifications();

    let remaining = store.get_entries_with_query_str("").unwrap();
    assert_eq!(remaining, vec![entry("k", "mine")]);

    let seen = recorder.notifications();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].delete_entries, vec![entry("a", "1"), entry("b", "2")]);
    assert!(!seen[0].is_clear);
}

#[test]
fn remove_device_data_rejects_unknown_and_local() {
    let store = memory_store();
    assert!(store
        .remove_device_data("nobody")
        .unwrap_err()
        .is_invalid_argument());
    assert!(store
        .remove_device_data(LOCAL_DEVICE)
        .unwrap_err()
        .is_invalid_argument());
}

#[test]
fn remote_batch_needs_remote_device() {
    let store = memory_store();
    assert!(store
        .apply_remote_batch("", &[entry("a", "1")], &[])
        .unwrap_err()
        .is_invalid_argument());
    assert!(store
        .apply_remote_batch(LOCAL_DEVICE, &[entry("a", "1")], &[])
        .unwrap_err()
        .is_invalid_argument());
}
