//! Result set cursors handed out by a store

use replikv::engine::CursorError;

use crate::common::*;

fn abc_store() -> SingleStore {
    let store = memory_store();
    store
        .put_batch(&[entry("a", "1"), entry("b", "2"), entry("c", "3")])
        .unwrap();
    store
}

#[test]
fn iterate_forward_and_back() {
    let store = abc_store();
    let cursor = store.get_result_set("").unwrap();
    assert_eq!(cursor.get_count(), 3);
    assert!(cursor.is_before_first());

    let mut seen = Vec::new();
    while cursor.move_to_next() {
        seen.push(cursor.get_entry().unwrap().key.to_string_lossy());
    }
    assert_eq!(seen, vec!["a", "b", "c"]);
    assert!(cursor.is_after_last());

    assert!(cursor.move_to_previous());
    assert!(cursor.is_last());
    assert_eq!(cursor.get_entry().unwrap(), entry("c", "3"));
}

#[test]
fn out_of_range_moves_clamp() {
    let store = abc_store();
    let cursor = store.get_result_set("").unwrap();

    assert!(!cursor.move_to_position(3));
    assert!(cursor.is_after_last());
    assert!(matches!(
        cursor.get_entry(),
        Err(CursorError::OutOfRange { .. })
    ));

    assert!(cursor.move_to_position(1));
    assert!(!cursor.move_by(-5));
    assert_eq!(cursor.get_position(), -1);

    let err: Status = cursor.get_entry().unwrap_err().into();
    assert!(err.is_invalid_argument());
}

#[test]
fn cursor_is_a_snapshot() {
    let store = abc_store();
    let cursor = store
        .get_result_set_with_query_str("^KEY_PREFIX b")
        .unwrap();
    store.delete("b").unwrap();
    store.put("bb", "new").unwrap();

    assert_eq!(cursor.get_count(), 1);
    assert!(cursor.move_to_first());
    assert_eq!(cursor.get_entry().unwrap(), entry("b", "2"));
}

#[test]
fn closed_cursor_returns_sentinels() {
    let store = abc_store();
    let cursor = store.get_result_set("").unwrap();
    assert!(cursor.move_to_first());

    store.close_result_set(&cursor).unwrap();
    cursor.close();

    assert!(cursor.is_closed());
    assert_eq!(cursor.get_count(), INVALID_COUNT);
    assert_eq!(cursor.get_position(), INVALID_POSITION);
    assert!(!cursor.move_to_next());
    assert!(!cursor.is_first());
    assert!(!cursor.is_before_first());
    assert_eq!(cursor.get_entry(), Err(CursorError::Closed));

    let err: Status = cursor.get_entry().unwrap_err().into();
    assert_eq!(err, Status::AlreadyClosed);
}

#[test]
fn close_result_set_tracks_ownership() {
    let store = abc_store();
    let other = abc_store();
    let cursor = store.get_result_set("").unwrap();
    assert_eq!(store.open_result_sets(), 1);

    assert!(other
        .close_result_set(&cursor)
        .unwrap_err()
        .is_invalid_argument());

    store.close_result_set(&cursor).unwrap();
    assert_eq!(store.open_result_sets(), 0);
    assert!(store
        .close_result_set(&cursor)
        .unwrap_err()
        .is_invalid_argument());
}

#[test]
fn query_cursor_and_count_agree() {
    let store = abc_store();
    let query = {
        let mut q = DataQuery::new();
        q.in_keys(&["a", "c"]);
        QueryCompiler::new()
            .compile(&q.to_query_string().unwrap())
            .into_result()
            .unwrap()
    };
    let cursor = store.get_result_set_with_query(&query).unwrap();
    assert_eq!(cursor.get_count(), 2);
    assert_eq!(store.get_count(&query).unwrap(), 2);
}

#[test]
fn closed_and_dropped_cursors_stop_counting() {
    let store = abc_store();
    for _ in 0..100 {
        let cursor = store.get_result_set("").unwrap();
        cursor.close();
    }
    assert_eq!(store.open_result_sets(), 0);

    let kept = store.get_result_set("").unwrap();
    for _ in 0..10 {
        drop(store.get_result_set("").unwrap());
    }
    assert_eq!(store.open_result_sets(), 1);

    kept.close();
    assert!(store
        .close_result_set(&kept)
        .unwrap_err()
        .is_invalid_argument());
    assert_eq!(store.open_result_sets(), 0);
}
