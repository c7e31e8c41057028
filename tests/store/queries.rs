//! Query reads: compilation through the store, filtering, ordering, paging

use std::sync::Arc;

use crate::common::*;

fn people_store() -> SingleStore {
    let store = memory_store();
    store
        .put_batch(&[
            entry("p1", r#"{"name":"alice","age":25,"city":"Oslo"}"#),
            entry("p2", r#"{"name":"bob","age":30,"city":"Rome"}"#),
            entry("p3", r#"{"name":"bob","age":41,"city":"Oslo"}"#),
            entry("p4", r#"{"name":"dave","age":30}"#),
            entry("raw", "plain text"),
        ])
        .unwrap();
    store
}

#[test]
fn empty_query_selects_everything() {
    let store = people_store();
    assert_eq!(
        keys(&store.get_entries_with_query_str("").unwrap()),
        vec!["p1", "p2", "p3", "p4", "raw"]
    );
    assert_eq!(store.get_count(&Query::select_all()).unwrap(), 5);
}

#[test]
fn equal_to_and_selects_exact_match() {
    let store = people_store();
    let found = store
        .get_entries_with_query_str("^EQUAL STRING name bob ^AND ^EQUAL INTEGER age 30")
        .unwrap();
    assert_eq!(keys(&found), vec!["p2"]);
}

#[test]
fn builder_output_runs_through_the_store() {
    let store = people_store();
    let mut q = DataQuery::new();
    q.equal_to("$.city", "Oslo").and().greater_than("$.age", 30);
    let text = q.to_query_string().unwrap();
    assert_eq!(
        keys(&store.get_entries_with_query_str(&text).unwrap()),
        vec!["p3"]
    );
}

#[test]
fn malformed_query_text_is_invalid_argument() {
    let store = people_store();
    for text in [
        "^IN INTEGER age ^START 1 2",
        "^EQUAL INTEGER age",
        "^BOGUS",
        "^EQUAL STRING name bob ^EQUAL STRING name carol",
    ] {
        let err = store.get_entries_with_query_str(text).unwrap_err();
        assert!(err.is_invalid_argument(), "{} gave {:?}", text, err);
    }
    assert!(store
        .get_count_with_query_str("^LIMIT 1")
        .unwrap_err()
        .is_invalid_argument());
}

#[test]
fn groups_and_or() {
    let store = people_store();
    let text = "^BEGIN_GROUP ^EQUAL STRING name alice ^OR ^EQUAL STRING name dave ^END_GROUP \
                ^OR ^GREATER INTEGER age 40";
    assert_eq!(
        keys(&store.get_entries_with_query_str(text).unwrap()),
        vec!["p1", "p3", "p4"]
    );
}

#[test]
fn like_in_and_null_checks() {
    let store = people_store();
    assert_eq!(
        keys(&store.get_entries_with_query_str("^LIKE name %o%").unwrap()),
        vec!["p2", "p3"]
    );
    assert_eq!(
        keys(
            &store
                .get_entries_with_query_str("^IN INTEGER age ^START 25 41 ^END")
                .unwrap()
        ),
        vec!["p1", "p3"]
    );
    assert_eq!(
        keys(&store.get_entries_with_query_str("^IS_NULL city").unwrap()),
        vec!["p4", "raw"]
    );
}

#[test]
fn order_limit_and_prefix() {
    let store = people_store();
    assert_eq!(
        keys(
            &store
                .get_entries_with_query_str("^KEY_PREFIX p ^DESC age ^LIMIT 2 1")
                .unwrap()
        ),
        vec!["p2", "p4"]
    );
    assert_eq!(
        keys(&store.get_entries_with_query_str("^IN_KEYS ^START p4 raw nope ^END").unwrap()),
        vec!["p4", "raw"]
    );
}

#[test]
fn order_by_write_time() {
    let store = memory_store();
    store.put("c", "1").unwrap();
    store.put("a", "2").unwrap();
    store.put("b", "3").unwrap();

    assert_eq!(
        keys(
            &store
                .get_entries_with_query_str("^OrderByWriteTime ^IS_DESC")
                .unwrap()
        ),
        vec!["b", "a", "c"]
    );
    assert_eq!(
        keys(
            &store
                .get_entries_with_query_str("^OrderByWriteTime ^IS_ASC ^LIMIT 2 0")
                .unwrap()
        ),
        vec!["c", "a"]
    );
}

#[test]
fn write_time_order_rejects_filters() {
    let store = people_store();
    let err = store
        .get_entries_with_query_str("^EQUAL STRING name bob ^OrderByWriteTime ^IS_ASC")
        .unwrap_err();
    assert!(matches!(err, Status::NotSupport(_)));
}

#[test]
fn device_id_scopes_to_one_device() {
    let directory = Arc::new(MemoryDeviceDirectory::with_local_id(LOCAL_DEVICE));
    directory.register("net-peer", "peer");
    let store = device_store(directory);

    store.put("a1", "mine").unwrap();
    store
        .apply_remote_batch("peer", &[entry("a1", "x"), entry("b1", "y")], &[])
        .unwrap();

    assert_eq!(
        keys(&store.get_entries_with_query_str("^DEVICE_ID net-peer").unwrap()),
        vec!["a1", "b1"]
    );
    assert_eq!(
        keys(
            &store
                .get_entries_with_query_str("^DEVICE_ID net-peer ^KEY_PREFIX b")
                .unwrap()
        ),
        vec!["b1"]
    );
    assert!(store
        .get_entries_with_query_str("^DEVICE_ID net-unknown")
        .unwrap_err()
        .is_invalid_argument());
}

#[test]
fn oversized_query_text_rejected() {
    let store = people_store();
    let text = format!("^KEY_PREFIX {}", "a".repeat(6 * 1024));
    assert!(store
        .get_entries_with_query_str(&text)
        .unwrap_err()
        .is_invalid_argument());
}
