//! Property tests for per-batch change classification

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use crate::common::*;

#[derive(Debug, Clone)]
enum Batch {
    Put(Vec<(u8, u8)>),
    Delete(Vec<u8>),
    Remote(Vec<(u8, u8)>, Vec<u8>),
}

fn key(k: u8) -> String {
    format!("k{}", k)
}

fn batch_strategy() -> impl Strategy<Value = Batch> {
    let pairs = prop::collection::vec((0u8..6, 0u8..3), 0..6);
    let ks = prop::collection::vec(0u8..6, 0..6);
    prop_oneof![
        pairs.clone().prop_map(Batch::Put),
        ks.clone().prop_map(Batch::Delete),
        (pairs, ks).prop_map(|(p, d)| Batch::Remote(p, d)),
    ]
}

/// Apply `ops` in order to `model`; returns the keys whose state changed
/// together with their pre-batch and final values
fn apply_model(
    model: &mut BTreeMap<String, String>,
    ops: Vec<(String, Option<String>)>,
) -> BTreeMap<String, (Option<String>, Option<String>)> {
    let mut touched: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();
    for (k, v) in ops {
        let before = model.get(&k).cloned();
        touched.entry(k.clone()).or_insert((before, None)).1 = v.clone();
        match v {
            Some(v) => {
                model.insert(k, v);
            }
            None => {
                model.remove(&k);
            }
        }
    }
    touched
        .into_iter()
        .filter(|(_, (before, after))| before.is_some() || after.is_some())
        .collect()
}

fn key_set(entries: &[Entry]) -> BTreeSet<String> {
    entries.iter().map(|e| e.key.to_string_lossy()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn notification_keys_are_exactly_the_changed_keys(
        batches in prop::collection::vec(batch_strategy(), 1..8)
    ) {
        let store = memory_store();
        let local = subscribe(&store, SubscribeType::Local);
        let remote = subscribe(&store, SubscribeType::Remote);
        let mut model = BTreeMap::new();
        let mut expected = Vec::new();

        for batch in batches {
            let (ops, is_local) = match &batch {
                Batch::Put(pairs) => (
                    pairs.iter().map(|(k, v)| (key(*k), Some(v.to_string()))).collect::<Vec<_>>(),
                    true,
                ),
                Batch::Delete(ks) => (ks.iter().map(|k| (key(*k), None)).collect(), true),
                Batch::Remote(pairs, ks) => (
                    pairs
                        .iter()
                        .map(|(k, v)| (key(*k), Some(v.to_string())))
                        .chain(ks.iter().map(|k| (key(*k), None)))
                        .collect(),
                    false,
                ),
            };

            match batch {
                Batch::Put(pairs) => {
                    let entries: Vec<Entry> = pairs
                        .iter()
                        .map(|(k, v)| Entry::new(key(*k), v.to_string()))
                        .collect();
                    store.put_batch(&entries).unwrap();
                }
                Batch::Delete(ks) => {
                    let keys: Vec<Key> = ks.iter().map(|k| Key::from(key(*k))).collect();
                    store.delete_batch(&keys).unwrap();
                }
                Batch::Remote(pairs, ks) => {
                    let puts: Vec<Entry> = pairs
                        .iter()
                        .map(|(k, v)| Entry::new(key(*k), v.to_string()))
                        .collect();
                    let deletes: Vec<Key> = ks.iter().map(|k| Key::from(key(*k))).collect();
                    store.apply_remote_batch("peer", &puts, &deletes).unwrap();
                }
            }

            let changed = apply_model(&mut model, ops);
            if !changed.is_empty() {
                expected.push((is_local, changed));
            }
        }
        store.flush_notifications();

        let mut local_seen = local.notifications().into_iter();
        let mut remote_seen = remote.notifications().into_iter();
        for (is_local, changed) in &expected {
            let n = if *is_local { local_seen.next() } else { remote_seen.next() };
            let n = n.expect("one notification per changed batch");

            let inserts: BTreeSet<String> = changed
                .iter()
                .filter(|(_, (b, a))| b.is_none() && a.is_some())
                .map(|(k, _)| k.clone())
                .collect();
            let updates: BTreeSet<String> = changed
                .iter()
                .filter(|(_, (b, a))| b.is_some() && a.is_some())
                .map(|(k, _)| k.clone())
                .collect();
            let deletes: BTreeSet<String> = changed
                .iter()
                .filter(|(_, (b, a))| b.is_some() && a.is_none())
                .map(|(k, _)| k.clone())
                .collect();

            prop_assert_eq!(key_set(&n.insert_entries), inserts);
            prop_assert_eq!(key_set(&n.update_entries), updates);
            prop_assert_eq!(key_set(&n.delete_entries), deletes);
            prop_assert_eq!(n.len(), changed.len());
        }
        prop_assert!(local_seen.next().is_none());
        prop_assert!(remote_seen.next().is_none());

        let stored: BTreeMap<String, String> = store
            .get_entries("")
            .unwrap()
            .into_iter()
            .map(|e| (e.key.to_string_lossy(), e.value.to_string_lossy()))
            .collect();
        prop_assert_eq!(stored, model);
    }
}
