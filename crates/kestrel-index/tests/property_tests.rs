//! Property tests: the Bw-Tree against a reference `BTreeMap` model.

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use kestrel_common::IndexConfig;
use kestrel_index::BwTree;

fn test_config() -> IndexConfig {
    IndexConfig {
        mapping_table_capacity: 1 << 16,
        delta_chain_threshold: 4,
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Insert(u64, u64),
    Update(u64, u64),
    DeleteKey(u64),
    DeleteValue(u64, u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let key = 0u64..48;
    let value = 0u64..6;
    prop_oneof![
        4 => (key.clone(), value.clone()).prop_map(|(k, v)| Op::Insert(k, v)),
        1 => (key.clone(), value.clone()).prop_map(|(k, v)| Op::Update(k, v)),
        1 => key.clone().prop_map(Op::DeleteKey),
        1 => (key, value).prop_map(|(k, v)| Op::DeleteValue(k, v)),
    ]
}

fn apply_to_model(model: &mut BTreeMap<u64, Vec<u64>>, op: Op) {
    match op {
        Op::Insert(k, v) => {
            let list = model.entry(k).or_default();
            if !list.contains(&v) {
                list.push(v);
            }
        }
        Op::Update(k, v) => {
            if let Some(list) = model.get_mut(&k) {
                *list = vec![v];
            }
        }
        Op::DeleteKey(k) => {
            model.remove(&k);
        }
        Op::DeleteValue(k, v) => {
            if let Some(list) = model.get_mut(&k) {
                list.retain(|x| *x != v);
                if list.is_empty() {
                    model.remove(&k);
                }
            }
        }
    }
}

fn tree_as_map(tree: &BwTree<u64, u64>) -> BTreeMap<u64, Vec<u64>> {
    let mut out: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
    for (k, v) in tree.scan() {
        out.entry(k).or_default().push(v);
    }
    for list in out.values_mut() {
        list.sort_unstable();
    }
    out
}

proptest! {
    #[test]
    fn random_scripts_match_reference_model(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let tree = BwTree::<u64, u64>::new(test_config()).unwrap();
        let mut model = BTreeMap::new();

        for &op in &ops {
            match op {
                Op::Insert(k, v) => tree.insert(k, v).unwrap(),
                Op::Update(k, v) => tree.update(k, v).unwrap(),
                Op::DeleteKey(k) => tree.delete_key(&k).unwrap(),
                Op::DeleteValue(k, v) => tree.delete_value(&k, &v).unwrap(),
            }
            apply_to_model(&mut model, op);
        }

        let mut expected = model;
        for list in expected.values_mut() {
            list.sort_unstable();
        }
        prop_assert_eq!(tree_as_map(&tree), expected);
    }

    #[test]
    fn scan_keys_are_strictly_ascending(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let tree = BwTree::<u64, u64>::new(test_config()).unwrap();
        for &op in &ops {
            match op {
                Op::Insert(k, v) => tree.insert(k, v).unwrap(),
                Op::Update(k, v) => tree.update(k, v).unwrap(),
                Op::DeleteKey(k) => tree.delete_key(&k).unwrap(),
                Op::DeleteValue(k, v) => tree.delete_value(&k, &v).unwrap(),
            }
        }

        let keys: Vec<u64> = {
            let mut seen = BTreeSet::new();
            tree.scan().into_iter().map(|(k, _)| k).filter(|k| seen.insert(*k)).collect()
        };
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(keys, sorted);
    }

    #[test]
    fn insert_round_trip(keys in prop::collection::btree_set(0u64..512, 0..128)) {
        let tree = BwTree::<u64, u64>::new(test_config()).unwrap();
        for &key in &keys {
            tree.insert(key, key).unwrap();
        }

        let scanned: Vec<(u64, u64)> = tree.scan();
        let expected: Vec<(u64, u64)> = keys.iter().map(|&k| (k, k)).collect();
        prop_assert_eq!(scanned, expected);
        prop_assert_eq!(tree.len(), keys.len());
    }

    #[test]
    fn repeated_insert_is_idempotent(key in 0u64..32, value in 0u64..8) {
        let tree = BwTree::<u64, u64>::new(test_config()).unwrap();
        tree.insert(key, value).unwrap();
        tree.insert(key, value).unwrap();

        prop_assert_eq!(tree.lookup(&key), vec![value]);
        prop_assert_eq!(tree.len(), 1);
    }

    #[test]
    fn delete_key_then_lookup_is_empty(key in 0u64..32, values in prop::collection::vec(0u64..8, 1..4)) {
        let tree = BwTree::<u64, u64>::new(test_config()).unwrap();
        for &value in &values {
            tree.insert(key, value).unwrap();
        }
        tree.delete_key(&key).unwrap();
        tree.delete_key(&key).unwrap();

        prop_assert!(tree.lookup(&key).is_empty());
        prop_assert!(!tree.exists(&key));
    }
}
