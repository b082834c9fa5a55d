//! Chain folding: computing the logical view of a page from its records.

use crossbeam_epoch::{Guard, Shared};
use std::sync::atomic::Ordering;

use super::node::{BaseLeaf, Record, RecordKind, ValueList};
use super::types::{KeyComparator, Pid, ValueEquality};

/// Folded view of an inner page: `children[i]` covers keys below `keys[i]`,
/// the last child covers the rest.
pub(crate) struct InnerView<K> {
    pub(crate) keys: Vec<K>,
    pub(crate) children: Vec<Pid>,
}

/// First index whose key is not below `key`.
pub(crate) fn lower_bound<K, C: KeyComparator<K>>(keys: &[K], key: &K, cmp: &C) -> usize {
    let mut lo = 0;
    let mut hi = keys.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp.less(&keys[mid], key) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// First index whose key is above `key`.
pub(crate) fn upper_bound<K, C: KeyComparator<K>>(keys: &[K], key: &K, cmp: &C) -> usize {
    let mut lo = 0;
    let mut hi = keys.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp.less(key, &keys[mid]) {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

/// Binary search over sorted `(key, payload)` slots.
pub(crate) fn search_entries<K, T, C: KeyComparator<K>>(
    entries: &[(K, T)],
    key: &K,
    cmp: &C,
) -> std::result::Result<usize, usize> {
    entries.binary_search_by(|(k, _)| {
        if cmp.less(k, key) {
            std::cmp::Ordering::Less
        } else if cmp.less(key, k) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    })
}

fn lower_bound_entries<K, T, C: KeyComparator<K>>(entries: &[(K, T)], key: &K, cmp: &C) -> usize {
    let mut lo = 0;
    let mut hi = entries.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp.less(&entries[mid].0, key) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// The base record at the tail of a chain.
///
/// Safety: every published chain ends in a base record, and all records
/// reachable from a head loaded under `guard` stay live for its lifetime.
pub(crate) fn chain_base<'g, K, V>(
    head: Shared<'g, Record<K, V>>,
    guard: &'g Guard,
) -> &'g Record<K, V> {
    let mut cur = head;
    loop {
        let rec = unsafe { cur.deref() };
        match &rec.kind {
            RecordKind::BaseLeaf(_) | RecordKind::BaseInner(_) => return rec,
            _ => cur = rec.base.load(Ordering::Acquire, guard),
        }
    }
}

/// The base leaf at the tail of a chain, when the chain is a leaf chain.
pub(crate) fn base_leaf<'g, K, V>(
    head: Shared<'g, Record<K, V>>,
    guard: &'g Guard,
) -> Option<&'g BaseLeaf<K, V>> {
    match &chain_base(head, guard).kind {
        RecordKind::BaseLeaf(leaf) => Some(leaf),
        _ => None,
    }
}

/// Folds a leaf chain into its sorted logical `(key, value-list)` view.
///
/// Deltas are collected newest-to-oldest and applied oldest-to-newest over
/// the base, so a delete shadows only the records older than itself and a
/// later insert re-materializes the key. A split record masks every key at
/// or above its split key; those keys live in the sibling page.
pub(crate) fn fold_leaf<'g, K, V, C, E>(
    head: Shared<'g, Record<K, V>>,
    cmp: &C,
    veq: &E,
    guard: &'g Guard,
) -> Vec<(K, ValueList<V>)>
where
    K: Clone,
    V: Clone,
    C: KeyComparator<K>,
    E: ValueEquality<V>,
{
    let mut deltas: Vec<&'g RecordKind<K, V>> = Vec::new();
    let mut split_key: Option<&'g K> = None;
    let mut cur = head;
    let base = loop {
        let rec = unsafe { cur.deref() };
        match &rec.kind {
            RecordKind::BaseLeaf(leaf) => break leaf,
            RecordKind::Split { key, .. } => {
                // the newest split key is the narrowest bound
                if split_key.is_none() {
                    split_key = Some(key);
                }
            }
            kind @ (RecordKind::Insert { .. }
            | RecordKind::DeleteKey { .. }
            | RecordKind::DeleteValue { .. }
            | RecordKind::Update { .. }) => deltas.push(kind),
            RecordKind::Separator { .. } | RecordKind::BaseInner(_) => {}
        }
        cur = rec.base.load(Ordering::Acquire, guard);
    };

    let mut view: Vec<(K, ValueList<V>)> = match split_key {
        Some(ks) => {
            let cut = lower_bound_entries(&base.entries, ks, cmp);
            base.entries[..cut].to_vec()
        }
        None => base.entries.clone(),
    };

    let masked = |key: &K| split_key.map_or(false, |ks| !cmp.less(key, ks));

    for kind in deltas.into_iter().rev() {
        match kind {
            RecordKind::Insert { key, value } => {
                if masked(key) {
                    continue;
                }
                match search_entries(&view, key, cmp) {
                    Ok(idx) => view[idx].1.push_unique(value.clone(), veq),
                    Err(idx) => view.insert(idx, (key.clone(), ValueList::single(value.clone()))),
                }
            }
            RecordKind::Update { key, value } => {
                if masked(key) {
                    continue;
                }
                match search_entries(&view, key, cmp) {
                    Ok(idx) => view[idx].1.replace(value.clone()),
                    Err(idx) => view.insert(idx, (key.clone(), ValueList::single(value.clone()))),
                }
            }
            RecordKind::DeleteKey { key } => {
                if let Ok(idx) = search_entries(&view, key, cmp) {
                    view.remove(idx);
                }
            }
            RecordKind::DeleteValue { key, value } => {
                if let Ok(idx) = search_entries(&view, key, cmp) {
                    view[idx].1.remove(value, veq);
                    if view[idx].1.is_empty() {
                        view.remove(idx);
                    }
                }
            }
            _ => {}
        }
    }

    debug_assert!(
        view.windows(2).all(|w| cmp.less(&w[0].0, &w[1].0)),
        "folded leaf view out of key order"
    );

    view
}

/// Folds an inner chain into its routing view: base separators narrowed by
/// any split record, with pending separator records merged in.
pub(crate) fn fold_inner<'g, K, V, C>(
    head: Shared<'g, Record<K, V>>,
    cmp: &C,
    guard: &'g Guard,
) -> InnerView<K>
where
    K: Clone,
    C: KeyComparator<K>,
{
    let mut separators: Vec<(&'g K, Pid)> = Vec::new();
    let mut split_key: Option<&'g K> = None;
    let mut cur = head;
    let base = loop {
        let rec = unsafe { cur.deref() };
        match &rec.kind {
            RecordKind::BaseInner(inner) => break inner,
            RecordKind::Split { key, .. } => {
                if split_key.is_none() {
                    split_key = Some(key);
                }
            }
            RecordKind::Separator { low, child, .. } => separators.push((low, *child)),
            _ => {}
        }
        cur = rec.base.load(Ordering::Acquire, guard);
    };

    let (mut keys, mut children) = match split_key {
        Some(ks) => {
            let cut = lower_bound(&base.keys, ks, cmp);
            (base.keys[..cut].to_vec(), base.children[..cut + 1].to_vec())
        }
        None => (base.keys.clone(), base.children.clone()),
    };

    for (low, child) in separators.into_iter().rev() {
        if split_key.map_or(false, |ks| !cmp.less(low, ks)) {
            continue;
        }
        let idx = lower_bound(&keys, low, cmp);
        if idx < keys.len() && cmp.equal(&keys[idx], low) {
            children[idx + 1] = child;
        } else {
            keys.insert(idx, low.clone());
            children.insert(idx + 1, child);
        }
    }

    debug_assert!(
        keys.windows(2).all(|w| cmp.less(&w[0], &w[1])),
        "folded inner view out of key order"
    );
    debug_assert_eq!(children.len(), keys.len() + 1);

    InnerView { keys, children }
}

/// Whether the leaf chain's logical view currently holds `key`.
pub(crate) fn leaf_contains_key<'g, K, V, C, E>(
    head: Shared<'g, Record<K, V>>,
    key: &K,
    cmp: &C,
    veq: &E,
    guard: &'g Guard,
) -> bool
where
    K: Clone,
    V: Clone,
    C: KeyComparator<K>,
    E: ValueEquality<V>,
{
    let view = fold_leaf(head, cmp, veq, guard);
    search_entries(&view, key, cmp).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bwtree::types::OrdComparator;

    #[test]
    fn test_lower_bound() {
        let cmp = OrdComparator;
        let keys = [10u64, 20, 30];
        assert_eq!(lower_bound(&keys, &5, &cmp), 0);
        assert_eq!(lower_bound(&keys, &10, &cmp), 0);
        assert_eq!(lower_bound(&keys, &15, &cmp), 1);
        assert_eq!(lower_bound(&keys, &30, &cmp), 2);
        assert_eq!(lower_bound(&keys, &31, &cmp), 3);
    }

    #[test]
    fn test_upper_bound() {
        let cmp = OrdComparator;
        let keys = [10u64, 20, 30];
        assert_eq!(upper_bound(&keys, &5, &cmp), 0);
        assert_eq!(upper_bound(&keys, &10, &cmp), 1);
        assert_eq!(upper_bound(&keys, &20, &cmp), 2);
        assert_eq!(upper_bound(&keys, &35, &cmp), 3);
    }

    #[test]
    fn test_search_entries() {
        let cmp = OrdComparator;
        let entries = [(10u64, "a"), (20, "b"), (30, "c")];
        assert_eq!(search_entries(&entries, &20, &cmp), Ok(1));
        assert_eq!(search_entries(&entries, &25, &cmp), Err(2));
        assert_eq!(search_entries(&entries, &5, &cmp), Err(0));
    }
}
