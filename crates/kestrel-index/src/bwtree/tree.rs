//! The Bw-Tree handle: search and mutation engines.

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use kestrel_common::{IndexConfig, Result};

use super::constants::{max_slots, NULL_PID};
use super::fold;
use super::mapping::MappingTable;
use super::node::{BaseLeaf, Record, RecordKind};
use super::stats::{BwTreeStats, BwTreeStatsSnapshot};
use super::types::{EqEquality, KeyComparator, OrdComparator, Pid, ValueEquality};

/// Latch-free ordered index over generic keys and values.
///
/// The tree owns its mapping table, root cell, head-leaf cell, pid counter,
/// and stats; there is no process-wide state. All operations take `&self`
/// and are safe to call from any number of threads. Duplicate values per
/// key are kept in per-key value lists, deduplicated under the supplied
/// value-equality collaborator.
///
/// # Examples
///
/// ```
/// use kestrel_common::IndexConfig;
/// use kestrel_index::BwTree;
///
/// let config = IndexConfig {
///     mapping_table_capacity: 1024,
///     delta_chain_threshold: 8,
/// };
/// let tree = BwTree::<u64, u64>::new(config).unwrap();
/// tree.insert(1, 10).unwrap();
/// tree.insert(1, 11).unwrap();
/// assert_eq!(tree.lookup(&1), vec![10, 11]);
/// tree.delete_value(&1, &10).unwrap();
/// assert_eq!(tree.lookup(&1), vec![11]);
/// ```
pub struct BwTree<K, V, C = OrdComparator, E = EqEquality> {
    pub(super) table: MappingTable<K, V>,
    pub(super) root: AtomicU64,
    pub(super) head_leaf: AtomicU64,
    pub(super) comparator: C,
    pub(super) value_eq: E,
    pub(super) config: IndexConfig,
    pub(super) stats: BwTreeStats,
}

impl<K, V, C, E> BwTree<K, V, C, E> {
    /// Maximum keys in a base leaf, from the node-size target.
    pub const LEAF_SLOT_MAX: usize = max_slots(mem::size_of::<K>() + mem::size_of::<V>());

    /// Maximum separator keys in a base inner node.
    pub const INNER_SLOT_MAX: usize = max_slots(mem::size_of::<K>() + mem::size_of::<Pid>());

    /// Leaf occupancy floor reserved for a future merge path.
    pub const MIN_LEAF_SLOTS: usize = Self::LEAF_SLOT_MAX / 2;

    /// Inner occupancy floor reserved for a future merge path.
    pub const MIN_INNER_SLOTS: usize = Self::INNER_SLOT_MAX / 2;
}

impl<K, V> BwTree<K, V>
where
    K: Clone + Ord + Send + Sync,
    V: Clone + PartialEq + Send + Sync,
{
    /// Creates an index ordered by `K`'s `Ord` with `PartialEq` values.
    pub fn new(config: IndexConfig) -> Result<Self> {
        Self::with_comparators(config, OrdComparator, EqEquality)
    }
}

impl<K, V, C, E> BwTree<K, V, C, E>
where
    K: Clone,
    V: Clone,
    C: KeyComparator<K>,
    E: ValueEquality<V>,
{
    /// Creates an index with collaborator-supplied key ordering and value
    /// equality.
    pub fn with_comparators(config: IndexConfig, comparator: C, value_eq: E) -> Result<Self> {
        config.validate()?;
        let table = MappingTable::new(config.mapping_table_capacity);
        Ok(Self {
            table,
            root: AtomicU64::new(NULL_PID),
            head_leaf: AtomicU64::new(NULL_PID),
            comparator,
            value_eq,
            config,
            stats: BwTreeStats::default(),
        })
    }

    /// Returns the active configuration.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Returns a snapshot of the operation counters.
    pub fn stats(&self) -> BwTreeStatsSnapshot {
        self.stats.snapshot()
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// Returns every value stored under `key`, in insertion order.
    pub fn lookup(&self, key: &K) -> Vec<V> {
        let guard = &epoch::pin();
        if self.root.load(Ordering::Acquire) == NULL_PID {
            return Vec::new();
        }
        self.stats.inc_lookups();

        let (pid, mut head) = self.find_leaf(key, guard);
        if unsafe { head.deref() }.chain_length > self.config.delta_chain_threshold {
            self.consolidate(pid, guard);
            let relocated = self.find_leaf(key, guard);
            head = relocated.1;
        }

        let view = fold::fold_leaf(head, &self.comparator, &self.value_eq, guard);
        match fold::search_entries(&view, key, &self.comparator) {
            Ok(idx) => view[idx].1.to_vec(),
            Err(_) => Vec::new(),
        }
    }

    /// Whether any value is stored under `key`.
    pub fn exists(&self, key: &K) -> bool {
        let guard = &epoch::pin();
        if self.root.load(Ordering::Acquire) == NULL_PID {
            return false;
        }
        let (_, head) = self.find_leaf(key, guard);
        fold::leaf_contains_key(head, key, &self.comparator, &self.value_eq, guard)
    }

    /// Returns every (key, value) pair in ascending key order.
    pub fn scan(&self) -> Vec<(K, V)> {
        let guard = &epoch::pin();
        if self.root.load(Ordering::Acquire) == NULL_PID {
            return Vec::new();
        }

        let mut out = Vec::new();
        let mut pid = self.head_leaf.load(Ordering::Acquire);
        if pid == NULL_PID {
            pid = self.leftmost_leaf(guard);
        }
        while pid != NULL_PID {
            let head = self.table.load(pid, guard);
            if head.is_null() {
                break;
            }
            let view = fold::fold_leaf(head, &self.comparator, &self.value_eq, guard);
            for (key, values) in &view {
                for value in values.iter() {
                    out.push((key.clone(), value.clone()));
                }
            }
            pid = match fold::base_leaf(head, guard) {
                Some(base) => base.next.load(Ordering::Acquire),
                None => NULL_PID,
            };
        }
        out
    }

    /// Number of distinct keys in the index.
    pub fn len(&self) -> usize {
        let guard = &epoch::pin();
        if self.root.load(Ordering::Acquire) == NULL_PID {
            return 0;
        }

        let mut count = 0;
        let mut pid = self.head_leaf.load(Ordering::Acquire);
        if pid == NULL_PID {
            pid = self.leftmost_leaf(guard);
        }
        while pid != NULL_PID {
            let head = self.table.load(pid, guard);
            if head.is_null() {
                break;
            }
            count += fold::fold_leaf(head, &self.comparator, &self.value_eq, guard).len();
            pid = match fold::base_leaf(head, guard) {
                Some(base) => base.next.load(Ordering::Acquire),
                None => NULL_PID,
            };
        }
        count
    }

    /// Whether the index holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of levels from root to leaves; zero before first use.
    pub fn height(&self) -> u64 {
        let guard = &epoch::pin();
        let root = self.root.load(Ordering::Acquire);
        if root == NULL_PID {
            return 0;
        }
        let head = self.table.load(root, guard);
        if head.is_null() {
            return 0;
        }
        u64::from(unsafe { head.deref() }.level) + 1
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Adds `value` to `key`'s value list. A pair already present under the
    /// value-equality collaborator leaves the logical multiset unchanged.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let guard = &epoch::pin();
        self.ensure_root(guard)?;
        self.stats.inc_inserts();
        loop {
            let (pid, head) = self.find_leaf(&key, guard);
            let size = {
                let h = unsafe { head.deref() };
                if fold::leaf_contains_key(head, &key, &self.comparator, &self.value_eq, guard) {
                    h.size
                } else {
                    h.size + 1
                }
            };
            let delta = self.delta(
                head,
                size,
                RecordKind::Insert {
                    key: key.clone(),
                    value: value.clone(),
                },
            );
            match self.table.install(pid, head, delta, guard) {
                Ok(_) => {
                    if size > Self::LEAF_SLOT_MAX {
                        self.split_leaf(pid, guard)?;
                    }
                    return Ok(());
                }
                Err(_) => {
                    self.stats.inc_cas_retries();
                    trace!(pid, "insert lost the install race, retrying");
                }
            }
        }
    }

    /// Replaces `key`'s value list with the single `value`. Updating an
    /// absent key is a silent no-op.
    pub fn update(&self, key: K, value: V) -> Result<()> {
        let guard = &epoch::pin();
        self.ensure_root(guard)?;
        self.stats.inc_updates();
        loop {
            let (pid, head) = self.find_leaf(&key, guard);
            let h = unsafe { head.deref() };
            if !fold::leaf_contains_key(head, &key, &self.comparator, &self.value_eq, guard) {
                return Ok(());
            }
            let delta = self.delta(
                head,
                h.size,
                RecordKind::Update {
                    key: key.clone(),
                    value: value.clone(),
                },
            );
            match self.table.install(pid, head, delta, guard) {
                Ok(_) => return Ok(()),
                Err(_) => {
                    self.stats.inc_cas_retries();
                    trace!(pid, "update lost the install race, retrying");
                }
            }
        }
    }

    /// Removes every value stored under `key`. Deleting an absent key is a
    /// silent no-op.
    pub fn delete_key(&self, key: &K) -> Result<()> {
        let guard = &epoch::pin();
        self.ensure_root(guard)?;
        self.stats.inc_delete_keys();
        loop {
            let (pid, head) = self.find_leaf(key, guard);
            let h = unsafe { head.deref() };
            if !fold::leaf_contains_key(head, key, &self.comparator, &self.value_eq, guard) {
                return Ok(());
            }
            let delta = self.delta(head, h.size - 1, RecordKind::DeleteKey { key: key.clone() });
            match self.table.install(pid, head, delta, guard) {
                Ok(_) => return Ok(()),
                Err(_) => {
                    self.stats.inc_cas_retries();
                    trace!(pid, "delete-key lost the install race, retrying");
                }
            }
        }
    }

    /// Removes one matching value from `key`'s value list, leaving the
    /// others in place.
    pub fn delete_value(&self, key: &K, value: &V) -> Result<()> {
        let guard = &epoch::pin();
        self.ensure_root(guard)?;
        self.stats.inc_delete_values();
        loop {
            let (pid, head) = self.find_leaf(key, guard);
            let h = unsafe { head.deref() };
            let delta = self.delta(
                head,
                h.size,
                RecordKind::DeleteValue {
                    key: key.clone(),
                    value: value.clone(),
                },
            );
            match self.table.install(pid, head, delta, guard) {
                Ok(_) => return Ok(()),
                Err(_) => {
                    self.stats.inc_cas_retries();
                    trace!(pid, "delete-value lost the install race, retrying");
                }
            }
        }
    }

    // =========================================================================
    // Search Engine
    // =========================================================================

    /// Resolves `key` to its owning leaf pid and that leaf's current head.
    ///
    /// Inner pages whose chains have grown past the consolidation threshold
    /// are collapsed on the way down; leaf chains are left to the lookup
    /// path.
    pub(super) fn find_leaf<'g>(
        &self,
        key: &K,
        guard: &'g Guard,
    ) -> (Pid, Shared<'g, Record<K, V>>) {
        let mut pid = self.root.load(Ordering::Acquire);
        loop {
            let mut head = self.table.load(pid, guard);
            let h = unsafe { head.deref() };
            if h.level > 0 && h.chain_length > self.config.delta_chain_threshold {
                self.consolidate(pid, guard);
                head = self.table.load(pid, guard);
            }
            match self.route(head, key, guard) {
                Some(next) => pid = next,
                None => return (pid, head),
            }
        }
    }

    /// Routes `key` one step from the chain at `head`: the pid to move to,
    /// or None when the chain is the owning leaf.
    ///
    /// A split record redirects keys at or above its split key sideways to
    /// the sibling; a separator record short-circuits the descent for keys
    /// inside its range; a base inner routes by binary search.
    fn route<'g>(
        &self,
        head: Shared<'g, Record<K, V>>,
        key: &K,
        guard: &'g Guard,
    ) -> Option<Pid> {
        let mut cur = head;
        loop {
            let rec = unsafe { cur.deref() };
            match &rec.kind {
                RecordKind::Split { key: split_key, sibling } => {
                    if !self.comparator.less(key, split_key) {
                        return Some(*sibling);
                    }
                }
                RecordKind::Separator {
                    low,
                    high,
                    child,
                    rightmost,
                } => {
                    if !self.comparator.less(key, low)
                        && (*rightmost || self.comparator.less(key, high))
                    {
                        return Some(*child);
                    }
                }
                RecordKind::BaseInner(inner) => {
                    let slot = fold::upper_bound(&inner.keys, key, &self.comparator);
                    return Some(inner.children[slot]);
                }
                RecordKind::BaseLeaf(_) => return None,
                _ => {}
            }
            cur = rec.base.load(Ordering::Acquire, guard);
        }
    }

    /// Leftmost leaf pid, by structural descent from the root.
    pub(super) fn leftmost_leaf(&self, guard: &Guard) -> Pid {
        let mut pid = self.root.load(Ordering::Acquire);
        loop {
            if pid == NULL_PID {
                return NULL_PID;
            }
            let head = self.table.load(pid, guard);
            if head.is_null() {
                return NULL_PID;
            }
            match &fold::chain_base(head, guard).kind {
                RecordKind::BaseLeaf(_) => return pid,
                RecordKind::BaseInner(inner) => pid = inner.children[0],
                _ => return NULL_PID,
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Builds a delta record bound to the observed head.
    pub(super) fn delta(
        &self,
        head: Shared<'_, Record<K, V>>,
        size: usize,
        kind: RecordKind<K, V>,
    ) -> Owned<Record<K, V>> {
        let h = unsafe { head.deref() };
        let record = Record {
            level: h.level,
            size,
            chain_length: h.chain_length + 1,
            base: Atomic::null(),
            kind,
        };
        record.base.store(head, Ordering::Relaxed);
        Owned::new(record)
    }

    /// Installs an empty root leaf if the tree has never been used.
    fn ensure_root(&self, guard: &Guard) -> Result<()> {
        if self.root.load(Ordering::Acquire) != NULL_PID {
            return Ok(());
        }
        let pid = self.table.allocate()?;
        self.table
            .publish(pid, Owned::new(Record::base_leaf(BaseLeaf::empty())), guard)?;
        match self
            .root
            .compare_exchange(NULL_PID, pid, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.head_leaf.store(pid, Ordering::Release);
                trace!(pid, "root leaf initialized");
            }
            Err(_) => self.table.retire(pid, guard),
        }
        Ok(())
    }
}
