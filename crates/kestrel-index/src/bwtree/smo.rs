//! Structural modification: two-phase splits, root growth, consolidation.
//!
//! A split publishes in two steps, each one CAS: first a split record on the
//! overflowing page (keys at or above the split key now live in a freshly
//! published sibling), then a separator record on the parent making the
//! sibling directly reachable. Searches remain correct between the steps by
//! following the split record's side pointer. Consolidation collapses a long
//! chain into a fresh base page and retires the superseded records.

use crossbeam_epoch::{Guard, Owned};
use std::sync::atomic::Ordering;
use tracing::{debug, trace};

use kestrel_common::Result;

use super::constants::NULL_PID;
use super::fold;
use super::mapping;
use super::node::{BaseInner, BaseLeaf, Record, RecordKind};
use super::tree::BwTree;
use super::types::{KeyComparator, Pid, ValueEquality};

impl<K, V, C, E> BwTree<K, V, C, E>
where
    K: Clone,
    V: Clone,
    C: KeyComparator<K>,
    E: ValueEquality<V>,
{
    /// Splits the leaf at `pid` once its logical size exceeds the slot
    /// capacity. Phase 1 publishes the sibling and the split record; phase 2
    /// installs the separator in the parent.
    pub(super) fn split_leaf(&self, pid: Pid, guard: &Guard) -> Result<()> {
        self.maybe_grow_root(pid, guard)?;

        let (split_key, sibling, parent) = loop {
            let head = self.table.load(pid, guard);
            let h = unsafe { head.deref() };
            if h.size <= Self::LEAF_SLOT_MAX {
                // another worker already handled the overflow
                return Ok(());
            }
            let Some(base) = fold::base_leaf(head, guard) else {
                return Ok(());
            };
            let parent = base.parent.load(Ordering::Acquire);
            if parent == NULL_PID {
                // root growth by another worker is still wiring the parent
                std::hint::spin_loop();
                continue;
            }

            let entries = fold::fold_leaf(head, &self.comparator, &self.value_eq, guard);
            if entries.len() < 2 {
                return Ok(());
            }
            let pos = entries.len() / 2;
            let split_key = entries[pos].0.clone();
            let old_next = base.next.load(Ordering::Acquire);

            let sibling_pid = self.table.allocate()?;
            let right = BaseLeaf::new(entries[pos..].to_vec(), pid, old_next, parent);
            self.table
                .publish(sibling_pid, Owned::new(Record::base_leaf(right)), guard)?;

            let delta = self.delta(
                head,
                pos,
                RecordKind::Split {
                    key: split_key.clone(),
                    sibling: sibling_pid,
                },
            );
            match self.table.install(pid, head, delta, guard) {
                Ok(_) => {
                    base.next.store(sibling_pid, Ordering::Release);
                    if old_next != NULL_PID {
                        let next_head = self.table.load(old_next, guard);
                        if let Some(next_base) = fold::base_leaf(next_head, guard) {
                            next_base.prev.store(sibling_pid, Ordering::Release);
                        }
                    }
                    self.stats.inc_leaf_splits();
                    debug!(pid, sibling = sibling_pid, left = pos, "leaf split published");
                    break (split_key, sibling_pid, parent);
                }
                Err(_) => {
                    self.table.retire(sibling_pid, guard);
                    self.stats.inc_cas_retries();
                    trace!(pid, "leaf split lost the install race, retrying");
                }
            }
        };

        self.install_separator(parent, split_key, sibling, guard)
    }

    /// Splits the inner node at `pid`. Same two-phase shape as the leaf
    /// split; additionally re-parents every child that moved to the sibling.
    pub(super) fn split_inner(&self, pid: Pid, guard: &Guard) -> Result<()> {
        self.maybe_grow_root(pid, guard)?;

        let (split_key, sibling, parent) = loop {
            let head = self.table.load(pid, guard);
            let h = unsafe { head.deref() };
            if h.size <= Self::INNER_SLOT_MAX {
                return Ok(());
            }
            let base = fold::chain_base(head, guard);
            let RecordKind::BaseInner(inner) = &base.kind else {
                return Ok(());
            };
            let parent = inner.parent.load(Ordering::Acquire);
            if parent == NULL_PID {
                std::hint::spin_loop();
                continue;
            }

            let view = fold::fold_inner(head, &self.comparator, guard);
            if view.keys.len() < 2 {
                return Ok(());
            }
            let pos = view.keys.len() / 2;
            let split_key = view.keys[pos].clone();
            let old_next = inner.next.load(Ordering::Acquire);

            let sibling_pid = self.table.allocate()?;
            let right_children = view.children[pos + 1..].to_vec();
            let right = BaseInner::new(
                view.keys[pos + 1..].to_vec(),
                right_children.clone(),
                old_next,
                parent,
            );
            self.table
                .publish(sibling_pid, Owned::new(Record::base_inner(h.level, right)), guard)?;

            let delta = self.delta(
                head,
                pos,
                RecordKind::Split {
                    key: split_key.clone(),
                    sibling: sibling_pid,
                },
            );
            match self.table.install(pid, head, delta, guard) {
                Ok(_) => {
                    inner.next.store(sibling_pid, Ordering::Release);
                    for child in &right_children {
                        self.set_parent(*child, sibling_pid, guard);
                    }
                    self.stats.inc_inner_splits();
                    debug!(pid, sibling = sibling_pid, left = pos, "inner split published");
                    break (split_key, sibling_pid, parent);
                }
                Err(_) => {
                    self.table.retire(sibling_pid, guard);
                    self.stats.inc_cas_retries();
                    trace!(pid, "inner split lost the install race, retrying");
                }
            }
        };

        self.install_separator(parent, split_key, sibling, guard)
    }

    /// Phase 2 of a split: makes `child` reachable from `parent_pid` for the
    /// range starting at `split_key`. The upper bound is the smallest
    /// separator above the split key, or the split key itself to signal the
    /// rightmost range. Recurses when the parent itself overflows.
    fn install_separator(
        &self,
        parent_pid: Pid,
        split_key: K,
        child: Pid,
        guard: &Guard,
    ) -> Result<()> {
        loop {
            let head = self.table.load(parent_pid, guard);
            let h = unsafe { head.deref() };
            let view = fold::fold_inner(head, &self.comparator, guard);
            let idx = fold::upper_bound(&view.keys, &split_key, &self.comparator);
            let (high, rightmost) = if idx < view.keys.len() {
                (view.keys[idx].clone(), false)
            } else {
                (split_key.clone(), true)
            };
            let size = h.size + 1;
            let delta = self.delta(
                head,
                size,
                RecordKind::Separator {
                    low: split_key.clone(),
                    high,
                    child,
                    rightmost,
                },
            );
            match self.table.install(parent_pid, head, delta, guard) {
                Ok(_) => {
                    trace!(parent = parent_pid, child, rightmost, "separator installed");
                    if size > Self::INNER_SLOT_MAX {
                        self.split_inner(parent_pid, guard)?;
                    }
                    return Ok(());
                }
                Err(_) => {
                    self.stats.inc_cas_retries();
                    trace!(parent = parent_pid, "separator lost the install race, retrying");
                }
            }
        }
    }

    /// Installs a fresh inner root above `pid` when `pid` is the root about
    /// to split. Losing the root swing means another worker grew the tree;
    /// the orphaned inner page is retired.
    fn maybe_grow_root(&self, pid: Pid, guard: &Guard) -> Result<()> {
        if self.root.load(Ordering::Acquire) != pid {
            return Ok(());
        }
        let head = self.table.load(pid, guard);
        let level = unsafe { head.deref() }.level;

        let root_pid = self.table.allocate()?;
        let inner = BaseInner::new(Vec::new(), vec![pid], NULL_PID, NULL_PID);
        self.table
            .publish(root_pid, Owned::new(Record::base_inner(level + 1, inner)), guard)?;

        match self
            .root
            .compare_exchange(pid, root_pid, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                if let Some(parent) = fold::chain_base(head, guard).parent_cell() {
                    parent.store(root_pid, Ordering::Release);
                }
                self.stats.inc_root_growths();
                debug!(old_root = pid, new_root = root_pid, "root grown");
            }
            Err(_) => self.table.retire(root_pid, guard),
        }
        Ok(())
    }

    /// Collapses the chain at `pid` into a fresh base page of the same kind,
    /// preserving the base's linkage, then retires the superseded chain.
    /// Always safe to skip: a lost CAS abandons the attempt.
    pub(super) fn consolidate(&self, pid: Pid, guard: &Guard) {
        let head = self.table.load(pid, guard);
        if head.is_null() {
            return;
        }
        let h = unsafe { head.deref() };
        if h.chain_length <= self.config.delta_chain_threshold {
            return;
        }

        let replacement = match &fold::chain_base(head, guard).kind {
            RecordKind::BaseLeaf(leaf) => {
                let entries = fold::fold_leaf(head, &self.comparator, &self.value_eq, guard);
                Record::base_leaf(BaseLeaf::new(
                    entries,
                    leaf.prev.load(Ordering::Acquire),
                    leaf.next.load(Ordering::Acquire),
                    leaf.parent.load(Ordering::Acquire),
                ))
            }
            RecordKind::BaseInner(inner) => {
                let view = fold::fold_inner(head, &self.comparator, guard);
                Record::base_inner(
                    h.level,
                    BaseInner::new(
                        view.keys,
                        view.children,
                        inner.next.load(Ordering::Acquire),
                        inner.parent.load(Ordering::Acquire),
                    ),
                )
            }
            _ => return,
        };

        match self.table.install(pid, head, Owned::new(replacement), guard) {
            Ok(_) => {
                mapping::retire_chain(head, guard);
                self.stats.inc_consolidations();
                debug!(pid, chain = h.chain_length, "page consolidated");
            }
            Err(_) => {
                self.stats.inc_consolidation_losses();
                trace!(pid, "consolidation lost the install race, skipped");
            }
        }
    }

    /// Rewrites the parent link of `pid`'s base record after an inner split
    /// moved it under a new parent.
    fn set_parent(&self, pid: Pid, parent: Pid, guard: &Guard) {
        let head = self.table.load(pid, guard);
        if head.is_null() {
            return;
        }
        if let Some(cell) = fold::chain_base(head, guard).parent_cell() {
            cell.store(parent, Ordering::Release);
        }
    }
}
