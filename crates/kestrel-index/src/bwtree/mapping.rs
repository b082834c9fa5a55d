//! The mapping table: PID → chain-head bindings arbitrated by CAS.

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use std::sync::atomic::{AtomicU64, Ordering};

use kestrel_common::{KestrelError, Result};

use super::node::Record;
use super::types::Pid;

/// Fixed-capacity array of atomic cells indexed by page id, plus the id
/// allocator.
///
/// The table does no chain linking itself; callers wire a new record to the
/// head they observed and ask the table to arbitrate the swap.
pub(crate) struct MappingTable<K, V> {
    cells: Vec<Atomic<Record<K, V>>>,
    next_pid: AtomicU64,
}

impl<K, V> MappingTable<K, V> {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut cells = Vec::with_capacity(capacity);
        cells.resize_with(capacity, Atomic::null);
        Self {
            cells,
            next_pid: AtomicU64::new(1),
        }
    }

    /// Returns a fresh pid. Pids are dense, start at one, and are never
    /// reused; exceeding the table capacity is fatal.
    pub(crate) fn allocate(&self) -> Result<Pid> {
        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        if pid as usize >= self.cells.len() {
            return Err(KestrelError::MappingTableFull {
                pid,
                capacity: self.cells.len(),
            });
        }
        Ok(pid)
    }

    /// Wait-free load of the current chain head bound to `pid`.
    pub(crate) fn load<'g>(&self, pid: Pid, guard: &'g Guard) -> Shared<'g, Record<K, V>> {
        self.cells[pid as usize].load(Ordering::Acquire, guard)
    }

    /// Publishes `new` at `pid` if the cell still holds `expected`. The new
    /// record comes back on failure so the caller can recycle or drop it.
    pub(crate) fn install<'g>(
        &self,
        pid: Pid,
        expected: Shared<'_, Record<K, V>>,
        new: Owned<Record<K, V>>,
        guard: &'g Guard,
    ) -> std::result::Result<Shared<'g, Record<K, V>>, Owned<Record<K, V>>> {
        self.cells[pid as usize]
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire, guard)
            .map_err(|e| e.new)
    }

    /// Binds a freshly allocated pid to its first record.
    pub(crate) fn publish(
        &self,
        pid: Pid,
        record: Owned<Record<K, V>>,
        guard: &Guard,
    ) -> Result<()> {
        self.install(pid, Shared::null(), record, guard)
            .map(|_| ())
            .map_err(|_| KestrelError::Internal(format!("pid {pid} already bound")))
    }

    /// Unbinds `pid` and retires whatever chain it held. Used when a fresh
    /// page loses the race that would have linked it into the tree.
    pub(crate) fn retire(&self, pid: Pid, guard: &Guard) {
        let head = self.cells[pid as usize].swap(Shared::null(), Ordering::AcqRel, guard);
        retire_chain(head, guard);
    }
}

/// Hands every record of `head`'s chain to the epoch reclaimer.
///
/// Safety: the chain was superseded by a CAS, so no new reader can reach it;
/// existing readers stay protected by their own guards until the epoch
/// drains.
pub(crate) fn retire_chain<K, V>(head: Shared<'_, Record<K, V>>, guard: &Guard) {
    let mut cur = head;
    while !cur.is_null() {
        let next = unsafe { cur.deref() }.base.load(Ordering::Relaxed, guard);
        unsafe { guard.defer_destroy(cur) };
        cur = next;
    }
}

impl<K, V> Drop for MappingTable<K, V> {
    fn drop(&mut self) {
        // Safety: &mut self means no concurrent readers remain; records
        // retired earlier are no longer reachable from any cell.
        let guard = unsafe { crossbeam_epoch::unprotected() };
        for cell in &self.cells {
            let mut cur = cell.load(Ordering::Relaxed, guard);
            while !cur.is_null() {
                let next = unsafe { cur.deref() }.base.load(Ordering::Relaxed, guard);
                drop(unsafe { cur.into_owned() });
                cur = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bwtree::node::BaseLeaf;

    #[test]
    fn test_allocate_is_dense_from_one() {
        let table: MappingTable<u64, u64> = MappingTable::new(16);
        assert_eq!(table.allocate().unwrap(), 1);
        assert_eq!(table.allocate().unwrap(), 2);
        assert_eq!(table.allocate().unwrap(), 3);
    }

    #[test]
    fn test_allocate_exhaustion_is_fatal() {
        let table: MappingTable<u64, u64> = MappingTable::new(3);
        assert!(table.allocate().is_ok());
        assert!(table.allocate().is_ok());
        let err = table.allocate().unwrap_err();
        assert!(matches!(err, KestrelError::MappingTableFull { pid: 3, capacity: 3 }));
    }

    #[test]
    fn test_publish_then_load() {
        let table: MappingTable<u64, u64> = MappingTable::new(8);
        let guard = &crossbeam_epoch::pin();
        let pid = table.allocate().unwrap();
        assert!(table.load(pid, guard).is_null());

        table
            .publish(pid, Owned::new(Record::base_leaf(BaseLeaf::empty())), guard)
            .unwrap();
        let head = table.load(pid, guard);
        assert!(!head.is_null());
        assert_eq!(unsafe { head.deref() }.size, 0);
    }

    #[test]
    fn test_install_requires_expected_head() {
        let table: MappingTable<u64, u64> = MappingTable::new(8);
        let guard = &crossbeam_epoch::pin();
        let pid = table.allocate().unwrap();
        table
            .publish(pid, Owned::new(Record::base_leaf(BaseLeaf::empty())), guard)
            .unwrap();

        // CAS against a stale (null) head must fail and return the record
        let stale = Shared::null();
        let lost = table.install(
            pid,
            stale,
            Owned::new(Record::base_leaf(BaseLeaf::empty())),
            guard,
        );
        assert!(lost.is_err());
    }

    #[test]
    fn test_retire_unbinds_cell() {
        let table: MappingTable<u64, u64> = MappingTable::new(8);
        let guard = &crossbeam_epoch::pin();
        let pid = table.allocate().unwrap();
        table
            .publish(pid, Owned::new(Record::base_leaf(BaseLeaf::empty())), guard)
            .unwrap();
        table.retire(pid, guard);
        assert!(table.load(pid, guard).is_null());
    }
}
