use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of Bw-Tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy)]
pub struct BwTreeStatsSnapshot {
    /// Number of insert operations started
    pub inserts: u64,
    /// Number of update operations started
    pub updates: u64,
    /// Number of delete-key operations started
    pub delete_keys: u64,
    /// Number of delete-value operations started
    pub delete_values: u64,
    /// Number of lookups performed
    pub lookups: u64,
    /// Number of leaf page splits published
    pub leaf_splits: u64,
    /// Number of inner page splits published
    pub inner_splits: u64,
    /// Number of times the root was replaced by a new inner page
    pub root_growths: u64,
    /// Number of chains collapsed into a fresh base page
    pub consolidations: u64,
    /// Number of consolidation attempts abandoned after a lost CAS
    pub consolidation_losses: u64,
    /// Number of lost CAS installs across all operations
    pub cas_retries: u64,
}

/// Thread-safe statistics tracking for Bw-Tree operations.
#[derive(Default)]
pub struct BwTreeStats {
    inserts: AtomicU64,
    updates: AtomicU64,
    delete_keys: AtomicU64,
    delete_values: AtomicU64,
    lookups: AtomicU64,
    leaf_splits: AtomicU64,
    inner_splits: AtomicU64,
    root_growths: AtomicU64,
    consolidations: AtomicU64,
    consolidation_losses: AtomicU64,
    cas_retries: AtomicU64,
}

impl BwTreeStats {
    pub(crate) fn inc_inserts(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_updates(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_delete_keys(&self) {
        self.delete_keys.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_delete_values(&self) {
        self.delete_values.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_lookups(&self) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_leaf_splits(&self) {
        self.leaf_splits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_inner_splits(&self) {
        self.inner_splits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_root_growths(&self) {
        self.root_growths.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_consolidations(&self) {
        self.consolidations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_consolidation_losses(&self) {
        self.consolidation_losses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_cas_retries(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> BwTreeStatsSnapshot {
        BwTreeStatsSnapshot {
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            delete_keys: self.delete_keys.load(Ordering::Relaxed),
            delete_values: self.delete_values.load(Ordering::Relaxed),
            lookups: self.lookups.load(Ordering::Relaxed),
            leaf_splits: self.leaf_splits.load(Ordering::Relaxed),
            inner_splits: self.inner_splits.load(Ordering::Relaxed),
            root_growths: self.root_growths.load(Ordering::Relaxed),
            consolidations: self.consolidations.load(Ordering::Relaxed),
            consolidation_losses: self.consolidation_losses.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "kestrel_index::stats",
            inserts = snapshot.inserts,
            updates = snapshot.updates,
            delete_keys = snapshot.delete_keys,
            delete_values = snapshot.delete_values,
            lookups = snapshot.lookups,
            leaf_splits = snapshot.leaf_splits,
            inner_splits = snapshot.inner_splits,
            root_growths = snapshot.root_growths,
            consolidations = snapshot.consolidations,
            consolidation_losses = snapshot.consolidation_losses,
            cas_retries = snapshot.cas_retries,
            "bwtree stats snapshot"
        );
    }
}
