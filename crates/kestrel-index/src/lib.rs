//! Latch-free ordered index engine for Kestrel.
//!
//! This crate provides:
//! - A Bw-Tree index: logical pages named by page ids, bound to physical
//!   chain heads through a central mapping table
//! - Delta-chain mutation with single-CAS publication per logical page
//! - Two-phase page splits, root growth, and chain consolidation
//! - Epoch-based reclamation of superseded chains

mod bwtree;

pub use bwtree::{
    BwTree, BwTreeStats, BwTreeStatsSnapshot, EqEquality, KeyComparator, OrdComparator, Pid,
    ValueEquality, VerifyCounts, VerifyFinding, VerifyReport, VerifySeverity, NULL_PID,
};
