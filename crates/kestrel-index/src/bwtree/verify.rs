//! Structural verification of a live index.
//!
//! Walks the leaf chain and the routing structure of a quiescent tree and
//! reports order, partition, and linkage violations. Intended for tests and
//! offline integrity checks; running it concurrently with writers can
//! produce spurious warnings for in-flight splits.

use crossbeam_epoch as epoch;
use serde::Serialize;
use std::sync::atomic::Ordering;

use super::constants::NULL_PID;
use super::fold;
use super::tree::BwTree;
use super::types::{KeyComparator, ValueEquality};

const MAX_FINDINGS: usize = 32;

/// Indicates the severity of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Non-critical issue, possibly a transient structural state.
    Warning,
    /// Critical issue indicating a broken invariant.
    Error,
}

/// A single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Warning,
            message: message.into(),
        }
    }
}

/// Statistics collected while verifying.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Leaf pages reached through the sibling chain.
    pub leaf_pages: u64,
    /// Distinct keys across all leaves.
    pub keys: u64,
    /// Values across all value lists.
    pub values: u64,
    /// Longest delta chain observed on a leaf head.
    pub max_chain_length: u64,
    /// Tree height at verification time.
    pub height: u64,
}

/// Complete report of a verification pass.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// Whether verification found no errors.
    pub success: bool,
    /// Issues discovered, capped at a fixed limit.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the structures examined.
    pub counts: VerifyCounts,
}

impl<K, V, C, E> BwTree<K, V, C, E>
where
    K: Clone,
    V: Clone,
    C: KeyComparator<K>,
    E: ValueEquality<V>,
{
    /// Checks the order, partition, and linkage invariants of the tree.
    ///
    /// Every folded leaf view must be sorted, keys must ascend across the
    /// sibling chain, and every stored key must route back to the page that
    /// holds it.
    pub fn verify(&self) -> VerifyReport {
        let guard = &epoch::pin();
        let mut findings: Vec<VerifyFinding> = Vec::new();
        let mut counts = VerifyCounts {
            height: self.height(),
            ..VerifyCounts::default()
        };

        if self.root.load(Ordering::Acquire) == NULL_PID {
            return VerifyReport {
                success: true,
                findings,
                counts,
            };
        }

        let mut pid = self.head_leaf.load(Ordering::Acquire);
        if pid == NULL_PID {
            pid = self.leftmost_leaf(guard);
        }
        let mut expected_prev = NULL_PID;
        let mut last_key: Option<K> = None;

        while pid != NULL_PID && findings.len() < MAX_FINDINGS {
            let head = self.table.load(pid, guard);
            if head.is_null() {
                findings.push(VerifyFinding::error(format!("leaf pid {pid} is unbound")));
                break;
            }
            let chain = unsafe { head.deref() }.chain_length as u64;
            counts.max_chain_length = counts.max_chain_length.max(chain);
            counts.leaf_pages += 1;

            let view = fold::fold_leaf(head, &self.comparator, &self.value_eq, guard);
            for pair in view.windows(2) {
                if !self.comparator.less(&pair[0].0, &pair[1].0) {
                    findings.push(VerifyFinding::error(format!(
                        "leaf pid {pid} folded view is out of key order"
                    )));
                    break;
                }
            }
            for (key, values) in &view {
                counts.keys += 1;
                counts.values += values.len() as u64;
                if let Some(last) = &last_key {
                    if !self.comparator.less(last, key) {
                        findings.push(VerifyFinding::error(format!(
                            "key order violated entering leaf pid {pid}"
                        )));
                    }
                }
                last_key = Some(key.clone());

                let (routed, _) = self.find_leaf(key, guard);
                if routed != pid {
                    findings.push(VerifyFinding::error(format!(
                        "key in leaf pid {pid} routes to pid {routed}"
                    )));
                }
                if findings.len() >= MAX_FINDINGS {
                    break;
                }
            }

            let Some(base) = fold::base_leaf(head, guard) else {
                findings.push(VerifyFinding::error(format!(
                    "leaf pid {pid} chain does not end in a base leaf"
                )));
                break;
            };
            let prev = base.prev.load(Ordering::Acquire);
            if prev != expected_prev {
                findings.push(VerifyFinding::warning(format!(
                    "leaf pid {pid} prev link is {prev}, expected {expected_prev}"
                )));
            }
            expected_prev = pid;
            pid = base.next.load(Ordering::Acquire);
        }

        let success = findings
            .iter()
            .all(|f| f.severity != VerifySeverity::Error);
        VerifyReport {
            success,
            findings,
            counts,
        }
    }
}
