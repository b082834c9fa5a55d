//! Shared value types for Kestrel indexes.

use serde::{Deserialize, Serialize};

/// Location of a record in its enclosing storage: a block number plus the
/// slot offset within that block.
///
/// This is the canonical value type stored in Kestrel indexes; two pointers
/// are equal exactly when both coordinates match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemPointer {
    /// Block number within the owning storage.
    pub block: u32,
    /// Slot offset within the block.
    pub offset: u32,
}

impl ItemPointer {
    /// Creates a new item pointer.
    pub fn new(block: u32, offset: u32) -> Self {
        Self { block, offset }
    }
}

impl std::fmt::Display for ItemPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.block, self.offset)
    }
}
