//! Configuration structures for Kestrel.

use crate::error::{KestrelError, Result};
use serde::{Deserialize, Serialize};

/// Default number of mapping-table cells.
pub const DEFAULT_MAPPING_TABLE_CAPACITY: usize = 4_194_304;

/// Default delta-chain length past which a page is consolidated.
pub const DEFAULT_DELTA_CHAIN_THRESHOLD: usize = 8;

/// Configuration for a Kestrel index instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Number of cells in the mapping table. Page-id allocation beyond this
    /// capacity is a fatal error.
    pub mapping_table_capacity: usize,
    /// Delta-chain length past which lookups attempt consolidation.
    pub delta_chain_threshold: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            mapping_table_capacity: DEFAULT_MAPPING_TABLE_CAPACITY,
            delta_chain_threshold: DEFAULT_DELTA_CHAIN_THRESHOLD,
        }
    }
}

impl IndexConfig {
    /// Validates the configuration, returning an error for unusable values.
    pub fn validate(&self) -> Result<()> {
        if self.mapping_table_capacity < 2 {
            return Err(KestrelError::InvalidParameter {
                name: "mapping_table_capacity".to_string(),
                value: self.mapping_table_capacity.to_string(),
            });
        }
        if self.delta_chain_threshold == 0 {
            return Err(KestrelError::InvalidParameter {
                name: "delta_chain_threshold".to_string(),
                value: self.delta_chain_threshold.to_string(),
            });
        }
        Ok(())
    }
}
