//! Error types for Kestrel.

use thiserror::Error;

/// Result type alias using KestrelError.
pub type Result<T> = std::result::Result<T, KestrelError>;

/// Errors that can occur in Kestrel operations.
///
/// Transient CAS losses inside the index are recovered locally and never
/// surface here; the variants below are the fatal or caller-visible cases.
#[derive(Debug, Error)]
pub enum KestrelError {
    #[error("mapping table exhausted: pid {pid} exceeds capacity {capacity}")]
    MappingTableFull { pid: u64, capacity: usize },

    #[error("invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    #[error("comparator violation: {0}")]
    ComparatorViolation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_table_full_display() {
        let err = KestrelError::MappingTableFull {
            pid: 4_194_305,
            capacity: 4_194_304,
        };
        assert_eq!(
            err.to_string(),
            "mapping table exhausted: pid 4194305 exceeds capacity 4194304"
        );
    }

    #[test]
    fn test_invalid_parameter_display() {
        let err = KestrelError::InvalidParameter {
            name: "mapping_table_capacity".to_string(),
            value: "0".to_string(),
        };
        assert_eq!(err.to_string(), "invalid parameter: mapping_table_capacity = 0");
    }

    #[test]
    fn test_comparator_violation_display() {
        let err = KestrelError::ComparatorViolation("not a strict weak order".to_string());
        assert_eq!(err.to_string(), "comparator violation: not a strict weak order");
    }

    #[test]
    fn test_internal_error_display() {
        let err = KestrelError::Internal("chain without base".to_string());
        assert_eq!(err.to_string(), "internal error: chain without base");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(KestrelError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KestrelError>();
    }
}
