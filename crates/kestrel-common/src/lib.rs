//! Kestrel common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all Kestrel components.

pub mod config;
pub mod error;
pub mod types;

pub use config::IndexConfig;
pub use error::{KestrelError, Result};
pub use types::ItemPointer;
