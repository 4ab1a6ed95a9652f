//! Data models representing database entities.

/// Key credential model
pub mod key;
