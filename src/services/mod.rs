//! Business logic services.
//!
//! Services own transaction boundaries and precondition checks, separated
//! from HTTP handlers and from the storage backend.

pub mod key_store;
