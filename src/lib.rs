//! Persistence for `Key` credential records plus the bridge between the
//! application's log severity and the database client's logger.

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod services;
pub mod severity;
