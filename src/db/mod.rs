//! Database execution capability for the key store.
//!
//! [`KeyDb`] and [`KeyTx`] are the seam between `KeyStore` and storage:
//! - [`postgres::PgKeyDb`]: sqlx over a PostgreSQL/CockroachDB pool
//! - [`memory::InMemoryKeyDb`]: in-process storage with failure injection
//!
//! Every call takes a [`Context`] and aborts when it is cancelled or its
//! deadline passes.

pub mod memory;
pub mod postgres;

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::config::DbConfig;
use crate::context::Context;
use crate::error::DbError;
use crate::models::key::Key;
use crate::severity::DbLog;

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Key table operations outside a transaction.
#[async_trait]
pub trait KeyDb: Send + Sync {
    /// Start a transaction. Fails immediately if no connection can be acquired.
    async fn begin(&self, ctx: &Context) -> Result<Box<dyn KeyTx>, DbError>;

    /// Newest key with this name owned by `account_id`, or `None`.
    async fn find_by_name(
        &self,
        ctx: &Context,
        name: &str,
        account_id: &str,
    ) -> Result<Option<Key>, DbError>;

    /// Whether a non-archived key has this id or this name.
    async fn exists(&self, ctx: &Context, id: Uuid, name: &str) -> Result<bool, DbError>;

    /// Round trip to check connectivity.
    async fn ping(&self, ctx: &Context) -> Result<(), DbError>;
}

/// Writes inside one open transaction.
///
/// Dropping a `KeyTx` without calling [`KeyTx::commit`] rolls it back, so an
/// early return on any error path discards the transaction. A committed
/// transaction is consumed and can no longer be rolled back.
#[async_trait]
pub trait KeyTx: Send {
    /// Insert a new row from `key`. `created_at` and `updated_at` are set to
    /// the current time by the backend. Returns rows affected.
    async fn insert_key(&mut self, ctx: &Context, key: &Key) -> Result<u64, DbError>;

    /// Overwrite name, fingerprint, material, archived and updated_at of the
    /// row with `id`. Returns rows affected.
    async fn update_key(
        &mut self,
        ctx: &Context,
        id: Uuid,
        key: &Key,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, DbError>;

    async fn commit(self: Box<Self>, ctx: &Context) -> Result<(), DbError>;
}

/// Create a new PostgreSQL connection pool.
///
/// sqlx does no statement logging of its own; each implementation reports
/// its statements through [`DbLog`].
///
/// # Errors
///
/// Returns an error if the server cannot be reached or authentication fails.
pub async fn create_pool(config: &DbConfig) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(config.connect_options())
        .await
}

/// Report a finished statement through the bridge and pass the result on.
pub(crate) fn record<T>(
    log: &DbLog,
    sql: &str,
    started: Instant,
    result: Result<T, DbError>,
    rows: impl FnOnce(&T) -> u64,
) -> Result<T, DbError> {
    let elapsed = started.elapsed();
    match &result {
        Ok(value) => log.statement(sql, elapsed, Ok(rows(value))),
        Err(err) => log.statement(sql, elapsed, Err(err)),
    }
    result
}
