//! sqlx implementation of the key store capability.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use super::{DbPool, KeyDb, KeyTx, record};
use crate::context::Context;
use crate::error::DbError;
use crate::models::key::Key;
use crate::severity::{DbLog, DbLogLevel, LogFields};

const INSERT_KEY: &str = r#"
INSERT INTO tsg_keys (name, fingerprint, material, account_id, archived, created_at, updated_at)
VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
"#;

const UPDATE_KEY: &str = r#"
UPDATE tsg_keys SET (name, fingerprint, material, archived, updated_at) = ($2, $3, $4, $5, $6)
WHERE id = $1
"#;

// Newest first: archived rows may share the name.
const FIND_KEY_BY_NAME: &str = r#"
SELECT id, name, fingerprint, material, account_id, archived, created_at, updated_at
FROM tsg_keys
WHERE name = $1 AND account_id = $2
ORDER BY created_at DESC
LIMIT 1
"#;

const KEY_EXISTS: &str = r#"
SELECT 1 FROM tsg_keys
WHERE (id = $1 OR name = $2) AND archived = false
LIMIT 1
"#;

/// Key store backed by a sqlx connection pool.
#[derive(Debug, Clone)]
pub struct PgKeyDb {
    pool: DbPool,
    log: DbLog,
}

impl PgKeyDb {
    pub fn new(pool: DbPool, log: DbLog) -> Self {
        Self { pool, log }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl KeyDb for PgKeyDb {
    async fn begin(&self, ctx: &Context) -> Result<Box<dyn KeyTx>, DbError> {
        let tx = ctx
            .run(async { self.pool.begin().await.map_err(DbError::from) })
            .await;

        match tx {
            Ok(tx) => {
                self.log.emit(DbLogLevel::Debug, "Begin", LogFields::new());
                Ok(Box::new(PgKeyTx {
                    tx,
                    log: self.log.clone(),
                }))
            }
            Err(err) => {
                let mut fields = LogFields::new();
                fields.insert("err".to_string(), json!(err.to_string()));
                self.log.emit(DbLogLevel::Error, "Begin", fields);
                Err(err)
            }
        }
    }

    async fn find_by_name(
        &self,
        ctx: &Context,
        name: &str,
        account_id: &str,
    ) -> Result<Option<Key>, DbError> {
        let started = Instant::now();
        let result = ctx
            .run(async {
                sqlx::query_as::<_, Key>(FIND_KEY_BY_NAME)
                    .bind(name)
                    .bind(account_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(DbError::from)
            })
            .await;

        record(&self.log, FIND_KEY_BY_NAME, started, result, |row| {
            u64::from(row.is_some())
        })
    }

    async fn exists(&self, ctx: &Context, id: Uuid, name: &str) -> Result<bool, DbError> {
        let started = Instant::now();
        let result = ctx
            .run(async {
                sqlx::query_scalar::<_, i32>(KEY_EXISTS)
                    .bind(id)
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(DbError::from)
            })
            .await;

        record(&self.log, KEY_EXISTS, started, result, |row| {
            u64::from(row.is_some())
        })
        .map(|row| row.is_some())
    }

    async fn ping(&self, ctx: &Context) -> Result<(), DbError> {
        ctx.run(async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(DbError::from)
        })
        .await
    }
}

/// Open sqlx transaction. sqlx rolls it back when dropped uncommitted.
struct PgKeyTx {
    tx: Transaction<'static, Postgres>,
    log: DbLog,
}

#[async_trait]
impl KeyTx for PgKeyTx {
    async fn insert_key(&mut self, ctx: &Context, key: &Key) -> Result<u64, DbError> {
        let started = Instant::now();
        let tx = &mut self.tx;
        let result = ctx
            .run(async {
                sqlx::query(INSERT_KEY)
                    .bind(&key.name)
                    .bind(&key.fingerprint)
                    .bind(&key.material)
                    .bind(&key.account_id)
                    .bind(key.archived)
                    .execute(&mut **tx)
                    .await
                    .map(|done| done.rows_affected())
                    .map_err(DbError::from)
            })
            .await;

        record(&self.log, INSERT_KEY, started, result, |rows| *rows)
    }

    async fn update_key(
        &mut self,
        ctx: &Context,
        id: Uuid,
        key: &Key,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let started = Instant::now();
        let tx = &mut self.tx;
        let result = ctx
            .run(async {
                sqlx::query(UPDATE_KEY)
                    .bind(id)
                    .bind(&key.name)
                    .bind(&key.fingerprint)
                    .bind(&key.material)
                    .bind(key.archived)
                    .bind(updated_at)
                    .execute(&mut **tx)
                    .await
                    .map(|done| done.rows_affected())
                    .map_err(DbError::from)
            })
            .await;

        record(&self.log, UPDATE_KEY, started, result, |rows| *rows)
    }

    async fn commit(self: Box<Self>, ctx: &Context) -> Result<(), DbError> {
        let PgKeyTx { tx, log } = *self;
        let result = ctx
            .run(async { tx.commit().await.map_err(DbError::from) })
            .await;

        match &result {
            Ok(()) => log.emit(DbLogLevel::Debug, "Commit", LogFields::new()),
            Err(err) => {
                let mut fields = LogFields::new();
                fields.insert("err".to_string(), json!(err.to_string()));
                log.emit(DbLogLevel::Error, "Commit", fields);
            }
        }
        result
    }
}
