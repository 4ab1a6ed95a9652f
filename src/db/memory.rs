//! In-memory key store capability.
//!
//! Behaves like the PostgreSQL implementation for the operations the key
//! store uses: writes are staged inside a transaction and only become
//! visible on commit, dropping a transaction discards them, and existence
//! checks skip archived rows. On top of that it can fail any phase on
//! demand, delay every call, and count the work it was asked to do.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{KeyDb, KeyTx, record};
use crate::context::Context;
use crate::error::DbError;
use crate::models::key::Key;
use crate::severity::DbLog;

/// Operation that can be made to fail with [`InMemoryKeyDb::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Begin,
    Insert,
    Update,
    Commit,
    FindByName,
    Exists,
}

#[derive(Debug, Default)]
struct State {
    rows: Vec<Key>,
    failures: Vec<FailPoint>,
    transactions_begun: usize,
    statements_executed: usize,
}

#[derive(Debug, Clone)]
enum Pending {
    Insert {
        key: Key,
        at: DateTime<Utc>,
    },
    Update {
        id: Uuid,
        key: Key,
        updated_at: DateTime<Utc>,
    },
}

/// In-memory implementation of [`KeyDb`].
#[derive(Debug, Clone)]
pub struct InMemoryKeyDb {
    state: Arc<RwLock<State>>,
    latency: Option<Duration>,
    log: DbLog,
}

impl Default for InMemoryKeyDb {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryKeyDb {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            latency: None,
            log: DbLog::disabled(),
        }
    }

    /// Report statements through `log`.
    pub fn with_log(mut self, log: DbLog) -> Self {
        self.log = log;
        self
    }

    /// Delay every call by `latency` before it takes effect.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next call at `point` fail. Calls queue up.
    pub async fn fail_next(&self, point: FailPoint) {
        self.state.write().await.failures.push(point);
    }

    /// Snapshot of every stored row, archived ones included.
    pub async fn rows(&self) -> Vec<Key> {
        self.state.read().await.rows.clone()
    }

    pub async fn transactions_begun(&self) -> usize {
        self.state.read().await.transactions_begun
    }

    /// Statements run inside or outside a transaction, commits excluded.
    pub async fn statements_executed(&self) -> usize {
        self.state.read().await.statements_executed
    }

    async fn enter(&self, point: FailPoint) -> Result<(), DbError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.write().await;
        if let Some(pos) = state.failures.iter().position(|p| *p == point) {
            state.failures.remove(pos);
            return Err(DbError::Backend(format!("simulated {point:?} failure")));
        }

        match point {
            FailPoint::Begin => state.transactions_begun += 1,
            FailPoint::Commit => {}
            _ => state.statements_executed += 1,
        }
        Ok(())
    }
}

#[async_trait]
impl KeyDb for InMemoryKeyDb {
    async fn begin(&self, ctx: &Context) -> Result<Box<dyn KeyTx>, DbError> {
        ctx.run(self.enter(FailPoint::Begin)).await?;
        Ok(Box::new(InMemoryKeyTx {
            db: self.clone(),
            pending: Vec::new(),
        }))
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
                self.enter(FailPoint::FindByName).await?;
                let state = self.state.read().await;
                Ok(state
                    .rows
                    .iter()
                    .filter(|k| k.name == name && k.account_id == account_id)
                    .max_by_key(|k| k.created_at)
                    .cloned())
            })
            .await;

        record(&self.log, "find_key_by_name", started, result, |row| {
            u64::from(row.is_some())
        })
    }

    async fn exists(&self, ctx: &Context, id: Uuid, name: &str) -> Result<bool, DbError> {
        let started = Instant::now();
        let result = ctx
            .run(async {
                self.enter(FailPoint::Exists).await?;
                let state = self.state.read().await;
                Ok(state
                    .rows
                    .iter()
                    .any(|k| !k.archived && (k.id == Some(id) || k.name == name)))
            })
            .await;

        record(&self.log, "key_exists", started, result, |found| {
            u64::from(*found)
        })
    }

    async fn ping(&self, ctx: &Context) -> Result<(), DbError> {
        ctx.run(async {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            Ok(())
        })
        .await
    }
}

/// Transaction over [`InMemoryKeyDb`]; writes are applied on commit.
struct InMemoryKeyTx {
    db: InMemoryKeyDb,
    pending: Vec<Pending>,
}

#[async_trait]
impl KeyTx for InMemoryKeyTx {
    async fn insert_key(&mut self, ctx: &Context, key: &Key) -> Result<u64, DbError> {
        let started = Instant::now();
        let result = ctx.run(self.db.enter(FailPoint::Insert)).await.map(|()| 1);
        let result = record(&self.db.log, "insert_key", started, result, |rows| *rows)?;

        self.pending.push(Pending::Insert {
            key: key.clone(),
            at: Utc::now().trunc_subsecs(6),
        });
        Ok(result)
    }

    async fn update_key(
        &mut self,
        ctx: &Context,
        id: Uuid,
        key: &Key,
        updated_at: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let started = Instant::now();
        let result = ctx
            .run(async {
                self.db.enter(FailPoint::Update).await?;
                let state = self.db.state.read().await;
                Ok(state.rows.iter().filter(|k| k.id == Some(id)).count() as u64)
            })
            .await;
        let rows = record(&self.db.log, "update_key", started, result, |rows| *rows)?;

        self.pending.push(Pending::Update {
            id,
            key: key.clone(),
            updated_at,
        });
        Ok(rows)
    }

    async fn commit(self: Box<Self>, ctx: &Context) -> Result<(), DbError> {
        let InMemoryKeyTx { db, pending } = *self;
        ctx.run(db.enter(FailPoint::Commit)).await?;

        let mut state = db.state.write().await;
        for write in pending {
            match write {
                Pending::Insert { key, at } => state.rows.push(Key {
                    id: Some(Uuid::new_v4()),
                    created_at: Some(at),
                    updated_at: Some(at),
                    ..key
                }),
                Pending::Update {
                    id,
                    key,
                    updated_at,
                } => {
                    if let Some(row) = state.rows.iter_mut().find(|k| k.id == Some(id)) {
                        row.name = key.name;
                        row.fingerprint = key.fingerprint;
                        row.material = key.material;
                        row.archived = key.archived;
                        // TIMESTAMPTZ keeps microseconds.
                        row.updated_at = Some(updated_at.trunc_subsecs(6));
                    }
                }
            }
        }
        Ok(())
    }
}
