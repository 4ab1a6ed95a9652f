//! Key store - persistence rules for the `Key` record.
//!
//! This service handles:
//! - Precondition checks before any database round trip
//! - One transaction per write, rolled back on every early return
//! - Read-back of generated columns after insert
//! - Advisory existence checks that ignore archived keys
//!
//! # Uniqueness
//!
//! Names are unique among non-archived keys only by convention. Callers run
//! [`KeyStore::exists`] before [`KeyStore::insert`]; the two are not atomic,
//! so concurrent inserts of the same name can both succeed.

use std::sync::Arc;

use chrono::{SubsecRound, Utc};

use crate::context::Context;
use crate::db::KeyDb;
use crate::error::{DbError, KeyError};
use crate::models::key::{Key, SENTINEL_KEY_ID};

#[derive(Clone)]
pub struct KeyStore {
    db: Arc<dyn KeyDb>,
}

impl KeyStore {
    pub fn new(db: Arc<dyn KeyDb>) -> Self {
        Self { db }
    }

    /// Insert a new key.
    ///
    /// # Process
    ///
    /// 1. Require `account_id`
    /// 2. Begin a transaction, insert the row, commit
    /// 3. Look the row up by `(name, account_id)` after commit
    /// 4. Copy `id`, `created_at` and `updated_at` from the stored row
    ///
    /// The key is left untouched unless every step succeeds.
    ///
    /// # Errors
    ///
    /// - `MissingAccountId`: `account_id` is empty (no database access)
    /// - `Begin`, `Insert`, `Commit`: the named transaction phase failed
    /// - `Lookup`, `NotFoundAfterInsert`: the read-back failed
    pub async fn insert(&self, ctx: &Context, key: &mut Key) -> Result<(), KeyError> {
        if key.account_id.is_empty() {
            return Err(KeyError::MissingAccountId);
        }

        let mut tx = self.db.begin(ctx).await.map_err(KeyError::Begin)?;
        tx.insert_key(ctx, key).await.map_err(KeyError::Insert)?;
        tx.commit(ctx).await.map_err(KeyError::Commit)?;

        let stored = self
            .db
            .find_by_name(ctx, &key.name, &key.account_id)
            .await
            .map_err(KeyError::Lookup)?
            .ok_or_else(|| KeyError::NotFoundAfterInsert {
                name: key.name.clone(),
            })?;

        key.id = stored.id;
        key.created_at = stored.created_at;
        key.updated_at = stored.updated_at;

        tracing::debug!(key_id = ?key.id, name = %key.name, "Key inserted");
        Ok(())
    }

    /// Persist the mutable fields of an inserted key.
    ///
    /// Writes name, fingerprint, material and archived, and stamps
    /// `updated_at` with the time captured before the write. `created_at`
    /// is never written. Archiving a key is a save with `archived = true`.
    ///
    /// # Errors
    ///
    /// - `MissingId`: the key was never inserted (no database access)
    /// - `Begin`, `Update`, `Commit`: the named transaction phase failed
    pub async fn save(&self, ctx: &Context, key: &mut Key) -> Result<(), KeyError> {
        let id = key.id.ok_or(KeyError::MissingId)?;
        // Same precision the database stores, so the key matches its row.
        let updated_at = Utc::now().trunc_subsecs(6);

        let mut tx = self.db.begin(ctx).await.map_err(KeyError::Begin)?;
        let rows = tx
            .update_key(ctx, id, key, updated_at)
            .await
            .map_err(KeyError::Update)?;
        tx.commit(ctx).await.map_err(KeyError::Commit)?;

        if rows == 0 {
            tracing::warn!(key_id = %id, "Save matched no rows");
        }

        key.updated_at = Some(updated_at);
        Ok(())
    }

    /// Whether a non-archived key with this key's id or name exists.
    ///
    /// A missing id is replaced by [`SENTINEL_KEY_ID`], which matches no
    /// row, so the check becomes a name match.
    ///
    /// # Errors
    ///
    /// - `MissingIdentity`: neither name nor id is set (no database access)
    /// - `Exists`: the query failed; "no rows" is `Ok(false)`, not an error
    pub async fn exists(&self, ctx: &Context, key: &Key) -> Result<bool, KeyError> {
        if key.name.is_empty() && key.id.is_none() {
            return Err(KeyError::MissingIdentity);
        }

        let id = key.id.unwrap_or(SENTINEL_KEY_ID);
        self.db
            .exists(ctx, id, &key.name)
            .await
            .map_err(KeyError::Exists)
    }

    /// Newest key named `name` owned by `account_id`, archived or not.
    pub async fn find_by_name(
        &self,
        ctx: &Context,
        name: &str,
        account_id: &str,
    ) -> Result<Option<Key>, KeyError> {
        self.db
            .find_by_name(ctx, name, account_id)
            .await
            .map_err(KeyError::Find)
    }

    /// Check that the backing database is reachable.
    pub async fn ping(&self, ctx: &Context) -> Result<(), DbError> {
        self.db.ping(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{FailPoint, InMemoryKeyDb};
    use crate::severity::tests::CapturingLogger;
    use crate::severity::{DbLog, DbLogLevel};
    use std::time::Duration;

    fn store() -> (KeyStore, InMemoryKeyDb) {
        let db = InMemoryKeyDb::new();
        (KeyStore::new(Arc::new(db.clone())), db)
    }

    fn new_key(name: &str, account_id: &str) -> Key {
        Key {
            name: name.to_string(),
            fingerprint: "SHA256:abc".to_string(),
            material: "ssh-ed25519 AAAA".to_string(),
            account_id: account_id.to_string(),
            ..Key::default()
        }
    }

    #[tokio::test]
    async fn insert_requires_account_id() {
        let (store, db) = store();
        let ctx = Context::background();
        let mut key = new_key("foo", "");

        let err = store.insert(&ctx, &mut key).await.unwrap_err();

        assert!(matches!(err, KeyError::MissingAccountId));
        assert_eq!(db.transactions_begun().await, 0);
        assert_eq!(db.statements_executed().await, 0);
        assert!(key.id.is_none());
    }

    #[tokio::test]
    async fn save_requires_id() {
        let (store, db) = store();
        let ctx = Context::background();
        let mut key = new_key("foo", "acct1");

        let err = store.save(&ctx, &mut key).await.unwrap_err();

        assert!(matches!(err, KeyError::MissingId));
        assert_eq!(db.transactions_begun().await, 0);
        assert_eq!(db.statements_executed().await, 0);
        assert!(key.updated_at.is_none());
    }

    #[tokio::test]
    async fn exists_requires_name_or_id() {
        let (store, db) = store();
        let ctx = Context::background();

        let err = store.exists(&ctx, &Key::new()).await.unwrap_err();

        assert!(matches!(err, KeyError::MissingIdentity));
        assert_eq!(db.statements_executed().await, 0);
    }

    #[tokio::test]
    async fn exists_is_false_without_match() {
        let (store, _db) = store();
        let ctx = Context::background();
        let lookup = Key {
            name: "foo".to_string(),
            ..Key::default()
        };

        assert!(!store.exists(&ctx, &lookup).await.unwrap());
    }

    #[tokio::test]
    async fn insert_populates_generated_fields() {
        let (store, db) = store();
        let ctx = Context::background();
        let mut key = new_key("foo", "acct1");

        store.insert(&ctx, &mut key).await.unwrap();

        let row = db.rows().await.pop().unwrap();
        assert_eq!(key.id, row.id);
        assert!(key.id.is_some());
        assert_eq!(key.created_at, row.created_at);
        assert_eq!(key.updated_at, row.updated_at);
        assert!(key.created_at.is_some());

        let lookup = Key {
            name: "foo".to_string(),
            ..Key::default()
        };
        assert!(store.exists(&ctx, &lookup).await.unwrap());
    }

    #[tokio::test]
    async fn exists_matches_by_id_alone() {
        let (store, _db) = store();
        let ctx = Context::background();
        let mut key = new_key("foo", "acct1");
        store.insert(&ctx, &mut key).await.unwrap();

        let lookup = Key {
            id: key.id,
            ..Key::default()
        };
        assert!(store.exists(&ctx, &lookup).await.unwrap());
    }

    #[tokio::test]
    async fn save_advances_updated_at_only() {
        let (store, db) = store();
        let ctx = Context::background();
        let mut key = new_key("foo", "acct1");
        store.insert(&ctx, &mut key).await.unwrap();
        let created_at = key.created_at;
        let inserted_at = key.updated_at;

        tokio::time::sleep(Duration::from_millis(2)).await;
        key.fingerprint = "SHA256:def".to_string();
        store.save(&ctx, &mut key).await.unwrap();

        assert!(key.updated_at > inserted_at);
        assert_eq!(key.created_at, created_at);

        let row = db.rows().await.pop().unwrap();
        assert_eq!(row.fingerprint, "SHA256:def");
        assert_eq!(row.created_at, created_at);
        assert_eq!(row.updated_at, key.updated_at);
    }

    #[tokio::test]
    async fn saved_key_matches_stored_row() {
        let (store, db) = store();
        let ctx = Context::background();
        let mut key = new_key("foo", "acct1");
        store.insert(&ctx, &mut key).await.unwrap();

        key.material = "ssh-ed25519 BBBB".to_string();
        store.save(&ctx, &mut key).await.unwrap();

        let updated_at = key.updated_at.unwrap();
        assert_eq!(updated_at.timestamp_subsec_nanos() % 1_000, 0);
        assert_eq!(db.rows().await.pop().unwrap(), key);
    }

    #[tokio::test]
    async fn archived_keys_do_not_exist() {
        let (store, db) = store();
        let ctx = Context::background();
        let mut key = new_key("foo", "acct1");
        store.insert(&ctx, &mut key).await.unwrap();

        key.archived = true;
        store.save(&ctx, &mut key).await.unwrap();

        let lookup = Key {
            name: "foo".to_string(),
            ..Key::default()
        };
        assert!(!store.exists(&ctx, &lookup).await.unwrap());
        // Soft delete: the row is still stored.
        assert_eq!(db.rows().await.len(), 1);
    }

    #[tokio::test]
    async fn insert_commit_failure_leaves_key_untouched() {
        let (store, db) = store();
        let ctx = Context::background();
        db.fail_next(FailPoint::Commit).await;
        let mut key = new_key("foo", "acct1");
        let before = key.clone();

        let err = store.insert(&ctx, &mut key).await.unwrap_err();

        assert!(matches!(err, KeyError::Commit(_)));
        assert!(err.to_string().starts_with("failed to commit transaction"));
        assert_eq!(key, before);
        assert!(db.rows().await.is_empty());
    }

    #[tokio::test]
    async fn save_commit_failure_leaves_key_untouched() {
        let (store, db) = store();
        let ctx = Context::background();
        let mut key = new_key("foo", "acct1");
        store.insert(&ctx, &mut key).await.unwrap();

        db.fail_next(FailPoint::Commit).await;
        key.archived = true;
        let before = key.clone();

        let err = store.save(&ctx, &mut key).await.unwrap_err();

        assert!(matches!(err, KeyError::Commit(_)));
        assert_eq!(key, before);
        assert!(!db.rows().await[0].archived);
    }

    #[tokio::test]
    async fn errors_are_tagged_with_phase() {
        let (store, db) = store();
        let ctx = Context::background();

        db.fail_next(FailPoint::Begin).await;
        let err = store
            .insert(&ctx, &mut new_key("a", "acct1"))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyError::Begin(_)));

        db.fail_next(FailPoint::Insert).await;
        let err = store
            .insert(&ctx, &mut new_key("b", "acct1"))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyError::Insert(_)));

        db.fail_next(FailPoint::FindByName).await;
        let mut key = new_key("c", "acct1");
        let err = store.insert(&ctx, &mut key).await.unwrap_err();
        assert!(matches!(err, KeyError::Lookup(_)));
        assert!(key.id.is_none());

        let mut key = new_key("d", "acct1");
        store.insert(&ctx, &mut key).await.unwrap();
        db.fail_next(FailPoint::Update).await;
        let err = store.save(&ctx, &mut key).await.unwrap_err();
        assert!(matches!(err, KeyError::Update(_)));

        db.fail_next(FailPoint::Exists).await;
        let err = store.exists(&ctx, &key).await.unwrap_err();
        assert!(matches!(err, KeyError::Exists(_)));
    }

    #[tokio::test]
    async fn cancelled_context_aborts_before_begin() {
        let (store, db) = store();
        let ctx = Context::background();
        ctx.cancel();

        let err = store
            .insert(&ctx, &mut new_key("foo", "acct1"))
            .await
            .unwrap_err();

        assert!(matches!(err, KeyError::Begin(DbError::Cancelled)));
        assert_eq!(db.transactions_begun().await, 0);
    }

    #[tokio::test]
    async fn deadline_aborts_slow_backend() {
        let db = InMemoryKeyDb::new().with_latency(Duration::from_millis(200));
        let store = KeyStore::new(Arc::new(db.clone()));
        let ctx = Context::background().with_timeout(Duration::from_millis(10));

        let lookup = Key {
            name: "foo".to_string(),
            ..Key::default()
        };
        let err = store.exists(&ctx, &lookup).await.unwrap_err();

        assert!(matches!(err, KeyError::Exists(DbError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn duplicate_names_are_not_rejected_by_insert() {
        let (store, db) = store();
        let ctx = Context::background();

        store
            .insert(&ctx, &mut new_key("foo", "acct1"))
            .await
            .unwrap();
        store
            .insert(&ctx, &mut new_key("foo", "acct1"))
            .await
            .unwrap();

        assert_eq!(db.rows().await.len(), 2);
    }

    #[tokio::test]
    async fn statements_are_reported_through_bridge() {
        let logger = Arc::new(CapturingLogger::default());
        let db = InMemoryKeyDb::new().with_log(DbLog::new(DbLogLevel::Trace, logger.clone()));
        let store = KeyStore::new(Arc::new(db));
        let ctx = Context::background();

        store
            .insert(&ctx, &mut new_key("foo", "acct1"))
            .await
            .unwrap();

        let entries = logger.entries.lock().unwrap();
        let sql: Vec<_> = entries
            .iter()
            .map(|(_, _, fields)| fields["sql"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(sql, ["insert_key", "find_key_by_name"]);
        assert!(entries.iter().all(|(level, msg, _)| {
            *level == DbLogLevel::Info && msg == "Exec"
        }));
    }
}
