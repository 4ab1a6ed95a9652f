//! Key data model and API request/response types.
//!
//! This module defines:
//! - `Key`: a named credential record stored in the `tsg_keys` table
//! - `CreateKeyRequest`: Request body for creating keys
//! - `KeyResponse`: Response body returned to clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier substituted for a missing key id in existence checks.
///
/// No row is ever assigned the nil UUID, so `id = $1` never matches and the
/// check degenerates to a name match.
pub const SENTINEL_KEY_ID: Uuid = Uuid::nil();

/// Represents a key record.
///
/// # Database Table
///
/// Maps to the `tsg_keys` table with columns:
/// - `id`: generated UUID
/// - `name`, `fingerprint`, `material`: caller supplied text
/// - `account_id`: owning account
/// - `archived`: soft-delete flag
/// - `created_at`, `updated_at`: set by the store
///
/// # Lifecycle
///
/// A key starts with only caller-supplied fields. A successful insert sets
/// `id`, `created_at` and `updated_at` from the stored row. Archiving is a
/// save with `archived = true`; keys are never hard deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct Key {
    /// Row identifier, `None` until the key has been inserted.
    pub id: Option<Uuid>,

    /// Display name, unique among non-archived keys.
    ///
    /// Uniqueness is advisory: it is checked with `KeyStore::exists` before
    /// insert, not enforced by the database.
    pub name: String,

    pub fingerprint: String,

    pub material: String,

    /// Owning account. Required for insert.
    pub account_id: String,

    /// Archived keys are excluded from existence checks but stay in storage.
    pub archived: bool,

    /// Set once when the row is created.
    pub created_at: Option<DateTime<Utc>>,

    /// Set on every successful write.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Key {
    /// An empty, unpersisted key.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Request body for creating a new key.
///
/// # JSON Example
///
/// ```json
/// {
///   "name": "deploy",
///   "fingerprint": "SHA256:nThbg6kXUpJWGl7E1IGOCspRomTxdCARLviKw6E5SY8",
///   "material": "ssh-ed25519 AAAA...",
///   "account_id": "acct1"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,

    #[serde(default)]
    pub fingerprint: String,

    #[serde(default)]
    pub material: String,

    pub account_id: String,
}

impl From<CreateKeyRequest> for Key {
    fn from(request: CreateKeyRequest) -> Self {
        Self {
            name: request.name,
            fingerprint: request.fingerprint,
            material: request.material,
            account_id: request.account_id,
            ..Self::default()
        }
    }
}

/// Response body for key endpoints.
///
/// Key material is never returned.
#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub id: Option<Uuid>,
    pub name: String,
    pub fingerprint: String,
    pub account_id: String,
    pub archived: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Key> for KeyResponse {
    fn from(key: Key) -> Self {
        Self {
            id: key.id,
            name: key.name,
            fingerprint: key.fingerprint,
            account_id: key.account_id,
            archived: key.archived,
            created_at: key.created_at,
            updated_at: key.updated_at,
        }
    }
}
