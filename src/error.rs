//! Error types and HTTP error response handling.
//!
//! Errors are layered the same way the code is:
//! - `DbError`: a failure reported by the database execution capability
//! - `KeyError`: a key store operation failed, tagged with the failing phase
//! - `ConfigError`: startup configuration could not be loaded
//! - `AppError`: what HTTP handlers return, converted into JSON responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Failure reported by a [`KeyDb`](crate::db::KeyDb) implementation.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The driver reported an error (connection, query, protocol).
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// The caller's context was cancelled while the call was in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's context deadline passed while the call was in flight.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A backend that is not sqlx reported a failure.
    #[error("{0}")]
    Backend(String),
}

/// Key store operation failure.
///
/// The first three variants are precondition failures: they are returned
/// before any database round trip. Every other variant names the phase that
/// failed and carries the underlying [`DbError`].
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("missing account identifier for insert")]
    MissingAccountId,

    #[error("missing identifier for save")]
    MissingId,

    #[error("can't check existence without id or name")]
    MissingIdentity,

    #[error("failed to begin transaction: {0}")]
    Begin(#[source] DbError),

    #[error("failed to insert key: {0}")]
    Insert(#[source] DbError),

    #[error("failed to update key: {0}")]
    Update(#[source] DbError),

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] DbError),

    #[error("failed to find key after insert: {0}")]
    Lookup(#[source] DbError),

    /// The insert committed but the read-back by `(name, account_id)`
    /// matched nothing.
    #[error("failed to find key after insert: no row for name {name:?}")]
    NotFoundAfterInsert { name: String },

    #[error("failed to check key existence: {0}")]
    Exists(#[source] DbError),

    #[error("failed to find key by name: {0}")]
    Find(#[source] DbError),
}

impl KeyError {
    /// True for errors raised before touching the database.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            KeyError::MissingAccountId | KeyError::MissingId | KeyError::MissingIdentity
        )
    }
}

/// Startup configuration failure. The process must not continue past one.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported log level: {0:?}")]
    UnsupportedLogLevel(String),

    #[error("unsupported log format: {0:?}")]
    UnsupportedLogFormat(String),

    #[error("failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),
}

/// Error type returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A key store operation failed.
    #[error(transparent)]
    Key(#[from] KeyError),

    /// A non-archived key with the same name already exists.
    #[error("Key already exists")]
    KeyExists,

    /// Database health check failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Request body or parameters are invalid.
    #[error("Invalid request")]
    InvalidRequest(String),
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// # Status Code Mapping
///
/// - Precondition `Key` errors and `InvalidRequest` → 400 Bad Request
/// - `KeyExists` → 409 Conflict
/// - Other `Key` errors and `Database` → 500 Internal Server Error (details hidden)
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Key(ref err) if err.is_precondition() => {
                (StatusCode::BAD_REQUEST, "invalid_request", err.to_string())
            }
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::KeyExists => (StatusCode::CONFLICT, "key_exists", self.to_string()),
            AppError::Key(ref err) => {
                tracing::error!(error = %err, "Key store operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Database(ref err) => {
                tracing::error!(error = %err, "Database check failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
