//! HTTP request handlers (route handlers).

/// Health check endpoint
pub mod health;
/// Key management endpoints
pub mod keys;

use axum::{
    Router,
    routing::{get, post},
};

use crate::services::key_store::KeyStore;

/// Build the application router with the key store as shared state.
pub fn router(store: KeyStore) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/keys", post(keys::create_key))
        .with_state(store)
}
