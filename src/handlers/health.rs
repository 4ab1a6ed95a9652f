//! Health check endpoint for service monitoring.

use std::time::Duration;

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{context::Context, error::AppError, services::key_store::KeyStore};

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "timestamp": "2025-12-21T19:00:00Z"
/// }
/// ```
///
/// If the database is unreachable within five seconds the standard error
/// response is returned.
pub async fn health_check(State(store): State<KeyStore>) -> Result<Json<HealthResponse>, AppError> {
    let ctx = Context::background().with_timeout(PING_TIMEOUT);
    store.ping(&ctx).await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        database: "connected".to_string(),
        timestamp: Utc::now(),
    }))
}
