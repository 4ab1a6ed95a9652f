//! Key management HTTP handlers.
//!
//! - POST /api/v1/keys - Create new key

use axum::{Json, extract::State, http::StatusCode};

use crate::{
    context::Context,
    error::AppError,
    models::key::{CreateKeyRequest, Key, KeyResponse},
    services::key_store::KeyStore,
};

/// Create a new key.
///
/// # Request Body
///
/// ```json
/// {
///   "name": "deploy",
///   "fingerprint": "SHA256:...",
///   "material": "ssh-ed25519 AAAA...",
///   "account_id": "acct1"
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the stored key, without its material
/// - **400**: missing name or account
/// - **409**: a non-archived key with the same name exists
///
/// The existence check and the insert are separate round trips, so two
/// concurrent requests for one name may both succeed.
pub async fn create_key(
    State(store): State<KeyStore>,
    Json(request): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<KeyResponse>), AppError> {
    if request.name.is_empty() {
        return Err(AppError::InvalidRequest("name is required".to_string()));
    }

    let ctx = Context::background();
    let mut key = Key::from(request);

    if store.exists(&ctx, &key).await? {
        return Err(AppError::KeyExists);
    }

    store.insert(&ctx, &mut key).await?;
    tracing::info!(key_id = ?key.id, account_id = %key.account_id, "Key created");

    Ok((StatusCode::CREATED, Json(key.into())))
}
