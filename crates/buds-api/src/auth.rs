//! Caller-authentication seam (§9d).
//!
//! The relay does not implement phone verification, OTP, or account login —
//! those belong to an external identity-provider collaborator (§1). What it
//! needs to be runnable and testable is the seam itself: a bearer token that
//! resolves to a verified phone number.

use axum::http::{header, Request};
use buds_common::error::RelayError;

/// Caller identity resolved from the bearer token, inserted into request
/// extensions by [`crate::middleware::caller_auth_middleware`].
#[derive(Debug, Clone)]
pub struct CallerContext {
    /// The caller's verified phone number, E.164.
    pub phone: String,
}

/// Pull the raw token out of `Authorization: Bearer <token>`.
pub fn extract_bearer_token<B>(request: &Request<B>) -> Result<&str, RelayError> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(RelayError::AuthFailed)
}

/// Validate the token and resolve it into a [`CallerContext`].
pub fn resolve_caller(token: &str, jwt_secret: &str) -> Result<CallerContext, RelayError> {
    let claims = buds_common::auth::validate_token(token, jwt_secret).map_err(|_| RelayError::AuthFailed)?;
    Ok(CallerContext { phone: claims.phone })
}

/// Encrypt the caller's phone (§4.2), for use as the equality-lookup key
/// into `account_salts` / `phone_to_did` / `devices.owner_encrypted_phone`.
pub fn encrypt_caller_phone(caller: &CallerContext, phone_key: &[u8]) -> Result<String, RelayError> {
    buds_common::crypto::phone::encrypt(&caller.phone, phone_key)
        .map_err(|e| RelayError::Internal(anyhow::anyhow!(e)))
}

/// Resolve the caller's own DID from their authenticated phone (§4.4, used
/// wherever a handler needs "the caller's DID" rather than a DID supplied in
/// the request body — jar backfill/list, message delete/mark-delivered).
pub async fn resolve_caller_did(
    caller: &CallerContext,
    phone_key: &[u8],
    pool: &sqlx::AnyPool,
) -> Result<String, RelayError> {
    let encrypted_phone = encrypt_caller_phone(caller, phone_key)?;
    buds_db::repository::identity::lookup_did(pool, &encrypted_phone)
        .await
        .map_err(RelayError::Internal)?
        .ok_or_else(|| RelayError::not_found("did"))
}
