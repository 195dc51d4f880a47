//! Caller-authentication seam (§9d).
//!
//! The relay does not implement phone verification, OTP, or account login —
//! those belong to an external collaborator. What the relay needs is the
//! seam: a bearer token whose claims carry a verified phone number. This
//! module defines that minimal claim shape and its validation; a real
//! deployment's identity provider issues the tokens this decodes.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a caller-auth bearer token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CallerClaims {
    /// The caller's verified phone number, E.164.
    pub phone: String,
    /// Issued at (Unix timestamp, seconds).
    pub iat: i64,
    /// Expiration (Unix timestamp, seconds).
    pub exp: i64,
}

/// Validate and decode a caller-auth bearer token.
pub fn validate_token(token: &str, secret: &str) -> Result<CallerClaims, jsonwebtoken::errors::Error> {
    let token_data = decode::<CallerClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}
