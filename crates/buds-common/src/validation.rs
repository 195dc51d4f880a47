//! Input validation utilities (§6).
//!
//! Centralized validation helpers used across API routes.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use validator::Validate;

use crate::error::RelayError;

/// Validate a request body, returning a RelayError::Validation on failure.
pub fn validate_request<T: Validate>(body: &T) -> Result<(), RelayError> {
    body.validate().map_err(|e| RelayError::Validation { message: format_validation_errors(e) })
}

/// Format validation errors into a human-readable string.
fn format_validation_errors(errors: validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("Invalid value for '{field}'"))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// `did:phone:<64 lowercase hex>` or the legacy `did:buds:<1-44 base58 chars>`.
pub fn is_valid_did(did: &str) -> bool {
    if let Some(rest) = did.strip_prefix("did:phone:") {
        return rest.len() == 64 && rest.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase());
    }
    if let Some(rest) = did.strip_prefix("did:buds:") {
        const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
        return !rest.is_empty()
            && rest.len() <= 44
            && rest.bytes().all(|b| BASE58_ALPHABET.as_bytes().contains(&b));
    }
    false
}

/// UUIDv4 string.
pub fn is_valid_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).map(|u| u.get_version_num() == 4).unwrap_or(false)
}

/// CIDv1 text form: literal `b` prefix plus 50–60 lowercase base32 chars (§6).
pub fn is_valid_cid(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('b') else { return false };
    (50..=60).contains(&rest.len())
        && rest.bytes().all(|b| b"abcdefghijklmnopqrstuvwxyz234567".contains(&b))
}

/// Non-empty base64 (standard alphabet, optional padding).
pub fn is_valid_base64(s: &str) -> bool {
    !s.is_empty() && B64.decode(s).is_ok()
}

/// Base64-encoded 64-byte Ed25519 signature (86–88 chars with optional padding).
pub fn is_valid_signature(s: &str) -> bool {
    if !(86..=88).contains(&s.len()) {
        return false;
    }
    B64.decode(s).map(|b| b.len() == 64).unwrap_or(false)
}

/// E.164 phone number: `+` then 1–15 digits, leading digit non-zero.
pub fn is_valid_phone(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('+') else { return false };
    (1..=15).contains(&rest.len())
        && rest.bytes().next().map(|b| b != b'0').unwrap_or(false)
        && rest.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_dids() {
        assert!(is_valid_did(&format!("did:phone:{}", "a".repeat(64))));
        assert!(is_valid_did("did:buds:5dGHK7P9mNqR8vZw3T"));
    }

    #[test]
    fn rejects_invalid_dids() {
        assert!(!is_valid_did("did:buds:"));
        assert!(!is_valid_did("did:web:example.com"));
        assert!(!is_valid_did("did:buds:abc!@#"));
        assert!(!is_valid_did(&format!("did:buds:{}", "a".repeat(100))));
        assert!(!is_valid_did("did:buds:abc--comment"));
    }

    #[test]
    fn accepts_valid_phone() {
        assert!(is_valid_phone("+14155551234"));
    }

    #[test]
    fn rejects_invalid_phone() {
        assert!(!is_valid_phone("14155551234"));
        assert!(!is_valid_phone("+0123456"));
        assert!(!is_valid_phone("+"));
    }
}
