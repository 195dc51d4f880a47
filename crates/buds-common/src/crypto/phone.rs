//! Deterministic phone-number encryption (§4.2).
//!
//! AES-256-GCM with a nonce derived from the plaintext: the first 12 bytes of
//! SHA-256(phone). This is a searchable-encryption construction, not a
//! semantically secure one — equal phones produce equal ciphertexts by
//! design, which is exactly what makes equality lookup on the encrypted
//! column possible. Do not reuse this primitive where confidentiality of
//! higher-entropy data is required.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PhoneCryptoError {
    #[error("phone encryption key must be 32 bytes, got {0}")]
    BadKeyLength(usize),
    #[error("ciphertext is not valid base64")]
    NotBase64,
    #[error("encryption failed")]
    Encrypt,
}

/// Deterministically encrypt a phone number with the given 32-byte key.
///
/// Returns the base64-encoded ciphertext (including the 16-byte GCM tag).
/// Pure function of `(phone, key)`: identical inputs always produce
/// identical output.
pub fn encrypt(phone: &str, key: &[u8]) -> Result<String, PhoneCryptoError> {
    if key.len() != 32 {
        return Err(PhoneCryptoError::BadKeyLength(key.len()));
    }

    let digest = Sha256::digest(phone.as_bytes());
    let nonce = Nonce::from_slice(&digest[..12]);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(nonce, phone.as_bytes())
        .map_err(|_| PhoneCryptoError::Encrypt)?;

    Ok(B64.encode(ciphertext))
}

/// Decode a base64 phone-encryption key into raw bytes, validating length.
pub fn decode_key(key_base64: &str) -> Result<Vec<u8>, PhoneCryptoError> {
    let raw = B64.decode(key_base64.trim()).map_err(|_| PhoneCryptoError::NotBase64)?;
    if raw.len() != 32 {
        return Err(PhoneCryptoError::BadKeyLength(raw.len()));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Vec<u8> {
        vec![7u8; 32]
    }

    #[test]
    fn encryption_is_deterministic() {
        let key = test_key();
        let a = encrypt("+14155551234", &key).unwrap();
        let b = encrypt("+14155551234", &key).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_phones_yield_distinct_ciphertexts() {
        let key = test_key();
        let a = encrypt("+14155551234", &key).unwrap();
        let b = encrypt("+14155551235", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_wrong_key_length() {
        let short_key = vec![1u8; 16];
        assert!(matches!(
            encrypt("+14155551234", &short_key),
            Err(PhoneCryptoError::BadKeyLength(16))
        ));
    }
}
