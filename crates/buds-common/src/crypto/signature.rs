//! Ed25519 signature verification over receipt and message bytes (§4.3).
//!
//! The relay verifies against the public key of the most recently registered
//! active device for a given DID — never a server-held key. Verification
//! failure and "no such device" are both surfaced by callers as a
//! [`RelayError::Forbidden`](crate::error::RelayError::Forbidden).

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("public key is not valid base64 or wrong length")]
    BadPublicKey,
    #[error("signature is not valid base64 or wrong length")]
    BadSignature,
    #[error("signature does not verify")]
    Invalid,
}

/// Verify an Ed25519 signature over `message`.
///
/// * `pubkey_base64` — base64-encoded (standard alphabet) 32-byte verifying key.
/// * `sig_base64` — base64-encoded (standard alphabet) 64-byte signature.
/// * `message` — the exact signed bytes, with no re-canonicalization.
pub fn verify(pubkey_base64: &str, sig_base64: &str, message: &[u8]) -> Result<(), SignatureError> {
    let pubkey_bytes = B64.decode(pubkey_base64).map_err(|_| SignatureError::BadPublicKey)?;
    let pubkey_bytes: [u8; 32] =
        pubkey_bytes.as_slice().try_into().map_err(|_| SignatureError::BadPublicKey)?;
    let verifying_key = VerifyingKey::from_bytes(&pubkey_bytes).map_err(|_| SignatureError::BadPublicKey)?;

    let sig_bytes = B64.decode(sig_base64).map_err(|_| SignatureError::BadSignature)?;
    let sig_bytes: [u8; 64] = sig_bytes.as_slice().try_into().map_err(|_| SignatureError::BadSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);

    verifying_key.verify(message, &signature).map_err(|_| SignatureError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand_core::OsRng;

    #[test]
    fn round_trip_sign_verify() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let pubkey_b64 = B64.encode(signing_key.verifying_key().as_bytes());
        let msg = b"jar.created receipt bytes";
        let sig = signing_key.sign(msg);
        let sig_b64 = B64.encode(sig.to_bytes());

        verify(&pubkey_b64, &sig_b64, msg).expect("signature should verify");
    }

    #[test]
    fn tampered_message_fails() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let pubkey_b64 = B64.encode(signing_key.verifying_key().as_bytes());
        let sig = signing_key.sign(b"original bytes");
        let sig_b64 = B64.encode(sig.to_bytes());

        assert!(verify(&pubkey_b64, &sig_b64, b"tampered bytes").is_err());
    }

    #[test]
    fn bad_public_key_length_rejected() {
        let short = B64.encode([0u8; 10]);
        assert!(matches!(verify(&short, &B64.encode([0u8; 64]), b"x"), Err(SignatureError::BadPublicKey)));
    }
}
