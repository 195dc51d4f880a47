//! Content identifiers: lowercase base32 and CIDv1 (§4.1).
//!
//! The prefix and codec are fixed constants for this relay — they are never
//! inferred from the input:
//!
//! `0x01` (CID version 1) ∥ `0x71` (dag-cbor codec) ∥ `0x12 0x20` (multihash:
//! sha2-256, 32-byte digest) ∥ SHA-256(bytes), base32-encoded with the
//! literal `b` multibase prefix.

use sha2::{Digest, Sha256};

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

const CID_VERSION: u8 = 0x01;
const CODEC_DAG_CBOR: u8 = 0x71;
const MULTIHASH_SHA2_256: u8 = 0x12;
const MULTIHASH_LEN_32: u8 = 0x20;

/// Encode bytes as unpadded lowercase base32 (RFC 4648 alphabet).
pub fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u64 = 0;
    let mut bits: u32 = 0;

    for &byte in data {
        buffer = (buffer << 8) | byte as u64;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = ((buffer >> bits) & 0x1f) as usize;
            out.push(BASE32_ALPHABET[index] as char);
        }
    }

    if bits > 0 {
        let index = ((buffer << (5 - bits)) & 0x1f) as usize;
        out.push(BASE32_ALPHABET[index] as char);
    }

    out
}

fn base32_char_value(c: u8) -> Option<u8> {
    BASE32_ALPHABET.iter().position(|&b| b == c).map(|p| p as u8)
}

/// Decode unpadded lowercase base32 back to bytes.
pub fn base32_decode(s: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits: u32 = 0;

    for c in s.bytes() {
        let value = base32_char_value(c)?;
        buffer = (buffer << 5) | value as u64;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }

    Some(out)
}

/// Compute the CIDv1 (dag-cbor, sha2-256) of a byte string, as `b`-prefixed
/// lowercase base32 text.
pub fn compute_cid(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);

    let mut raw = Vec::with_capacity(4 + 32);
    raw.push(CID_VERSION);
    raw.push(CODEC_DAG_CBOR);
    raw.push(MULTIHASH_SHA2_256);
    raw.push(MULTIHASH_LEN_32);
    raw.extend_from_slice(&digest);

    format!("b{}", base32_encode(&raw))
}

/// Verify that `claimed` is exactly the CIDv1 of `bytes`.
pub fn verify_cid(claimed: &str, bytes: &[u8]) -> bool {
    compute_cid(bytes) == claimed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base32_round_trips() {
        let data = b"jar receipt envelope bytes";
        let encoded = base32_encode(data);
        let decoded = base32_decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn cid_is_deterministic_and_verifiable() {
        let data = b"{\"receipt_type\":\"jar.created\"}";
        let cid = compute_cid(data);
        assert!(cid.starts_with('b'));
        assert!(verify_cid(&cid, data));
    }

    #[test]
    fn cid_changes_with_any_byte() {
        let a = compute_cid(b"payload-a");
        let b = compute_cid(b"payload-b");
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_bytes_fail_verification() {
        let data = b"original receipt bytes";
        let cid = compute_cid(data);
        assert!(!verify_cid(&cid, b"tampered receipt bytes"));
    }
}
