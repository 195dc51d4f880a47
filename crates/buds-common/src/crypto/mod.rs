//! Crypto primitives used by the relay itself.
//!
//! The relay deliberately does NOT perform message-content cryptography —
//! that happens exclusively on clients. This module contains only:
//!
//! - [`phone`] — deterministic phone-number encryption for equality lookup (§4.2).
//! - [`signature`] — Ed25519 verification of receipts using a device's registered
//!   public key (§4.3).
//! - [`cid`] — base32 + CIDv1 content addressing (§4.1).
//! - [`cbor`] — canonical receipt envelope field extraction (§4.1).

pub mod cbor;
pub mod cid;
pub mod phone;
pub mod signature;
