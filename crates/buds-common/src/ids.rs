//! ID generation.
//!
//! device_id and message_id are plain UUIDv4 (§3) — not the time-ordered
//! snowflake/UUIDv7 scheme used elsewhere in the corpus. The relay's IDs are
//! opaque lookup keys, not sort keys; ordering comes from created_at and,
//! for jar receipts, the relay-assigned sequence number.

use uuid::Uuid;

pub fn generate_id() -> Uuid {
    Uuid::new_v4()
}
