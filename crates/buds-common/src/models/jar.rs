//! Jar receipt log and materialized membership models (§3, §4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// One stored entry in a jar's append-only receipt log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JarReceipt {
    pub jar_id: String,
    pub sequence_number: i64,
    pub receipt_cid: String,
    /// Base64 of the raw CBOR receipt bytes, for wire transport.
    pub receipt_data: String,
    /// Base64 of the raw Ed25519 signature bytes.
    pub signature: String,
    pub sender_did: String,
    pub received_at: DateTime<Utc>,
    pub parent_cid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Pending,
    Removed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Member,
}

/// A materialized row in the jar_members view (rebuildable from JarReceipt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JarMember {
    pub jar_id: String,
    pub member_did: String,
    pub status: MemberStatus,
    pub role: MemberRole,
    pub added_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
    pub added_by_receipt_cid: String,
    pub removed_by_receipt_cid: Option<String>,
}

/// `POST /api/jars/{jar_id}/receipts` request body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StoreReceiptRequest {
    /// Base64 of the raw CBOR receipt bytes.
    pub receipt_data: String,
    /// Base64 of the raw Ed25519 signature bytes.
    pub signature: String,
    pub parent_cid: Option<String>,
    /// CID claimed by the client; verified against the computed CID if present.
    pub claimed_cid: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreReceiptResponse {
    pub sequence_number: i64,
    pub receipt_cid: String,
}

/// Backfill query mode (§4.6): either `after`/`limit`, or a closed `from..=to` range.
#[derive(Debug, Clone, Deserialize)]
pub struct GetReceiptsQuery {
    pub after: Option<i64>,
    pub limit: Option<i64>,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetReceiptsResponse {
    pub receipts: Vec<JarReceipt>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserJarSummary {
    pub jar_id: String,
    pub role: MemberRole,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListJarsResponse {
    pub jars: Vec<UserJarSummary>,
}
