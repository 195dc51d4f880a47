//! Direct-message relay models (§3, §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A stored encrypted message. Exactly one of `blob_key` or an inline legacy
/// payload is set for any given row (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedMessage {
    pub message_id: Uuid,
    pub receipt_cid: String,
    pub sender_did: String,
    pub sender_device_id: Uuid,
    pub recipient_dids: Vec<String>,
    /// device_id (as string) → base64 wrapped symmetric key.
    pub wrapped_keys: serde_json::Value,
    pub signature: String,
    pub blob_key: Option<String>,
    pub inline_payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One per-recipient delivery row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDelivery {
    pub message_id: Uuid,
    pub recipient_did: String,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// `POST /api/messages/send` request body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 36, max = 36))]
    pub message_id: String,
    pub receipt_cid: String,
    pub sender_did: String,
    #[validate(length(min = 36, max = 36))]
    pub sender_device_id: String,
    #[validate(length(min = 1, max = 12))]
    pub recipient_dids: Vec<String>,
    /// Base64 ciphertext.
    pub encrypted_payload: String,
    /// device_id → base64 wrapped key.
    pub wrapped_keys: serde_json::Value,
    pub signature: String,
}

/// A single message as returned from the inbox.
#[derive(Debug, Clone, Serialize)]
pub struct InboxMessage {
    pub message_id: Uuid,
    pub receipt_cid: String,
    pub sender_did: String,
    pub sender_device_id: Uuid,
    pub recipient_dids: Vec<String>,
    pub wrapped_keys: serde_json::Value,
    pub signature: String,
    pub encrypted_payload: String,
    pub created_at: DateTime<Utc>,
}

/// `GET /api/messages/inbox` response body.
#[derive(Debug, Clone, Serialize)]
pub struct InboxResponse {
    pub messages: Vec<InboxMessage>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MarkDeliveredRequest {
    #[validate(length(min = 36, max = 36))]
    pub message_id: String,
    pub recipient_did: String,
}
