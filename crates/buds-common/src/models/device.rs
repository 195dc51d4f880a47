//! Device and identity models (§3, §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A registered client device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: Uuid,
    pub owner_did: String,
    /// AES-256-GCM ciphertext of the owner's phone, base64 (§4.2).
    pub owner_encrypted_phone: String,
    pub device_name: String,
    /// X25519 public key, base64.
    pub pubkey_x25519: String,
    /// Ed25519 public key, base64.
    pub pubkey_ed25519: String,
    pub push_token: Option<String>,
    pub status: DeviceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    Inactive,
}

/// `POST /api/devices/register` request body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterDeviceRequest {
    #[validate(length(min = 36, max = 36))]
    pub device_id: String,
    #[validate(length(min = 1, max = 120))]
    pub device_name: String,
    #[validate(length(min = 1, max = 200))]
    pub owner_did: String,
    #[validate(length(min = 1, max = 200))]
    pub pubkey_x25519: String,
    #[validate(length(min = 1, max = 200))]
    pub pubkey_ed25519: String,
    pub push_token: Option<String>,
}

/// `POST /api/account/salt` response body.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSaltResponse {
    pub salt: String,
    pub created: bool,
}

/// `POST /api/devices/register` response body.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceResponse {
    pub device_id: Uuid,
    pub owner_did: String,
    pub device_name: String,
    pub pubkey_x25519: String,
    pub pubkey_ed25519: String,
    pub status: DeviceStatus,
    pub registered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl From<Device> for DeviceResponse {
    fn from(d: Device) -> Self {
        Self {
            device_id: d.device_id,
            owner_did: d.owner_did,
            device_name: d.device_name,
            pubkey_x25519: d.pubkey_x25519,
            pubkey_ed25519: d.pubkey_ed25519,
            status: d.status,
            registered_at: d.registered_at,
            last_seen_at: d.last_seen_at,
        }
    }
}

/// `POST /api/devices/list` request body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ListDevicesRequest {
    #[validate(length(min = 1, max = 12))]
    pub dids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListDevicesResponse {
    pub devices: Vec<DeviceResponse>,
}

/// `POST /api/devices/heartbeat` request body.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct HeartbeatRequest {
    #[validate(length(min = 36, max = 36))]
    pub device_id: String,
}
