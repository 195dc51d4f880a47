//! Identity store repository (§4.4): devices, phone→DID mapping, account salts.

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::any::AnyRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use buds_common::models::device::{Device, DeviceStatus};

use crate::any_compat::{get_datetime, get_uuid};

impl FromRow<'_, AnyRow> for Device {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Device {
            device_id: get_uuid(row, "device_id")?,
            owner_did: row.try_get("owner_did")?,
            owner_encrypted_phone: row.try_get("owner_encrypted_phone")?,
            device_name: row.try_get("device_name")?,
            pubkey_x25519: row.try_get("pubkey_x25519")?,
            pubkey_ed25519: row.try_get("pubkey_ed25519")?,
            push_token: row.try_get("push_token")?,
            status: if status == "active" { DeviceStatus::Active } else { DeviceStatus::Inactive },
            registered_at: get_datetime(row, "registered_at")?,
            last_seen_at: get_datetime(row, "last_seen_at")?,
        })
    }
}

/// Get the account salt for an (already-encrypted) phone, creating one if
/// absent. Safe under concurrent first-time callers: the insert is
/// conflict-tolerant and followed by a re-read, so every caller observes the
/// same winning salt (§4.4).
pub async fn get_or_create_account_salt(
    pool: &sqlx::AnyPool,
    encrypted_phone: &str,
) -> Result<(String, bool)> {
    let mut raw_salt = [0u8; 32];
    rand::rng().fill_bytes(&mut raw_salt);
    let candidate_salt = B64.encode(raw_salt);

    let inserted = sqlx::query(
        r#"
        INSERT INTO account_salts (encrypted_phone, salt, created_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT (encrypted_phone) DO NOTHING
        "#,
    )
    .bind(encrypted_phone)
    .bind(&candidate_salt)
    .execute(pool)
    .await?
    .rows_affected()
        > 0;

    let row = sqlx::query("SELECT salt FROM account_salts WHERE encrypted_phone = ?")
        .bind(encrypted_phone)
        .fetch_one(pool)
        .await?;
    let salt: String = row.try_get("salt")?;

    Ok((salt, inserted))
}

/// Phone → DID lookup. Returns `None` if no mapping exists.
pub async fn lookup_did(pool: &sqlx::AnyPool, encrypted_phone: &str) -> Result<Option<String>> {
    let row = sqlx::query("SELECT did FROM phone_to_did WHERE encrypted_phone = ?")
        .bind(encrypted_phone)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.try_get("did")).transpose()?)
}

/// Batch phone → DID lookup, for up to 12 encrypted phones. Missing phones
/// are simply absent from the result (§4.4).
pub async fn batch_lookup_did(
    pool: &sqlx::AnyPool,
    encrypted_phones: &[String],
) -> Result<Vec<(String, String)>> {
    let mut out = Vec::with_capacity(encrypted_phones.len());
    for phone in encrypted_phones {
        if let Some(did) = lookup_did(pool, phone).await? {
            out.push((phone.clone(), did));
        }
    }
    Ok(out)
}

/// Upsert the phone→DID mapping (one DID per encrypted phone, §3).
pub async fn upsert_phone_mapping(pool: &sqlx::AnyPool, encrypted_phone: &str, did: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO phone_to_did (encrypted_phone, did)
        VALUES (?, ?)
        ON CONFLICT (encrypted_phone) DO UPDATE SET did = excluded.did
        "#,
    )
    .bind(encrypted_phone)
    .bind(did)
    .execute(pool)
    .await?;
    Ok(())
}

/// Register or re-register a device (§4.4). On conflict by device_id,
/// updates keys/name/push_token/last_seen_at but preserves registered_at.
#[allow(clippy::too_many_arguments)]
pub async fn register_device(
    pool: &sqlx::AnyPool,
    device_id: Uuid,
    owner_did: &str,
    owner_encrypted_phone: &str,
    device_name: &str,
    pubkey_x25519: &str,
    pubkey_ed25519: &str,
    push_token: Option<&str>,
) -> Result<Device> {
    let row = sqlx::query_as::<_, Device>(
        r#"
        INSERT INTO devices
            (device_id, owner_did, owner_encrypted_phone, device_name,
             pubkey_x25519, pubkey_ed25519, push_token, status,
             registered_at, last_seen_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'active', CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT (device_id) DO UPDATE SET
            device_name = excluded.device_name,
            pubkey_x25519 = excluded.pubkey_x25519,
            pubkey_ed25519 = excluded.pubkey_ed25519,
            push_token = excluded.push_token,
            status = 'active',
            last_seen_at = CURRENT_TIMESTAMP
        RETURNING *
        "#,
    )
    .bind(device_id.to_string())
    .bind(owner_did)
    .bind(owner_encrypted_phone)
    .bind(device_name)
    .bind(pubkey_x25519)
    .bind(pubkey_ed25519)
    .bind(push_token)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// The most recently registered active device for a DID (§4.3 key lookup).
pub async fn latest_active_device_for_did(pool: &sqlx::AnyPool, did: &str) -> Result<Option<Device>> {
    let row = sqlx::query_as::<_, Device>(
        r#"
        SELECT * FROM devices
        WHERE owner_did = ? AND status = 'active'
        ORDER BY registered_at DESC
        LIMIT 1
        "#,
    )
    .bind(did)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_device(pool: &sqlx::AnyPool, device_id: Uuid) -> Result<Option<Device>> {
    let row = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE device_id = ? AND status = 'active'")
        .bind(device_id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Count of active devices currently owned by a DID (§7 `DEVICE_LIMIT_EXCEEDED`).
pub async fn count_active_devices_for_did(pool: &sqlx::AnyPool, owner_did: &str) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) as n FROM devices WHERE owner_did = ? AND status = 'active'")
        .bind(owner_did)
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("n")?)
}

pub async fn list_devices_for_dids(pool: &sqlx::AnyPool, dids: &[String]) -> Result<Vec<Device>> {
    let mut out = Vec::new();
    for did in dids {
        let rows = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE owner_did = ? AND status = 'active'")
            .bind(did)
            .fetch_all(pool)
            .await?;
        out.extend(rows);
    }
    Ok(out)
}

/// Update last_seen_at for a device. Returns `false` if the device is absent
/// or inactive (caller maps that to 404, §4.4).
pub async fn heartbeat(pool: &sqlx::AnyPool, device_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE devices SET last_seen_at = CURRENT_TIMESTAMP WHERE device_id = ? AND status = 'active'",
    )
    .bind(device_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Mark a device inactive and clear its push token (§4.5, push 410 handling).
pub async fn deactivate_device(pool: &sqlx::AnyPool, device_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE devices SET status = 'inactive', push_token = NULL WHERE device_id = ?")
        .bind(device_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a device outright (§4.7 idle-device sweep — unlike push 410
/// handling, which only deactivates, the 90-day idle sweep removes the row).
pub async fn delete_device(pool: &sqlx::AnyPool, device_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM devices WHERE device_id = ?")
        .bind(device_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Devices idle longer than `cutoff` (§4.7 retention sweep).
pub async fn idle_devices_older_than(pool: &sqlx::AnyPool, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let rows = sqlx::query("SELECT device_id FROM devices WHERE status = 'active' AND last_seen_at < ?")
        .bind(cutoff.to_rfc3339())
        .fetch_all(pool)
        .await?;
    rows.iter().map(|r| get_uuid(r, "device_id").map_err(Into::into)).collect()
}
