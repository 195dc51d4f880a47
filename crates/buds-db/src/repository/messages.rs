//! Message relay repository (§4.5): ingest, inbox, delivery, expiry cleanup.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use buds_common::models::message::EncryptedMessage;

use crate::any_compat::{get_datetime, get_string_vec, get_uuid};

impl FromRow<'_, AnyRow> for EncryptedMessage {
    fn from_row(row: &AnyRow) -> Result<Self, sqlx::Error> {
        Ok(EncryptedMessage {
            message_id: get_uuid(row, "message_id")?,
            receipt_cid: row.try_get("receipt_cid")?,
            sender_did: row.try_get("sender_did")?,
            sender_device_id: get_uuid(row, "sender_device_id")?,
            recipient_dids: get_string_vec(row, "recipient_dids")?,
            wrapped_keys: crate::any_compat::get_json_value(row, "wrapped_keys")?,
            signature: row.try_get("signature")?,
            blob_key: row.try_get("blob_key")?,
            inline_payload: row.try_get("inline_payload")?,
            created_at: get_datetime(row, "created_at")?,
            expires_at: get_datetime(row, "expires_at")?,
        })
    }
}

/// Insert a new message row and its per-recipient delivery rows in order:
/// caller must have already written the blob (or inline payload) before
/// calling this (§4.5 ordering invariant).
#[allow(clippy::too_many_arguments)]
pub async fn insert_message(
    pool: &sqlx::AnyPool,
    message_id: Uuid,
    receipt_cid: &str,
    sender_did: &str,
    sender_device_id: Uuid,
    recipient_dids: &[String],
    wrapped_keys: &serde_json::Value,
    signature: &str,
    blob_key: Option<&str>,
    inline_payload: Option<&str>,
    ttl_days: i64,
) -> Result<EncryptedMessage> {
    // Computed here rather than via a SQL date function: Postgres and SQLite
    // don't share a portable "add N days" expression over `sqlx::AnyPool`.
    let now = Utc::now();
    let expires_at = now + chrono::Duration::days(ttl_days);

    let row = sqlx::query_as::<_, EncryptedMessage>(
        r#"
        INSERT INTO encrypted_messages
            (message_id, receipt_cid, sender_did, sender_device_id, recipient_dids,
             wrapped_keys, signature, blob_key, inline_payload, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(message_id.to_string())
    .bind(receipt_cid)
    .bind(sender_did)
    .bind(sender_device_id.to_string())
    .bind(serde_json::to_string(recipient_dids)?)
    .bind(serde_json::to_string(wrapped_keys)?)
    .bind(signature)
    .bind(blob_key)
    .bind(inline_payload)
    .bind(now.to_rfc3339())
    .bind(expires_at.to_rfc3339())
    .fetch_one(pool)
    .await?;

    for recipient in recipient_dids {
        sqlx::query(
            "INSERT INTO message_delivery (message_id, recipient_did, delivered_at) VALUES (?, ?, NULL)",
        )
        .bind(message_id.to_string())
        .bind(recipient)
        .execute(pool)
        .await?;
    }

    Ok(row)
}

pub async fn message_exists(pool: &sqlx::AnyPool, message_id: Uuid) -> Result<bool> {
    let row = sqlx::query("SELECT 1 as present FROM encrypted_messages WHERE message_id = ?")
        .bind(message_id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Inbox listing for a DID (§4.5): messages with a pending-or-delivered
/// delivery row, not expired, newest first.
pub async fn inbox_for_did(
    pool: &sqlx::AnyPool,
    did: &str,
    since: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<EncryptedMessage>> {
    let rows = sqlx::query_as::<_, EncryptedMessage>(
        r#"
        SELECT m.* FROM encrypted_messages m
        JOIN message_delivery d ON d.message_id = m.message_id
        WHERE d.recipient_did = ?
          AND m.expires_at > CURRENT_TIMESTAMP
          AND (? IS NULL OR m.created_at > ?)
        ORDER BY m.created_at DESC
        LIMIT ?
        "#,
    )
    .bind(did)
    .bind(since.map(|d| d.to_rfc3339()))
    .bind(since.map(|d| d.to_rfc3339()))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Sets delivered_at if currently null. Returns `false` if no such pending
/// delivery row exists (caller maps that to 404, §4.5).
pub async fn mark_delivered(pool: &sqlx::AnyPool, message_id: Uuid, recipient_did: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE message_delivery
        SET delivered_at = CURRENT_TIMESTAMP
        WHERE message_id = ? AND recipient_did = ? AND delivered_at IS NULL
        "#,
    )
    .bind(message_id.to_string())
    .bind(recipient_did)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// The sender's own row, or `None` if not found — used both to check
/// sender ownership and to retrieve the blob_key before deletion.
pub async fn find_message(pool: &sqlx::AnyPool, message_id: Uuid) -> Result<Option<EncryptedMessage>> {
    let row = sqlx::query_as::<_, EncryptedMessage>("SELECT * FROM encrypted_messages WHERE message_id = ?")
        .bind(message_id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Delete a message (and its delivery rows, via cascade) if `caller_did` is
/// the sender, or the message has expired (§4.5's authoritative predicate).
/// Returns `true` if a row was deleted.
pub async fn delete_message(pool: &sqlx::AnyPool, message_id: Uuid, caller_did: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM encrypted_messages
        WHERE message_id = ? AND (sender_did = ? OR expires_at < CURRENT_TIMESTAMP)
        "#,
    )
    .bind(message_id.to_string())
    .bind(caller_did)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// All recipient DIDs with an active push token for a message's recipients
/// (§4.5 push fan-out).
pub async fn push_targets_for_recipients(
    pool: &sqlx::AnyPool,
    recipient_dids: &[String],
) -> Result<Vec<(Uuid, String)>> {
    let mut out = Vec::new();
    for did in recipient_dids {
        let rows = sqlx::query(
            "SELECT device_id, push_token FROM devices WHERE owner_did = ? AND status = 'active' AND push_token IS NOT NULL",
        )
        .bind(did)
        .fetch_all(pool)
        .await?;
        for row in rows {
            let device_id = get_uuid(&row, "device_id")?;
            let token: String = row.try_get("push_token")?;
            out.push((device_id, token));
        }
    }
    Ok(out)
}

/// Messages expired as of `now` (§4.7 retention sweep, step a/b).
pub async fn expired_messages(pool: &sqlx::AnyPool, now: DateTime<Utc>) -> Result<Vec<EncryptedMessage>> {
    let rows = sqlx::query_as::<_, EncryptedMessage>("SELECT * FROM encrypted_messages WHERE expires_at < ?")
        .bind(now.to_rfc3339())
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn delete_message_row(pool: &sqlx::AnyPool, message_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM encrypted_messages WHERE message_id = ?")
        .bind(message_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Delivery rows whose message no longer exists (§4.7 step c).
pub async fn delete_orphan_delivery_rows(pool: &sqlx::AnyPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM message_delivery
        WHERE message_id NOT IN (SELECT message_id FROM encrypted_messages)
        "#,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
