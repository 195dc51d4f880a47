//! `POST /api/messages/send`, `GET /api/messages/inbox`,
//! `POST /api/messages/mark-delivered`, `DELETE /api/messages/{id}` (§4.5).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use serde::Deserialize;
use uuid::Uuid;

use buds_common::error::{RelayError, RelayResult};
use buds_common::models::message::{
    InboxMessage, InboxResponse, MarkDeliveredRequest, SendMessageRequest,
};
use buds_common::validation::{
    is_valid_base64, is_valid_cid, is_valid_did, is_valid_signature, is_valid_uuid, validate_request,
};
use buds_db::push::fan_out;

use crate::auth::{encrypt_caller_phone, resolve_caller_did, CallerContext};
use crate::middleware::{guarded, RateLimitSpec};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    let limits = &buds_common::config::get().limits;

    let send = guarded(
        Router::new().route("/messages/send", post(send_message)),
        RateLimitSpec { endpoint: "messages.send", limit: limits.rate_send_per_min, window_secs: 60 },
    );
    let inbox = guarded(
        Router::new().route("/messages/inbox", get(inbox)),
        RateLimitSpec { endpoint: "messages.inbox", limit: limits.rate_inbox_per_min, window_secs: 60 },
    );
    let mark_delivered = guarded(
        Router::new().route("/messages/mark-delivered", post(mark_delivered)),
        RateLimitSpec { endpoint: "messages.mark_delivered", limit: limits.rate_default_per_min, window_secs: 60 },
    );
    let delete_route = guarded(
        Router::new().route("/messages/{id}", delete(delete_message)),
        RateLimitSpec { endpoint: "messages.delete", limit: limits.rate_default_per_min, window_secs: 60 },
    );

    send.merge(inbox).merge(mark_delivered).merge(delete_route)
}

fn validate_send_request(body: &SendMessageRequest, max_recipients: usize) -> RelayResult<()> {
    validate_request(body)?;

    if !is_valid_uuid(&body.message_id) {
        return Err(RelayError::validation("message_id must be a UUIDv4"));
    }
    if !is_valid_cid(&body.receipt_cid) {
        return Err(RelayError::validation("receipt_cid is not a valid CIDv1"));
    }
    if !is_valid_did(&body.sender_did) {
        return Err(RelayError::validation("sender_did is not a valid DID"));
    }
    if !is_valid_uuid(&body.sender_device_id) {
        return Err(RelayError::validation("sender_device_id must be a UUIDv4"));
    }
    if body.recipient_dids.is_empty() || body.recipient_dids.len() > max_recipients {
        return Err(RelayError::validation(format!("recipient_dids must have 1-{max_recipients} entries")));
    }
    for did in &body.recipient_dids {
        if !is_valid_did(did) {
            return Err(RelayError::validation(format!("'{did}' is not a valid DID")));
        }
    }
    if !is_valid_base64(&body.encrypted_payload) {
        return Err(RelayError::validation("encrypted_payload must be base64"));
    }
    if !is_valid_signature(&body.signature) {
        return Err(RelayError::validation("signature must be a base64-encoded Ed25519 signature"));
    }
    let wrapped_keys_map = body.wrapped_keys.as_object().ok_or_else(|| RelayError::validation("wrapped_keys must be an object"))?;
    for (device_id, key) in wrapped_keys_map {
        if !is_valid_uuid(device_id) {
            return Err(RelayError::validation(format!("wrapped_keys key '{device_id}' is not a device UUID")));
        }
        if !key.as_str().is_some_and(is_valid_base64) {
            return Err(RelayError::validation("wrapped_keys values must be base64"));
        }
    }

    Ok(())
}

/// §4.5 ingest, steps 1–7 in order. Blob write happens before the metadata
/// insert so a visible row always resolves to a real blob.
async fn send_message(
    Extension(caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendMessageRequest>,
) -> RelayResult<()> {
    let limits = &buds_common::config::get().limits;
    validate_send_request(&body, limits.max_recipients)?;

    let message_id =
        Uuid::parse_str(&body.message_id).map_err(|_| RelayError::validation("invalid message_id"))?;
    let sender_device_id =
        Uuid::parse_str(&body.sender_device_id).map_err(|_| RelayError::validation("invalid sender_device_id"))?;

    // Step 2: sender_device_id must be an active device owned by sender_did
    // and by this caller's own phone.
    let encrypted_phone = encrypt_caller_phone(&caller, &state.phone_key)?;
    let device = buds_db::repository::identity::find_device(&state.db.pool, sender_device_id)
        .await?
        .ok_or(RelayError::Forbidden)?;
    if device.owner_did != body.sender_did || device.owner_encrypted_phone != encrypted_phone {
        return Err(RelayError::Forbidden);
    }

    // Step 3: reject duplicates.
    if buds_db::repository::messages::message_exists(&state.db.pool, message_id).await? {
        return Err(RelayError::validation("message_id already exists"));
    }

    // Step 4: blob write before metadata insert (§4.5 ordering invariant).
    let payload_bytes =
        B64.decode(&body.encrypted_payload).map_err(|_| RelayError::validation("encrypted_payload must be base64"))?;
    let blob_key = state
        .storage
        .put_message(&message_id, &body.receipt_cid, &body.sender_did, payload_bytes)
        .await
        .map_err(RelayError::Storage)?;

    // Step 5 + 6: metadata row and per-recipient delivery rows.
    buds_db::repository::messages::insert_message(
        &state.db.pool,
        message_id,
        &body.receipt_cid,
        &body.sender_did,
        sender_device_id,
        &body.recipient_dids,
        &body.wrapped_keys,
        &body.signature,
        Some(&blob_key),
        None,
        limits.message_ttl_days,
    )
    .await?;

    // Step 7: non-blocking push fan-out; never fails the send.
    if let Some(push) = state.push.clone() {
        let pool = state.db.pool.clone();
        let recipients = body.recipient_dids.clone();
        tokio::spawn(async move {
            let targets = match buds_db::repository::messages::push_targets_for_recipients(&pool, &recipients).await
            {
                Ok(targets) => targets,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to resolve push targets");
                    return;
                }
            };
            let invalid = fan_out(&push, targets).await;
            for device_id in invalid {
                if let Err(e) = buds_db::repository::identity::deactivate_device(&pool, device_id).await {
                    tracing::warn!(error = %e, %device_id, "failed to deactivate device after invalid push token");
                }
            }
        });
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct InboxQuery {
    since: Option<i64>,
    limit: Option<i64>,
}

/// §4.5 inbox retrieval: the `did` whose inbox is returned is always the
/// caller's own resolved DID, never one supplied by the client — this is a
/// deliberate tightening of the distilled spec's bare `did` input (see
/// DESIGN.md).
async fn inbox(
    Extension(caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Query(query): Query<InboxQuery>,
) -> RelayResult<Json<InboxResponse>> {
    let limits = &buds_common::config::get().limits;
    let did = resolve_caller_did(&caller, &state.phone_key, &state.db.pool).await?;

    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let since = query.since.and_then(chrono::DateTime::from_timestamp_millis);

    let rows = buds_db::repository::messages::inbox_for_did(&state.db.pool, &did, since, limit).await?;
    let has_more = rows.len() as i64 == limit;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let encrypted_payload = match (&row.blob_key, &row.inline_payload) {
            (Some(key), _) => {
                let bytes = state.storage.get_object(key).await.map_err(RelayError::Storage)?;
                B64.encode(bytes)
            }
            (None, Some(inline)) => inline.clone(),
            (None, None) => continue,
        };

        out.push(InboxMessage {
            message_id: row.message_id,
            receipt_cid: row.receipt_cid,
            sender_did: row.sender_did,
            sender_device_id: row.sender_device_id,
            recipient_dids: row.recipient_dids,
            wrapped_keys: row.wrapped_keys,
            signature: row.signature,
            encrypted_payload,
            created_at: row.created_at,
        });
    }

    Ok(Json(InboxResponse { messages: out, has_more }))
}

async fn mark_delivered(
    Extension(caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<MarkDeliveredRequest>,
) -> RelayResult<()> {
    validate_request(&body)?;
    if !is_valid_uuid(&body.message_id) {
        return Err(RelayError::validation("message_id must be a UUIDv4"));
    }
    if !is_valid_did(&body.recipient_did) {
        return Err(RelayError::validation("recipient_did is not a valid DID"));
    }

    let did = resolve_caller_did(&caller, &state.phone_key, &state.db.pool).await?;
    if did != body.recipient_did {
        return Err(RelayError::Forbidden);
    }

    let message_id =
        Uuid::parse_str(&body.message_id).map_err(|_| RelayError::validation("invalid message_id"))?;
    let updated =
        buds_db::repository::messages::mark_delivered(&state.db.pool, message_id, &body.recipient_did).await?;
    if !updated {
        return Err(RelayError::not_found("delivery"));
    }
    Ok(())
}

async fn delete_message(
    Extension(caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
) -> RelayResult<()> {
    if !is_valid_uuid(&message_id) {
        return Err(RelayError::validation("message id must be a UUIDv4"));
    }
    let message_id = Uuid::parse_str(&message_id).map_err(|_| RelayError::validation("invalid message id"))?;

    let did = resolve_caller_did(&caller, &state.phone_key, &state.db.pool).await?;

    // Fetch first so we know the blob key even though the authoritative
    // delete predicate (sender OR expired) is enforced in SQL.
    let message = buds_db::repository::messages::find_message(&state.db.pool, message_id)
        .await?
        .ok_or_else(|| RelayError::not_found("message"))?;

    let deleted = buds_db::repository::messages::delete_message(&state.db.pool, message_id, &did).await?;
    if !deleted {
        return Err(RelayError::Forbidden);
    }

    if let Some(blob_key) = &message.blob_key {
        if let Err(e) = state.storage.delete_object(blob_key).await {
            tracing::warn!(error = %e, %message_id, "failed to delete blob on message delete");
        }
    }

    Ok(())
}
