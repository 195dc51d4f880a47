//! `POST /api/jars/{jar_id}/receipts`, `GET /api/jars/{jar_id}/receipts`,
//! `GET /api/jars/list` (§4.6).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};

use buds_common::crypto::{cbor, cid, signature};
use buds_common::error::{RelayError, RelayResult};
use buds_common::models::jar::{
    GetReceiptsQuery, GetReceiptsResponse, ListJarsResponse, StoreReceiptRequest, StoreReceiptResponse,
    UserJarSummary,
};
use buds_common::validation::validate_request;
use buds_db::repository::jars::StoreReceiptOutcome;

use crate::auth::{resolve_caller_did, CallerContext};
use crate::middleware::{guarded, RateLimitSpec};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    let limits = &buds_common::config::get().limits;

    let receipts = guarded(
        Router::new()
            .route("/jars/{jar_id}/receipts", post(store_receipt))
            .route("/jars/{jar_id}/receipts", get(get_receipts)),
        RateLimitSpec { endpoint: "jars.receipts", limit: limits.rate_default_per_min, window_secs: 60 },
    );
    let list = guarded(
        Router::new().route("/jars/list", get(list_jars)),
        RateLimitSpec { endpoint: "jars.list", limit: limits.rate_default_per_min, window_secs: 60 },
    );

    receipts.merge(list)
}

/// §4.6's storeReceipt pipeline, steps 1–9 in order.
async fn store_receipt(
    Extension(_caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Path(jar_id): Path<String>,
    Json(body): Json<StoreReceiptRequest>,
) -> RelayResult<Json<StoreReceiptResponse>> {
    validate_request(&body)?;
    // Authorization to write is decided by jar membership of the receipt's
    // signed sender_did (step 6), not by which phone made the HTTP call —
    // the caller-auth middleware already confirmed the bearer token itself.
    let receipt_data = B64.decode(&body.receipt_data).map_err(|_| RelayError::validation("receipt_data must be base64"))?;
    if !buds_common::validation::is_valid_signature(&body.signature) {
        return Err(RelayError::validation("signature must be a base64-encoded Ed25519 signature"));
    }

    // Step 1: parse just enough to learn the sender, without trusting it yet.
    let sender_did = cbor::extract_sender_did(&receipt_data).map_err(|e| RelayError::validation(e.to_string()))?;

    // Step 2: compute and (if claimed) verify the CID.
    let receipt_cid = cid::compute_cid(&receipt_data);
    if let Some(claimed) = &body.claimed_cid {
        if claimed != &receipt_cid {
            return Err(RelayError::validation("claimed_cid does not match computed CID"));
        }
    }

    // Step 3: idempotency — a retried submission returns its prior sequence untouched.
    if let Some(existing) = buds_db::repository::jars::find_receipt_by_cid(&state.db.pool, &receipt_cid).await? {
        return Ok(Json(StoreReceiptResponse {
            sequence_number: existing.sequence_number,
            receipt_cid: existing.receipt_cid,
        }));
    }

    // Step 4: key lookup.
    let device = buds_db::repository::identity::latest_active_device_for_did(&state.db.pool, &sender_did)
        .await?
        .ok_or(RelayError::Forbidden)?;

    // Step 5: signature verification over the exact receipt_data bytes.
    signature::verify(&device.pubkey_ed25519, &body.signature, &receipt_data).map_err(|_| RelayError::Forbidden)?;

    // Step 6: authorization — active member, or this jar's own genesis.
    let is_member = buds_db::repository::jars::is_active_member(&state.db.pool, &jar_id, &sender_did).await?;
    if !is_member {
        let is_genesis = buds_db::repository::jars::jar_is_empty(&state.db.pool, &jar_id).await?;
        if !is_genesis {
            return Err(RelayError::Forbidden);
        }
    }

    // Decoded once here so the circle-size cap (below) and materialization
    // (step 9) both read the same envelope instead of decoding it twice.
    let envelope = cbor::decode_envelope(&receipt_data).ok();

    // A member_added receipt that would grow the jar past its cap is
    // rejected before it is ever stored (§7 `CIRCLE_LIMIT_EXCEEDED`).
    if let Some(envelope) = &envelope {
        if envelope.receipt_type == "jar.member_added" {
            let limits = &buds_common::config::get().limits;
            let member_count = buds_db::repository::jars::count_active_members(&state.db.pool, &jar_id).await?;
            if member_count >= limits.max_jar_members {
                return Err(RelayError::CircleLimitExceeded);
            }
        }
    }

    // Step 7: optional parent check — warn, don't reject (clients may backfill).
    if let Some(parent_cid) = &body.parent_cid {
        if buds_db::repository::jars::find_receipt_by_cid(&state.db.pool, parent_cid).await?.is_none() {
            tracing::warn!(jar_id = %jar_id, parent_cid = %parent_cid, "parent receipt not found locally, accepting anyway");
        }
    }

    // Step 8: race-safe sequence assignment.
    let outcome = buds_db::repository::jars::store_receipt(
        &state.db.pool,
        &jar_id,
        &receipt_cid,
        &body.receipt_data,
        &body.signature,
        &sender_did,
        body.parent_cid.as_deref(),
    )
    .await?;

    let stored = match outcome {
        StoreReceiptOutcome::Stored(receipt) => receipt,
        StoreReceiptOutcome::AlreadyExists(receipt) => {
            return Ok(Json(StoreReceiptResponse { sequence_number: receipt.sequence_number, receipt_cid: receipt.receipt_cid }))
        }
    };

    // Step 9: materialize into jar_members. Non-fatal on failure — receipts
    // are the source of truth and can be re-materialized later.
    match &envelope {
        Some(envelope) => {
            if let Err(e) =
                buds_db::repository::jars::materialize_receipt(&state.db.pool, &jar_id, envelope, &receipt_cid).await
            {
                tracing::error!(jar_id = %jar_id, receipt_cid = %receipt_cid, error = %e, "materialization failed, receipt stored anyway");
            }
        }
        None => {
            tracing::error!(jar_id = %jar_id, receipt_cid = %receipt_cid, "failed to decode envelope for materialization");
        }
    }

    Ok(Json(StoreReceiptResponse { sequence_number: stored.sequence_number, receipt_cid: stored.receipt_cid }))
}

/// §4.6 backfill: `after`/`limit`, or a closed `from..=to` range. Both
/// require the caller's own DID to be an active member of the jar.
async fn get_receipts(
    Extension(caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Path(jar_id): Path<String>,
    Query(query): Query<GetReceiptsQuery>,
) -> RelayResult<Json<GetReceiptsResponse>> {
    let limits = &buds_common::config::get().limits;
    let did = resolve_caller_did(&caller, &state.phone_key, &state.db.pool).await?;

    if !buds_db::repository::jars::is_active_member(&state.db.pool, &jar_id, &did).await? {
        return Err(RelayError::Forbidden);
    }

    let receipts = if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(RelayError::validation("from must be <= to"));
        }
        buds_db::repository::jars::receipts_in_range(&state.db.pool, &jar_id, from, to).await?
    } else {
        let after = query.after.unwrap_or(0);
        let limit = query.limit.unwrap_or(limits.max_jar_backfill_page).min(limits.max_jar_backfill_cap);
        buds_db::repository::jars::receipts_after(&state.db.pool, &jar_id, after, limit).await?
    };

    Ok(Json(GetReceiptsResponse { receipts }))
}

async fn list_jars(
    Extension(caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
) -> RelayResult<Json<ListJarsResponse>> {
    let did = resolve_caller_did(&caller, &state.phone_key, &state.db.pool).await?;
    let jars = buds_db::repository::jars::jars_for_member(&state.db.pool, &did).await?;
    Ok(Json(ListJarsResponse {
        jars: jars.into_iter().map(|(jar_id, role)| UserJarSummary { jar_id, role }).collect(),
    }))
}
