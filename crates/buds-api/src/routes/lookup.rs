//! `POST /api/lookup/{did,batch}` — phone → DID resolution (§4.4).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Extension, Json, Router};

use buds_common::error::{RelayError, RelayResult};
use buds_common::models::lookup::{BatchLookupRequest, BatchLookupResponse, LookupDidRequest, LookupDidResponse};
use buds_common::validation::{is_valid_phone, validate_request};

use crate::auth::CallerContext;
use crate::middleware::{guarded, RateLimitSpec};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    let limits = &buds_common::config::get().limits;
    let route = Router::new()
        .route("/lookup/did", post(lookup_did))
        .route("/lookup/batch", post(lookup_batch));
    guarded(route, RateLimitSpec { endpoint: "lookup", limit: limits.rate_lookup_per_min, window_secs: 60 })
}

async fn lookup_did(
    Extension(_caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<LookupDidRequest>,
) -> RelayResult<Json<LookupDidResponse>> {
    validate_request(&body)?;
    if !is_valid_phone(&body.phone) {
        return Err(RelayError::validation("phone must be E.164"));
    }

    let encrypted_phone = buds_common::crypto::phone::encrypt(&body.phone, &state.phone_key)
        .map_err(|e| RelayError::Internal(anyhow::anyhow!(e)))?;

    let did = buds_db::repository::identity::lookup_did(&state.db.pool, &encrypted_phone)
        .await?
        .ok_or_else(|| RelayError::not_found("did"))?;

    Ok(Json(LookupDidResponse { did }))
}

/// Rate limiting (§6) bounds enumeration here; missing phones are simply
/// absent from the result, never an error (§4.4).
async fn lookup_batch(
    Extension(_caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<BatchLookupRequest>,
) -> RelayResult<Json<BatchLookupResponse>> {
    validate_request(&body)?;

    for phone in &body.phones {
        if !is_valid_phone(phone) {
            return Err(RelayError::validation(format!("'{phone}' is not a valid E.164 phone")));
        }
    }

    let encrypted: Vec<String> = body
        .phones
        .iter()
        .map(|p| buds_common::crypto::phone::encrypt(p, &state.phone_key))
        .collect::<Result<_, _>>()
        .map_err(|e| RelayError::Internal(anyhow::anyhow!(e)))?;

    let found = buds_db::repository::identity::batch_lookup_did(&state.db.pool, &encrypted).await?;

    // Map each found encrypted phone back to its plaintext input so the
    // response keys are phones, not ciphertexts.
    let encrypted_to_plain: HashMap<&str, &str> =
        encrypted.iter().map(String::as_str).zip(body.phones.iter().map(String::as_str)).collect();

    let results = found
        .into_iter()
        .filter_map(|(enc, did)| encrypted_to_plain.get(enc.as_str()).map(|&phone| (phone.to_string(), did)))
        .collect();

    Ok(Json(BatchLookupResponse { results }))
}
