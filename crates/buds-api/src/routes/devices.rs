//! `POST /api/devices/{register,list,heartbeat}` (§4.4).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Extension, Json, Router};
use uuid::Uuid;

use buds_common::error::{RelayError, RelayResult};
use buds_common::models::device::{
    DeviceResponse, HeartbeatRequest, ListDevicesRequest, ListDevicesResponse, RegisterDeviceRequest,
};
use buds_common::validation::{is_valid_did, is_valid_uuid, validate_request};

use crate::auth::{encrypt_caller_phone, CallerContext};
use crate::middleware::{guarded, RateLimitSpec};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    let limits = &buds_common::config::get().limits;

    let register = guarded(
        Router::new().route("/devices/register", post(register_device)),
        RateLimitSpec { endpoint: "devices.register", limit: limits.rate_device_register_per_5min, window_secs: 300 },
    );
    let list = guarded(
        Router::new().route("/devices/list", post(list_devices)),
        RateLimitSpec { endpoint: "devices.list", limit: limits.rate_device_list_per_min, window_secs: 60 },
    );
    let heartbeat = guarded(
        Router::new().route("/devices/heartbeat", post(heartbeat)),
        RateLimitSpec { endpoint: "devices.heartbeat", limit: limits.rate_default_per_min, window_secs: 60 },
    );

    register.merge(list).merge(heartbeat)
}

/// Register or re-register a device. The caller's own authenticated phone
/// is always the owning phone — there is no separate `phone` field to
/// spoof (§4.4: "caller's authenticated phone must match phone").
async fn register_device(
    Extension(caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterDeviceRequest>,
) -> RelayResult<Json<DeviceResponse>> {
    validate_request(&body)?;

    if !is_valid_uuid(&body.device_id) {
        return Err(RelayError::validation("device_id must be a UUIDv4"));
    }
    if !is_valid_did(&body.owner_did) {
        return Err(RelayError::validation("owner_did is not a valid DID"));
    }

    let device_id = Uuid::parse_str(&body.device_id).map_err(|_| RelayError::validation("invalid device_id"))?;
    let encrypted_phone = encrypt_caller_phone(&caller, &state.phone_key)?;

    // A re-registration of an already-owned device never counts against the
    // cap — only genuinely new devices can push the owner over it (§7
    // `DEVICE_LIMIT_EXCEEDED`).
    let already_owned = buds_db::repository::identity::find_device(&state.db.pool, device_id)
        .await?
        .is_some_and(|d| d.owner_did == body.owner_did);
    if !already_owned {
        let limits = &buds_common::config::get().limits;
        let active_count =
            buds_db::repository::identity::count_active_devices_for_did(&state.db.pool, &body.owner_did).await?;
        if active_count >= limits.max_devices_per_did {
            return Err(RelayError::DeviceLimitExceeded);
        }
    }

    let device = buds_db::repository::identity::register_device(
        &state.db.pool,
        device_id,
        &body.owner_did,
        &encrypted_phone,
        &body.device_name,
        &body.pubkey_x25519,
        &body.pubkey_ed25519,
        body.push_token.as_deref(),
    )
    .await?;

    // Keep the phone→DID mapping current for this device's owner (§3).
    buds_db::repository::identity::upsert_phone_mapping(&state.db.pool, &encrypted_phone, &body.owner_did).await?;

    Ok(Json(device.into()))
}

async fn list_devices(
    Extension(_caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<ListDevicesRequest>,
) -> RelayResult<Json<ListDevicesResponse>> {
    validate_request(&body)?;

    for did in &body.dids {
        if !is_valid_did(did) {
            return Err(RelayError::validation(format!("'{did}' is not a valid DID")));
        }
    }

    let devices = buds_db::repository::identity::list_devices_for_dids(&state.db.pool, &body.dids).await?;
    Ok(Json(ListDevicesResponse { devices: devices.into_iter().map(Into::into).collect() }))
}

async fn heartbeat(
    Extension(_caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<HeartbeatRequest>,
) -> RelayResult<()> {
    validate_request(&body)?;

    if !is_valid_uuid(&body.device_id) {
        return Err(RelayError::validation("device_id must be a UUIDv4"));
    }
    let device_id = Uuid::parse_str(&body.device_id).map_err(|_| RelayError::validation("invalid device_id"))?;

    let updated = buds_db::repository::identity::heartbeat(&state.db.pool, device_id).await?;
    if !updated {
        return Err(RelayError::not_found("device"));
    }
    Ok(())
}
