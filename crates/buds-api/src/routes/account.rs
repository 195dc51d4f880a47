//! `POST /api/account/salt` — get-or-create the per-phone account salt (§4.4).

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json, Router};
use buds_common::error::RelayResult;
use buds_common::models::device::AccountSaltResponse;

use crate::auth::{encrypt_caller_phone, CallerContext};
use crate::middleware::{guarded, RateLimitSpec};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    let limits = &buds_common::config::get().limits;
    let route = Router::new().route("/account/salt", post(create_salt));
    guarded(
        route,
        RateLimitSpec { endpoint: "account.salt", limit: limits.rate_salt_per_min, window_secs: 60 },
    )
}

async fn create_salt(
    Extension(caller): Extension<CallerContext>,
    State(state): State<Arc<AppState>>,
) -> RelayResult<(StatusCode, Json<AccountSaltResponse>)> {
    let encrypted_phone = encrypt_caller_phone(&caller, &state.phone_key)?;

    let (salt, created) =
        buds_db::repository::identity::get_or_create_account_salt(&state.db.pool, &encrypted_phone).await?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(AccountSaltResponse { salt, created })))
}
