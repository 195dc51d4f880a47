//! `GET /health` — liveness, pings the database. No rate limit, no auth (§6).

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db_ok = buds_db::postgres::health_check(&state.db.pool).await;
    Json(HealthResponse {
        status: if db_ok { "healthy".into() } else { "degraded".into() },
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
