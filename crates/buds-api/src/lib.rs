//! # buds-api
//!
//! HTTP surface for the relay (§6). Wires the caller-auth seam (§9d), the
//! rate-limit bucket state (C9), and the route handlers for identity,
//! message, and jar-receipt endpoints onto an axum [`Router`].
//!
//! The router/CORS/auth-token *mechanics* are named external collaborators
//! in the core spec (§1) — what is specified, and implemented here, is the
//! shape of the seam: a bearer token that resolves to a verified phone
//! number, and the seven components (C1–C9) that consume it.

pub mod auth;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use buds_db::push::PushClient;
use buds_db::rate_limit::RateLimiter;
use buds_db::storage::StorageClient;
use buds_db::Database;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub storage: StorageClient,
    /// `None` when push secrets are unset (§6: absence disables push,
    /// does not break message ingest).
    pub push: Option<Arc<PushClient>>,
    pub rate_limiter: RateLimiter,
    /// Decoded 32-byte phone-encryption key (§4.2) — immutable process-local
    /// state, decoded once at startup rather than on every request.
    pub phone_key: Arc<Vec<u8>>,
}

/// Build the complete API router with all routes and ambient middleware.
pub fn build_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let api_routes = Router::new()
        .merge(routes::account::router())
        .merge(routes::devices::router())
        .merge(routes::lookup::router())
        .merge(routes::messages::router())
        .merge(routes::jars::router());

    let request_id_header = axum::http::HeaderName::from_static("x-request-id");

    Router::new()
        .merge(routes::health::router())
        .nest("/api", api_routes)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::compression::CompressionLayer::new())
        // Every response carries an opaque request id (§7): set one if the
        // caller didn't supply `X-Request-Id`, and propagate whichever value
        // won back onto the response so logs and error bodies can be
        // correlated with it. `request_id_context_middleware` makes that same
        // id available to `RelayError`'s own response rendering, so it must
        // run inside `SetRequestIdLayer` (added last, i.e. outermost) but can
        // wrap everything below it.
        .layer(tower_http::request_id::PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(axum::middleware::from_fn(middleware::request_id_context_middleware))
        .layer(tower_http::request_id::SetRequestIdLayer::new(
            request_id_header,
            tower_http::request_id::MakeRequestUuid,
        ))
        .with_state(state)
}
