//! Caller-auth and rate-limit middleware (§9d, C9 / §4.9).
//!
//! Layer order matters here: [`guarded`] stacks `caller_auth_middleware`
//! outermost so [`CallerContext`] is in request extensions by the time
//! `rate_limit_middleware` (innermost) reads it to pick the bucket
//! principal — DID if we ever learn one, but the caller-auth seam only
//! ever yields a phone, so phone is the principal in practice (§4.9).

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Extension, Router};
use buds_common::error::RelayError;

use crate::auth::{extract_bearer_token, resolve_caller, CallerContext};
use crate::AppState;

/// Makes the request id `SetRequestIdLayer` attached to this request
/// available to `RelayError`'s response rendering for the rest of the
/// call — so the id a handler logs on error and the id in the client-visible
/// JSON body are always the same value that ends up in the
/// `X-Request-Id` response header, instead of a fabricated one (§7, §9b).
pub async fn request_id_context_middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .extensions()
        .get::<tower_http::request_id::RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string());

    buds_common::error::REQUEST_ID.scope(request_id, next.run(request)).await
}

pub async fn caller_auth_middleware(
    mut request: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let token = extract_bearer_token(&request)?;
    let config = buds_common::config::get();
    let caller = resolve_caller(token, &config.auth.jwt_secret)?;
    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

/// Per-route rate-limit configuration, attached via [`guarded`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSpec {
    pub endpoint: &'static str,
    pub limit: u32,
    pub window_secs: u64,
}

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    Extension(spec): Extension<RateLimitSpec>,
    request: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let principal = request
        .extensions()
        .get::<CallerContext>()
        .map(|c| c.phone.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    let decision = state
        .rate_limiter
        .check(spec.endpoint, &principal, spec.limit, spec.window_secs)
        .await
        .map_err(|e| RelayError::Internal(e.into()))?;

    if !decision.allowed {
        let retry_after = (decision.reset_at - chrono::Utc::now().timestamp()).max(1) as u64;
        return Err(RelayError::RateLimited { retry_after_secs: retry_after });
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at));
    Ok(response)
}

/// Wrap a route group with caller auth (outermost) and rate limiting
/// (innermost), in that order (§6: every non-health endpoint requires both).
pub fn guarded(router: Router<Arc<AppState>>, spec: RateLimitSpec) -> Router<Arc<AppState>> {
    router
        .route_layer(middleware::from_fn(rate_limit_middleware))
        .layer(Extension(spec))
        .route_layer(middleware::from_fn(caller_auth_middleware))
}
