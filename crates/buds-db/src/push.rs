//! Silent push dispatch (§4.5 push fan-out, §6 push secrets).
//!
//! The push provider's own HTTP/2 framing is an external collaborator (§1);
//! this client only builds the bearer JWT, the fixed non-identifying body,
//! and interprets the provider's status code. The bearer token is a
//! process-cached JWT with at most 15 minutes of effective life — cached in
//! Redis when configured so a multi-replica deployment shares one token,
//! falling back to an in-process cache otherwise (the same split as
//! [`crate::rate_limit::RateLimiter`]).

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use redis::aio::ConnectionManager;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::redis_pool;

const JWT_TTL_SECS: i64 = 15 * 60;
/// Refresh a little before actual expiry so a request never races the cutoff.
const JWT_REFRESH_SKEW_SECS: i64 = 60;
const JWT_CACHE_KEY: &str = "push:provider_jwt";

/// Static push-provider configuration (§6: key id, team id, topic, PKCS#8 key).
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub key_id: String,
    pub team_id: String,
    /// Client application identifier — the push topic.
    pub topic: String,
    pub private_key_pem: String,
    /// Base URL of the push provider's HTTP endpoint.
    pub endpoint_base: String,
}

#[derive(Serialize)]
struct ProviderClaims {
    iss: String,
    iat: i64,
}

/// Outcome of one push attempt, used by the caller to decide whether to
/// deactivate the device (§4.5 error handling: 410 → inactive + token null).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Sent,
    /// Provider returned 410: the token is no longer valid.
    InvalidToken,
    /// Provider returned 429 or 5xx: logged, not fatal.
    ProviderUnavailable,
}

struct CachedJwt {
    token: String,
    /// Unix seconds at which this token should no longer be reused.
    expires_at: i64,
}

/// Client for dispatching silent wakeup pushes.
pub struct PushClient {
    config: PushConfig,
    http: reqwest::Client,
    redis: Option<ConnectionManager>,
    local_cache: Mutex<Option<CachedJwt>>,
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

impl PushClient {
    pub fn new(config: PushConfig, redis: Option<ConnectionManager>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("buds-relay-push/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http, redis, local_cache: Mutex::new(None) })
    }

    fn mint_jwt(&self) -> anyhow::Result<String> {
        let now = now_secs();
        let claims = ProviderClaims { iss: self.config.team_id.clone(), iat: now };
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.config.key_id.clone());
        let key = EncodingKey::from_ec_pem(self.config.private_key_pem.as_bytes())?;
        Ok(encode(&header, &claims, &key)?)
    }

    /// Return a bearer token with at most 15 minutes of effective life,
    /// reusing a cached one when it has not yet crossed the refresh skew.
    async fn bearer_token(&self) -> anyhow::Result<String> {
        if let Some(mut conn) = self.redis.clone() {
            if let Some(cached) = redis_pool::get(&mut conn, JWT_CACHE_KEY).await? {
                return Ok(cached);
            }
            let token = self.mint_jwt()?;
            redis_pool::set_ex(&mut conn, JWT_CACHE_KEY, &token, (JWT_TTL_SECS - JWT_REFRESH_SKEW_SECS) as u64)
                .await?;
            return Ok(token);
        }

        let mut cache = self.local_cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if now_secs() < cached.expires_at - JWT_REFRESH_SKEW_SECS {
                return Ok(cached.token.clone());
            }
        }
        let token = self.mint_jwt()?;
        *cache = Some(CachedJwt { token: token.clone(), expires_at: now_secs() + JWT_TTL_SECS });
        Ok(token)
    }

    /// Dispatch one silent wakeup to a single device token (§4.5).
    ///
    /// The body is the fixed, non-identifying payload
    /// `{"aps":{"content-available":1},"inbox":1}` — no sender identity or
    /// recipient count is ever included (§9 design notes: push payload
    /// minimization).
    pub async fn send_silent_wakeup(&self, push_token: &str) -> PushOutcome {
        let bearer = match self.bearer_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "failed to mint push provider bearer token");
                return PushOutcome::ProviderUnavailable;
            }
        };

        let url = format!("{}/3/device/{}", self.config.endpoint_base, push_token);
        let body = serde_json::json!({ "aps": { "content-available": 1 }, "inbox": 1 });

        let response = self
            .http
            .post(&url)
            .bearer_auth(bearer)
            .header("apns-topic", &self.config.topic)
            .header("apns-push-type", "background")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().as_u16() == 200 => PushOutcome::Sent,
            Ok(resp) if resp.status().as_u16() == 410 => PushOutcome::InvalidToken,
            Ok(resp) => {
                tracing::warn!(status = resp.status().as_u16(), "push provider returned non-success");
                PushOutcome::ProviderUnavailable
            }
            Err(e) => {
                tracing::warn!(error = %e, "push provider request failed");
                PushOutcome::ProviderUnavailable
            }
        }
    }
}

/// Fan out a silent wakeup to every `(device_id, push_token)` pair in
/// parallel (§4.5). Returns the device ids whose tokens the provider
/// reported as invalid, so the caller can deactivate them. Never returns an
/// error — push failure must never fail the originating send.
pub async fn fan_out(client: &Arc<PushClient>, targets: Vec<(Uuid, String)>) -> Vec<Uuid> {
    let mut tasks = tokio::task::JoinSet::new();
    for (device_id, token) in targets {
        let client = Arc::clone(client);
        tasks.spawn(async move { (device_id, client.send_silent_wakeup(&token).await) });
    }

    let mut invalid = Vec::new();
    while let Some(result) = tasks.join_next().await {
        if let Ok((device_id, PushOutcome::InvalidToken)) = result {
            invalid.push(device_id);
        }
    }
    invalid
}
