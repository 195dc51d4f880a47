//! Rate-limit bucket state (C9, §4.9).
//!
//! A fixed-window counter keyed by `(endpoint, principal)`. Backed by Redis
//! when configured (via [`crate::redis_pool::incr_expire`]); falls back to
//! an in-process map when Redis is absent (§9a — single-replica only).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use crate::redis_pool;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
    /// Unix seconds at which the window resets.
    pub reset_at: i64,
}

struct Bucket {
    count: u32,
    reset_at: i64,
}

#[derive(Clone)]
pub struct RateLimiter {
    redis: Option<ConnectionManager>,
    local: Arc<Mutex<HashMap<String, Bucket>>>,
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

impl RateLimiter {
    pub fn new(redis: Option<ConnectionManager>) -> Self {
        Self { redis, local: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Check and consume one unit of the bucket for `(endpoint, principal)`.
    pub async fn check(
        &self,
        endpoint: &str,
        principal: &str,
        limit: u32,
        window_secs: u64,
    ) -> Result<RateLimitDecision, redis::RedisError> {
        let key = format!("ratelimit:{endpoint}:{principal}");

        if let Some(mut conn) = self.redis.clone() {
            let (count, ttl_remaining) = redis_pool::incr_expire(&mut conn, &key, window_secs).await?;
            let reset_at = now_secs() + ttl_remaining;
            return Ok(RateLimitDecision {
                allowed: count as u32 <= limit,
                remaining: limit.saturating_sub(count as u32),
                limit,
                reset_at,
            });
        }

        let mut buckets = self.local.lock().await;
        let now = now_secs();
        let bucket = buckets.entry(key).or_insert(Bucket { count: 0, reset_at: now + window_secs as i64 });

        if now >= bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + window_secs as i64;
        }

        bucket.count += 1;

        Ok(RateLimitDecision {
            allowed: bucket.count <= limit,
            remaining: limit.saturating_sub(bucket.count),
            limit,
            reset_at: bucket.reset_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(None);
        for i in 1..=3 {
            let d = limiter.check("salt", "caller-1", 3, 60).await.unwrap();
            assert!(d.allowed, "request {i} should be allowed");
        }
        let d = limiter.check("salt", "caller-1", 3, 60).await.unwrap();
        assert!(!d.allowed);
    }

    #[tokio::test]
    async fn buckets_are_independent_per_principal() {
        let limiter = RateLimiter::new(None);
        limiter.check("salt", "caller-1", 1, 60).await.unwrap();
        let d = limiter.check("salt", "caller-2", 1, 60).await.unwrap();
        assert!(d.allowed);
    }
}
