//! Redis connection pool and helpers.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Set a key with expiration (cached push-provider JWT, etc.).
pub async fn set_ex(
    conn: &mut ConnectionManager,
    key: &str,
    value: &str,
    ttl_secs: u64,
) -> Result<(), redis::RedisError> {
    conn.set_ex(key, value, ttl_secs).await
}

/// Get a value by key.
pub async fn get(conn: &mut ConnectionManager, key: &str) -> Result<Option<String>, redis::RedisError> {
    conn.get(key).await
}

/// Increment a fixed-window rate-limit counter, setting its expiry on first
/// hit (§4.9). Returns `(count, ttl_secs_remaining)` — the TTL anchors the
/// window's actual reset time, which only the first hit establishes.
pub async fn incr_expire(
    conn: &mut ConnectionManager,
    key: &str,
    ttl_secs: u64,
) -> Result<(i64, i64), redis::RedisError> {
    let count: i64 = conn.incr(key, 1).await?;
    if count == 1 {
        let _: () = conn.expire(key, ttl_secs as i64).await?;
        return Ok((count, ttl_secs as i64));
    }
    let ttl: i64 = conn.ttl(key).await?;
    Ok((count, if ttl >= 0 { ttl } else { ttl_secs as i64 }))
}
