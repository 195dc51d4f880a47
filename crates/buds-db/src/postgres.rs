//! Postgres-specific helpers.

use sqlx::AnyPool;

/// Simple liveness probe used by `/health`.
pub async fn health_check(pool: &AnyPool) -> bool {
    sqlx::query("SELECT 1").fetch_one(pool).await.is_ok()
}
