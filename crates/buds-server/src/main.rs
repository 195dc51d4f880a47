//! Binary entrypoint for the relay: loads config, connects the database,
//! object store, and push client, wires the axum router, and runs the HTTP
//! server alongside the detached daily retention sweep (C7, §4.7).

use std::net::SocketAddr;
use std::sync::Arc;

use buds_api::{build_router, AppState};
use buds_db::push::{PushClient, PushConfig as PushClientConfig};
use buds_db::rate_limit::RateLimiter;
use buds_db::storage::{StorageClient, StorageConfig as DbStorageConfig};
use buds_db::Database;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = buds_common::config::init()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "buds=info,tower_http=info".into()),
        )
        .json()
        .with_target(true)
        .init();

    tracing::info!(server_name = %config.server.name, version = env!("CARGO_PKG_VERSION"), "starting buds relay");

    let phone_key = buds_common::crypto::phone::decode_key(&config.crypto.phone_key_base64)?;

    let db = Database::connect(config).await?;
    db.migrate().await?;

    let storage = StorageClient::new(&DbStorageConfig {
        endpoint: config.storage.endpoint.clone(),
        access_key: config.storage.access_key.clone(),
        secret_key: config.storage.secret_key.clone(),
        bucket: config.storage.bucket.clone(),
        region: config.storage.region.clone(),
    })?;
    storage.ensure_bucket().await?;
    tracing::info!(bucket = %config.storage.bucket, "object storage ready");

    // Push secrets are optional (§6): their absence disables push without
    // failing startup or breaking message ingest.
    let push = if config.push.enabled {
        let private_key_pem = std::fs::read_to_string(&config.push.private_key_path)?;
        let client = PushClient::new(
            PushClientConfig {
                key_id: config.push.key_id.clone(),
                team_id: config.push.team_id.clone(),
                topic: config.push.topic.clone(),
                private_key_pem,
                endpoint_base: "https://api.push.apple.com".to_string(),
            },
            db.redis.clone(),
        )?;
        tracing::info!("push notifications enabled");
        Some(Arc::new(client))
    } else {
        tracing::info!("push secrets unset — push notifications disabled, message ingest unaffected");
        None
    };

    let rate_limiter = RateLimiter::new(db.redis.clone());

    // Detached daily retention sweep (C7) — outlives any single request.
    buds_db::retention::spawn_daily(db.clone(), storage.clone(), config.limits.device_idle_ttl_days);

    let state = AppState { db, storage, push, rate_limiter, phone_key: Arc::new(phone_key) };
    let router = build_router(state);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
