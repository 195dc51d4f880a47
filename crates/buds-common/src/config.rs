//! Application configuration loaded from environment variables and config files.
//!
//! Supports `.env` files for development and environment variables for production.
//! Config precedence: env vars > .env file > config.toml > defaults

use serde::Deserialize;
use std::sync::OnceLock;

static CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Get the global application configuration.
///
/// # Panics
/// Panics if config has not been initialized via [`init`].
pub fn get() -> &'static AppConfig {
    CONFIG.get().expect("Config not initialized. Call buds_common::config::init() first.")
}

/// Initialize the global configuration from environment.
///
/// Should be called once at application startup, before any other code accesses config.
/// Fails fast if `crypto.phone_key_base64` is unset or the wrong length (§4.2) — the
/// relay must never silently run without the phone-encryption key.
pub fn init() -> anyhow::Result<&'static AppConfig> {
    // Load .env file if present (development)
    let _ = dotenvy::dotenv();

    let cfg = config::Config::builder()
        // Defaults
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("server.name", "localhost")?
        .set_default("database.max_connections", 20)?
        .set_default("database.min_connections", 5)?
        .set_default("storage.endpoint", "")?
        .set_default("storage.bucket", "buds-messages")?
        .set_default("storage.access_key", "")?
        .set_default("storage.secret_key", "")?
        .set_default("storage.region", "us-east-1")?
        .set_default("push.enabled", false)?
        .set_default("push.key_id", "")?
        .set_default("push.team_id", "")?
        .set_default("push.topic", "")?
        .set_default("push.private_key_path", "")?
        .set_default("limits.max_recipients", 12)?
        .set_default("limits.max_jar_backfill_page", 500)?
        .set_default("limits.max_jar_backfill_cap", 1000)?
        .set_default("limits.message_ttl_days", 30)?
        .set_default("limits.device_idle_ttl_days", 90)?
        .set_default("limits.max_devices_per_did", 10)?
        .set_default("limits.max_jar_members", 50)?
        .set_default("limits.rate_salt_per_min", 10)?
        .set_default("limits.rate_device_register_per_5min", 5)?
        .set_default("limits.rate_device_list_per_min", 50)?
        .set_default("limits.rate_lookup_per_min", 20)?
        .set_default("limits.rate_send_per_min", 100)?
        .set_default("limits.rate_inbox_per_min", 200)?
        .set_default("limits.rate_default_per_min", 60)?
        // Optional config file
        .add_source(config::File::with_name("config").required(false))
        // Environment variables (BUDS__SERVER__HOST, BUDS__DATABASE__URL, etc.)
        .add_source(
            config::Environment::with_prefix("BUDS")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let app_config: AppConfig = cfg.try_deserialize()?;
    app_config.crypto.validate()?;

    Ok(CONFIG.get_or_init(|| app_config))
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub crypto: CryptoConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub push: PushConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Public server name, used only in log context.
    pub name: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Connection URL — `postgres://…` or `sqlite://…`, selects the backend.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL — optional; when unset, the rate limiter and
    /// push-JWT cache fall back to in-process state (single replica only).
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CryptoConfig {
    /// Base64-encoded 256-bit AES key used for deterministic phone encryption (§4.2).
    pub phone_key_base64: String,
}

impl CryptoConfig {
    fn validate(&self) -> anyhow::Result<()> {
        let raw = base64::Engine::decode(
            &base64::engine::general_purpose::STANDARD,
            self.phone_key_base64.trim(),
        )
        .map_err(|e| anyhow::anyhow!("crypto.phone_key_base64 is not valid base64: {e}"))?;
        if raw.len() != 32 {
            anyhow::bail!(
                "crypto.phone_key_base64 must decode to 32 bytes, got {}",
                raw.len()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Symmetric secret used to verify the caller-auth bearer token (§9d).
    /// Stands in for whatever external identity provider a deployment wires in.
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// S3/MinIO endpoint URL (e.g. http://localhost:9000).
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PushConfig {
    pub enabled: bool,
    /// APNs key id.
    pub key_id: String,
    /// APNs team id.
    pub team_id: String,
    /// Client application identifier (APNs topic).
    pub topic: String,
    /// Path to a PKCS#8 EC private key file.
    pub private_key_path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    pub max_recipients: usize,
    pub max_jar_backfill_page: i64,
    pub max_jar_backfill_cap: i64,
    pub message_ttl_days: i64,
    pub device_idle_ttl_days: i64,
    /// Active-device cap per DID (§7 `DEVICE_LIMIT_EXCEEDED`).
    pub max_devices_per_did: i64,
    /// Active-member cap per jar (§7 `CIRCLE_LIMIT_EXCEEDED`).
    pub max_jar_members: i64,
    pub rate_salt_per_min: u32,
    pub rate_device_register_per_5min: u32,
    pub rate_device_list_per_min: u32,
    pub rate_lookup_per_min: u32,
    pub rate_send_per_min: u32,
    pub rate_inbox_per_min: u32,
    pub rate_default_per_min: u32,
}
