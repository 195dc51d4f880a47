//! MinIO / S3-compatible object storage client (§4.5, §6).
//!
//! Message ciphertext is written here under `messages/{message_id}.bin`
//! *before* the corresponding metadata row is inserted — the blob-before-
//! metadata invariant that keeps every visible message row pointing at a
//! real object.

use anyhow::{Context, Result};
use aws_sdk_s3::{
    config::{Builder as S3Builder, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use std::collections::HashMap;

/// Storage configuration (loaded from app config).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// MinIO / S3 endpoint URL (e.g. `http://localhost:9000`)
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    /// Region (use `us-east-1` for MinIO)
    pub region: String,
}

/// S3/MinIO storage client — wraps the AWS SDK.
#[derive(Clone)]
pub struct StorageClient {
    inner: Client,
    bucket: String,
}

impl StorageClient {
    /// Initialise client from config.
    pub fn new(cfg: &StorageConfig) -> Result<Self> {
        let creds = Credentials::new(
            &cfg.access_key,
            &cfg.secret_key,
            None, // session token
            None, // expiry
            "buds-storage",
        );

        let s3_cfg = S3Builder::new()
            .endpoint_url(&cfg.endpoint)
            .credentials_provider(creds)
            .region(Region::new(cfg.region.clone()))
            // Force path-style URLs (required for MinIO)
            .force_path_style(true)
            .build();

        Ok(Self { inner: Client::from_conf(s3_cfg), bucket: cfg.bucket.clone() })
    }

    /// Storage key for a message's ciphertext blob (§6).
    pub fn message_key(message_id: &uuid::Uuid) -> String {
        format!("messages/{message_id}.bin")
    }

    /// Upload the ciphertext for a message, with the custom metadata §4.5 requires.
    pub async fn put_message(
        &self,
        message_id: &uuid::Uuid,
        receipt_cid: &str,
        sender_did: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        let key = Self::message_key(message_id);
        let stream = ByteStream::from(data);

        let mut metadata = HashMap::new();
        metadata.insert("message-id".to_string(), message_id.to_string());
        metadata.insert("receipt-cid".to_string(), receipt_cid.to_string());
        metadata.insert("sender-did".to_string(), sender_did.to_string());
        metadata.insert("uploaded-at".to_string(), chrono::Utc::now().to_rfc3339());

        self.inner
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/octet-stream")
            .set_metadata(Some(metadata))
            .body(stream)
            .send()
            .await
            .with_context(|| format!("failed to upload {key} to object storage"))?;

        Ok(key)
    }

    /// Fetch the raw ciphertext bytes for a stored blob key (inbox retrieval, §4.5).
    pub async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .inner
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to fetch {key} from object storage"))?;

        let bytes = resp
            .body
            .collect()
            .await
            .with_context(|| format!("failed to read body for {key}"))?
            .into_bytes();

        Ok(bytes.to_vec())
    }

    /// Delete an object by its storage key. Used by C7 cleanup and sender-initiated delete.
    pub async fn delete_object(&self, key: &str) -> Result<()> {
        self.inner
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("failed to delete {key} from object storage"))?;

        Ok(())
    }

    /// Ensure the bucket exists; create it if absent.
    pub async fn ensure_bucket(&self) -> Result<()> {
        match self.inner.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                tracing::debug!(bucket = %self.bucket, "bucket already exists");
                Ok(())
            }
            Err(_) => {
                tracing::info!(bucket = %self.bucket, "bucket does not exist, creating");
                self.inner
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .context("failed to create object storage bucket")?;
                Ok(())
            }
        }
    }
}
