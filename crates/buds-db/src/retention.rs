//! Retention & cleanup sweep (C7, §4.7).
//!
//! Runs as a detached daily loop from the server binary. Order matches the
//! spec exactly: blobs before message rows, then orphan delivery rows, then
//! idle devices. Idempotent — reruns on a clean database are no-ops.

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};

use crate::repository::{identity, messages};
use crate::storage::StorageClient;
use crate::Database;

#[derive(Debug, Default, Clone, Copy)]
pub struct RetentionReport {
    pub messages_deleted: u64,
    pub blobs_deleted: u64,
    pub blob_delete_failures: u64,
    pub orphan_deliveries_deleted: u64,
    pub idle_devices_deleted: u64,
}

/// One pass of the cleanup sweep described in §4.7.
pub async fn sweep(db: &Database, storage: &StorageClient, device_idle_ttl_days: i64) -> Result<RetentionReport> {
    let now = Utc::now();
    let mut report = RetentionReport::default();

    let expired = messages::expired_messages(&db.pool, now).await?;
    for message in &expired {
        if let Some(blob_key) = &message.blob_key {
            match storage.delete_object(blob_key).await {
                Ok(()) => report.blobs_deleted += 1,
                Err(e) => {
                    report.blob_delete_failures += 1;
                    tracing::warn!(
                        message_id = %message.message_id,
                        blob_key = %blob_key,
                        error = %e,
                        "failed to delete expired blob, continuing"
                    );
                }
            }
        }
        messages::delete_message_row(&db.pool, message.message_id).await?;
        report.messages_deleted += 1;
    }

    // Explicit sweep rather than relying on the schema's ON DELETE CASCADE:
    // SQLite only enforces foreign keys when a connection opts in with
    // `PRAGMA foreign_keys = ON`, which this pool does not set, so orphan
    // rows accumulate under that backend if this step is skipped.
    report.orphan_deliveries_deleted = messages::delete_orphan_delivery_rows(&db.pool).await?;

    let cutoff = now - ChronoDuration::days(device_idle_ttl_days);
    let idle = identity::idle_devices_older_than(&db.pool, cutoff).await?;
    for device_id in idle {
        identity::delete_device(&db.pool, device_id).await?;
        report.idle_devices_deleted += 1;
    }

    Ok(report)
}

/// Spawn the daily retention loop as a detached task. Its lifetime outlives
/// any single request; failures are logged and the loop continues rather
/// than exiting the process (§9: background work must not inherit request
/// cancellation, and here there is no originating request at all).
pub fn spawn_daily(db: Database, storage: StorageClient, device_idle_ttl_days: i64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
        loop {
            interval.tick().await;
            match sweep(&db, &storage, device_idle_ttl_days).await {
                Ok(report) => tracing::info!(
                    messages_deleted = report.messages_deleted,
                    blobs_deleted = report.blobs_deleted,
                    blob_delete_failures = report.blob_delete_failures,
                    orphan_deliveries_deleted = report.orphan_deliveries_deleted,
                    idle_devices_deleted = report.idle_devices_deleted,
                    "retention sweep complete"
                ),
                Err(e) => tracing::error!(error = %e, "retention sweep failed"),
            }
        }
    })
}
