//! Checkpoint Store (§4.1): per-`(source, mode, window)` markers in the central
//! container. Read-soft-fail / write-hard-fail, mirroring `dashflow-s3-checkpointer`'s
//! thread-index load/save pair.

use std::sync::Arc;

use backup_core::model::{BackupMode, CriticalityTier, WindowLabel};
use backup_core::object_store::ObjectStore;
use backup_core::path::{sweep_checkpoint_key, window_marker_key};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Persists sweep high-water marks and incremental window markers.
pub struct CheckpointStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl CheckpointStore {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, central_bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: central_bucket.into(),
        }
    }

    /// Reads the high-water mark for `(source, mode)`. Fails soft: "not found" and
    /// any other fault both return `None`, treating absence as "process everything" (§4.1).
    pub async fn read_sweep(&self, source: &str, mode: BackupMode) -> Option<DateTime<Utc>> {
        let key = sweep_checkpoint_key(source, mode);
        match self.store.get_object(&self.bucket, &key).await {
            Ok(body) => {
                let text = String::from_utf8_lossy(&body);
                match DateTime::parse_from_rfc3339(text.trim()) {
                    Ok(dt) => Some(dt.with_timezone(&Utc)),
                    Err(err) => {
                        warn!(source, ?mode, %err, "sweep checkpoint unparsable, treating as absent");
                        None
                    }
                }
            }
            Err(err) => {
                warn!(source, ?mode, %err, "sweep checkpoint absent or unreadable");
                None
            }
        }
    }

    /// Writes the ISO-8601 high-water mark. Fails only if the store rejects the write.
    pub async fn write_sweep(
        &self,
        source: &str,
        mode: BackupMode,
        timestamp: DateTime<Utc>,
    ) -> Result<(), backup_core::error::StoreError> {
        let key = sweep_checkpoint_key(source, mode);
        let body = timestamp.to_rfc3339().into_bytes();
        self.store.put_object(&self.bucket, &key, body, &[]).await?;
        Ok(())
    }

    /// O(1) existence test for a window marker (idempotence, §4.5).
    pub async fn has_window(
        &self,
        source: &str,
        tier: CriticalityTier,
        window: &WindowLabel,
    ) -> bool {
        let key = window_marker_key(source, tier, window);
        self.store.head_object(&self.bucket, &key).await.is_ok()
    }

    /// Marks a window as processed. Existence of the object is the only payload (§3).
    pub async fn mark_window(
        &self,
        source: &str,
        tier: CriticalityTier,
        window: &WindowLabel,
    ) -> Result<(), backup_core::error::StoreError> {
        let key = window_marker_key(source, tier, window);
        self.store.put_object(&self.bucket, &key, Vec::new(), &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_core::object_store::test_support::InMemoryStore;
    use chrono::TimeZone;

    fn store() -> CheckpointStore {
        CheckpointStore::new(Arc::new(InMemoryStore::new()), "central")
    }

    #[tokio::test]
    async fn read_sweep_returns_none_when_absent() {
        let cp = store();
        assert_eq!(cp.read_sweep("b-1", BackupMode::Full).await, None);
    }

    #[tokio::test]
    async fn write_then_read_sweep_round_trips() {
        let cp = store();
        let ts = Utc.with_ymd_and_hms(2025, 10, 20, 12, 0, 0).unwrap();
        cp.write_sweep("b-1", BackupMode::Full, ts).await.unwrap();
        assert_eq!(cp.read_sweep("b-1", BackupMode::Full).await, Some(ts));
    }

    #[tokio::test]
    async fn window_marker_is_idempotent() {
        let cp = store();
        let window = WindowLabel::parse("20251020T1200Z").unwrap();
        assert!(!cp.has_window("b-1", CriticalityTier::Critical, &window).await);
        cp.mark_window("b-1", CriticalityTier::Critical, &window).await.unwrap();
        assert!(cp.has_window("b-1", CriticalityTier::Critical, &window).await);
    }
}
