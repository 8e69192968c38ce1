//! Batch-Copy Launcher (§4.7): promotes a manifest to its canonical path and
//! submits the at-most-once batch-copy job, grounded directly on
//! `launch_batch_job/lambda_function.py`'s `move_manifest_if_needed` shape.

use std::sync::Arc;

use backup_core::config::Config;
use backup_core::error::BackupError;
use backup_core::model::{
    deterministic_client_token, BackupGeneration, BackupMode, BatchCopyRequest, CriticalityTier,
    RunId, WindowLabel,
};
use backup_core::object_store::{BatchJobClient, MetadataDirective, ObjectStore};
use backup_core::path::{self, DataRootTag};
use chrono::Utc;
use tracing::{info, warn};

pub struct LaunchRequest {
    pub manifest_bucket: String,
    pub manifest_key: String,
    pub source: String,
    pub mode: BackupMode,
    pub generation: BackupGeneration,
    pub tier: CriticalityTier,
    pub window_label: Option<WindowLabel>,
}

#[derive(Debug, Clone)]
pub struct LaunchResult {
    pub job_id: String,
    pub manifest_key: String,
    pub data_prefix: String,
    pub reports_prefix: String,
}

pub struct BatchCopyLauncher {
    store: Arc<dyn ObjectStore>,
    batch_job_client: Arc<dyn BatchJobClient>,
    config: Arc<Config>,
    central_container: String,
}

impl BatchCopyLauncher {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        batch_job_client: Arc<dyn BatchJobClient>,
        config: Arc<Config>,
        central_container: impl Into<String>,
    ) -> Self {
        Self {
            store,
            batch_job_client,
            config,
            central_container: central_container.into(),
        }
    }

    pub async fn launch(&self, request: &LaunchRequest) -> Result<LaunchResult, BackupError> {
        let window = request
            .window_label
            .unwrap_or_else(|| WindowLabel::quantize(Utc::now(), 1));
        let run_id = RunId::now(Utc::now());

        let final_key = path::canonical_window_manifest_key(
            request.tier,
            request.mode,
            &self.config.initiative,
            &request.source,
            &window,
            &run_id,
        );

        let manifest_etag = self
            .move_manifest_if_needed(&request.manifest_bucket, &request.manifest_key, &final_key)
            .await?;

        let root = path::data_root_prefix(
            request.tier,
            request.mode,
            request.generation,
            &self.config.initiative,
            &request.source,
            window.start(),
        );
        let target_key_prefix = path::data_prefix(&root, DataRootTag::Window(&window));
        let reports_prefix = path::reports_prefix(
            request.tier,
            request.mode,
            request.generation,
            &self.config.initiative,
            &request.source,
            DataRootTag::Window(&window),
        );

        let role_arn = self
            .config
            .batch_role_arn
            .clone()
            .ok_or_else(|| BackupError::Fatal("BATCH_ROLE_ARN is not configured".to_string()))?;
        let client_token =
            deterministic_client_token(&request.source, request.mode, request.generation, request.tier, &window);

        let build_request = |etag: String| BatchCopyRequest {
            manifest_bucket: self.central_container.clone(),
            manifest_key: final_key.clone(),
            manifest_etag: etag,
            target_bucket: self.central_container.clone(),
            target_key_prefix: target_key_prefix.clone(),
            reports_prefix: reports_prefix.clone(),
            role_arn: role_arn.clone(),
            client_token: client_token.clone(),
        };

        let job_id = match self.batch_job_client.create_job(&build_request(manifest_etag)).await {
            Ok(job_id) => job_id,
            Err(err) if err.is_integrity_mismatch() => {
                warn!(manifest = %final_key, "integrity tag mismatch on job submission, re-reading and retrying once");
                let refreshed = self.store.head_object(&self.central_container, &final_key).await?;
                self.batch_job_client.create_job(&build_request(refreshed.etag)).await?
            }
            Err(err) => return Err(err.into()),
        };

        info!(source = %request.source, manifest = %final_key, %job_id, "batch-copy job submitted");

        Ok(LaunchResult {
            job_id,
            manifest_key: final_key,
            data_prefix: target_key_prefix,
            reports_prefix,
        })
    }

    /// Promotes the temp manifest to its canonical path if not already there,
    /// copy-verify-delete, and returns the destination's integrity tag.
    async fn move_manifest_if_needed(
        &self,
        temp_bucket: &str,
        temp_key: &str,
        final_key: &str,
    ) -> Result<String, BackupError> {
        if temp_bucket == self.central_container && temp_key == final_key {
            let meta = self.store.head_object(&self.central_container, final_key).await?;
            return Ok(meta.etag);
        }

        self.store
            .copy_object(temp_bucket, temp_key, &self.central_container, final_key, MetadataDirective::Copy)
            .await?;
        let verified = self.store.head_object(&self.central_container, final_key).await?;
        self.store.delete_object(temp_bucket, temp_key).await?;
        Ok(verified.etag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use backup_core::error::StoreError;
    use backup_core::object_store::test_support::InMemoryStore;
    use backup_core::object_store::CompletedPart;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn config() -> Arc<Config> {
        std::env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        std::env::set_var("BATCH_ROLE_ARN", "arn:aws:iam::1:role/batch");
        std::env::set_var("INITIATIVE", "X");
        let config = Config::from_env().unwrap();
        std::env::remove_var("CENTRAL_BACKUP_BUCKET");
        std::env::remove_var("BATCH_ROLE_ARN");
        std::env::remove_var("INITIATIVE");
        Arc::new(config)
    }

    #[tokio::test]
    async fn promotes_temp_manifest_and_submits_job() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("central", "manifests/temp/b-1-abc.csv", b"b-1,data/a.txt\n".to_vec());
        let launcher = BatchCopyLauncher::new(store.clone(), store.clone(), config(), "central");
        let window = WindowLabel::parse("20251020T1200Z").unwrap();

        let request = LaunchRequest {
            manifest_bucket: "central".to_string(),
            manifest_key: "manifests/temp/b-1-abc.csv".to_string(),
            source: "b-1".to_string(),
            mode: BackupMode::Incremental,
            generation: BackupGeneration::Son,
            tier: CriticalityTier::Critical,
            window_label: Some(window),
        };
        let result = launcher.launch(&request).await.unwrap();

        assert!(!store.contains("central", "manifests/temp/b-1-abc.csv"));
        assert!(store.contains("central", &result.manifest_key));
        assert_eq!(store.job_count(), 1);
        assert!(result.data_prefix.contains("window=20251020T1200Z"));
    }

    #[tokio::test]
    async fn repeated_launch_with_same_inputs_returns_the_same_job() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("central", "manifests/temp/b-1-abc.csv", b"b-1,data/a.txt\n".to_vec());
        let launcher = BatchCopyLauncher::new(store.clone(), store.clone(), config(), "central");
        let window = WindowLabel::parse("20251020T1200Z").unwrap();
        let request = LaunchRequest {
            manifest_bucket: "central".to_string(),
            manifest_key: "manifests/temp/b-1-abc.csv".to_string(),
            source: "b-1".to_string(),
            mode: BackupMode::Incremental,
            generation: BackupGeneration::Son,
            tier: CriticalityTier::Critical,
            window_label: Some(window),
        };
        let first = launcher.launch(&request).await.unwrap();

        // manifest is already at its canonical path; launching again is a no-op move.
        let second_request = LaunchRequest {
            manifest_bucket: "central".to_string(),
            manifest_key: first.manifest_key.clone(),
            ..request
        };
        let second = launcher.launch(&second_request).await.unwrap();
        assert_eq!(first.job_id, second.job_id);
        assert_eq!(store.job_count(), 1);
    }

    struct MismatchOnceJobClient {
        inner: Arc<InMemoryStore>,
        triggered: AtomicU32,
    }

    #[async_trait]
    impl BatchJobClient for MismatchOnceJobClient {
        async fn create_job(&self, request: &BatchCopyRequest) -> Result<String, StoreError> {
            if self.triggered.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::IntegrityMismatch("stale etag".to_string()));
            }
            self.inner.create_job(request).await
        }
    }

    #[tokio::test]
    async fn retries_once_on_integrity_tag_mismatch_then_succeeds() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("central", "manifests/temp/b-1-abc.csv", b"b-1,data/a.txt\n".to_vec());
        let job_client = Arc::new(MismatchOnceJobClient {
            inner: store.clone(),
            triggered: AtomicU32::new(0),
        });
        let launcher = BatchCopyLauncher::new(store.clone(), job_client, config(), "central");
        let window = WindowLabel::parse("20251020T1200Z").unwrap();

        let request = LaunchRequest {
            manifest_bucket: "central".to_string(),
            manifest_key: "manifests/temp/b-1-abc.csv".to_string(),
            source: "b-1".to_string(),
            mode: BackupMode::Incremental,
            generation: BackupGeneration::Son,
            tier: CriticalityTier::Critical,
            window_label: Some(window),
        };
        let result = launcher.launch(&request).await.unwrap();
        assert_eq!(store.job_count(), 1);
        assert!(store.contains("central", &result.manifest_key));
    }

    // silence unused-import warnings for fixtures shared with other test modules
    #[allow(dead_code)]
    fn _unused(_: CompletedPart, _: Mutex<()>) {}
}
