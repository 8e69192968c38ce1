//! Enumeration Reader and Sweep Planner (§4.6): locates the latest point-in-time
//! enumeration, streams its gzipped CSV shards through the checkpoint filter, and
//! falls back to direct listing when no enumeration exists yet.

use std::io::Read;
use std::sync::Arc;

use backup_checkpoint::CheckpointStore;
use backup_core::config::Config;
use backup_core::error::BackupError;
use backup_core::model::{BackupMode, CriticalityTier, EnumerationColumns, EnumerationDescriptor, ManifestRow};
use backup_core::object_store::ObjectStore;
use backup_core::path;
use backup_manifest::{ManifestWriter, WriteOutcome};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

pub struct SweepRequest {
    pub source: String,
    pub central_container: String,
    pub mode: BackupMode,
    pub tier: CriticalityTier,
    pub enumeration_prefix: String,
}

#[derive(Debug)]
pub enum SweepResult {
    Empty,
    Completed {
        bucket: String,
        key: String,
        integrity_tag: String,
        effective_mode: BackupMode,
        object_count: u64,
    },
}

pub struct SweepPlanner {
    central: Arc<dyn ObjectStore>,
    origin: Arc<dyn ObjectStore>,
    checkpoint: Arc<CheckpointStore>,
    manifest_writer: Arc<ManifestWriter>,
    config: Arc<Config>,
}

impl SweepPlanner {
    #[must_use]
    pub fn new(
        central: Arc<dyn ObjectStore>,
        origin: Arc<dyn ObjectStore>,
        checkpoint: Arc<CheckpointStore>,
        manifest_writer: Arc<ManifestWriter>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            central,
            origin,
            checkpoint,
            manifest_writer,
            config,
        }
    }

    pub async fn plan_sweep(&self, request: &SweepRequest) -> Result<SweepResult, BackupError> {
        let descriptor_listing = self
            .central
            .list_objects(&request.central_container, &request.enumeration_prefix)
            .await?;
        let latest_descriptor = descriptor_listing
            .iter()
            .filter(|m| m.key.ends_with(".json"))
            .max_by_key(|m| m.last_modified);

        let checkpoint_absent_for_requested_mode =
            self.checkpoint.read_sweep(&request.source, request.mode).await.is_none();

        let mut effective_mode = request.mode;
        if latest_descriptor.is_none()
            && self.config.force_full_on_first_run
            && request.mode == BackupMode::Incremental
            && checkpoint_absent_for_requested_mode
        {
            info!(source = %request.source, "no enumeration found on first run, escalating to full sweep");
            effective_mode = BackupMode::Full;
        }

        // A full sweep always captures a complete point-in-time snapshot (§3); the
        // checkpoint only ever filters incremental sweeps.
        let checkpoint = if effective_mode == BackupMode::Full {
            None
        } else {
            self.checkpoint.read_sweep(&request.source, effective_mode).await
        };

        let rows = if let Some(descriptor_meta) = latest_descriptor {
            self.read_from_descriptor(request, &descriptor_meta.key, checkpoint).await?
        } else {
            self.fallback_listing(request, checkpoint).await?
        };

        if rows.is_empty() {
            debug!(source = %request.source, "sweep produced zero rows");
            return Ok(SweepResult::Empty);
        }
        // Dedup and sort by (source_container, key) so a manifest's rows are
        // distinct and lexicographically reproducible (P2) even under duplicate
        // shard/listing entries.
        let rows: Vec<ManifestRow> = {
            let mut deduped: std::collections::BTreeMap<(String, String), ManifestRow> =
                std::collections::BTreeMap::new();
            for row in rows {
                deduped.insert((row.source_container.clone(), row.key.clone()), row);
            }
            deduped.into_values().collect()
        };
        let object_count = rows.len() as u64;

        let manifest_key = path::temp_manifest_key(&request.source, &uuid::Uuid::new_v4().to_string());
        let metadata_strings = [
            ("criticality".to_string(), request.tier.to_string()),
            ("object-count".to_string(), object_count.to_string()),
            ("source-bucket".to_string(), request.source.clone()),
            ("backup-mode".to_string(), effective_mode.to_string()),
            ("created-at".to_string(), Utc::now().to_rfc3339()),
        ];
        let metadata: Vec<(&str, &str)> = metadata_strings.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let location = match self
            .manifest_writer
            .write_manifest(&request.central_container, &manifest_key, rows, &metadata)
            .await?
        {
            WriteOutcome::Written(location) => location,
            WriteOutcome::Empty => return Ok(SweepResult::Empty),
        };

        self.checkpoint
            .write_sweep(&request.source, effective_mode, Utc::now())
            .await?;

        Ok(SweepResult::Completed {
            bucket: location.bucket,
            key: location.key,
            integrity_tag: location.integrity_tag,
            effective_mode,
            object_count,
        })
    }

    async fn read_from_descriptor(
        &self,
        request: &SweepRequest,
        descriptor_key: &str,
        checkpoint: Option<DateTime<Utc>>,
    ) -> Result<Vec<ManifestRow>, BackupError> {
        let body = self
            .central
            .get_object(&request.central_container, descriptor_key)
            .await
            .map_err(|e| BackupError::Fatal(format!("enumeration descriptor unreadable: {e}")))?;
        let descriptor: EnumerationDescriptor = serde_json::from_slice(&body)
            .map_err(|e| BackupError::Fatal(format!("enumeration descriptor malformed: {e}")))?;
        let columns = descriptor.required_columns()?;

        let mut rows = Vec::new();
        for shard in &descriptor.files {
            match self.read_shard(&request.central_container, &shard.key, &columns, request.tier, checkpoint).await {
                Ok(mut shard_rows) => rows.append(&mut shard_rows),
                Err(err) => warn!(shard = %shard.key, %err, "enumeration shard read failed, skipping"),
            }
        }
        Ok(rows)
    }

    async fn read_shard(
        &self,
        central_container: &str,
        shard_key: &str,
        columns: &EnumerationColumns,
        tier: CriticalityTier,
        checkpoint: Option<DateTime<Utc>>,
    ) -> Result<Vec<ManifestRow>, BackupError> {
        let body = self
            .central
            .get_object(central_container, shard_key)
            .await
            .map_err(|e| BackupError::Fatal(format!("shard missing: {e}")))?;

        let mut decoder = flate2::read::GzDecoder::new(&body[..]);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| BackupError::Fatal(format!("shard decompression failed: {e}")))?;

        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_reader(&decompressed[..]);
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(err) => {
                    warn!(shard = %shard_key, %err, "malformed shard row, skipping");
                    continue;
                }
            };
            let Some(key) = record.get(columns.key) else {
                continue;
            };
            if !self.config.object_filter.allowed_for_tier(tier, key) {
                continue;
            }
            if let Some(checkpoint) = checkpoint {
                let Some(last_modified_raw) = record.get(columns.last_modified_date) else {
                    continue;
                };
                match DateTime::parse_from_rfc3339(last_modified_raw) {
                    Ok(last_modified) if last_modified.with_timezone(&Utc) > checkpoint => {}
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(shard = %shard_key, %err, "unparsable LastModifiedDate, skipping row");
                        continue;
                    }
                }
            }
            let Some(bucket) = record.get(columns.bucket) else {
                continue;
            };
            rows.push(ManifestRow {
                source_container: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(rows)
    }

    async fn fallback_listing(
        &self,
        request: &SweepRequest,
        checkpoint: Option<DateTime<Utc>>,
    ) -> Result<Vec<ManifestRow>, BackupError> {
        let prefixes = self
            .config
            .object_filter
            .allowed_prefixes
            .get(&request.tier)
            .filter(|p| !p.is_empty())
            .cloned()
            .unwrap_or_else(|| vec![String::new()]);

        let deadline = (self.config.fallback_time_limit_seconds > 0)
            .then(|| std::time::Instant::now() + std::time::Duration::from_secs(self.config.fallback_time_limit_seconds));
        let max_objects = (self.config.fallback_max_objects > 0).then_some(self.config.fallback_max_objects);

        let mut rows = Vec::new();
        'prefixes: for prefix in prefixes {
            let listing = self
                .origin
                .list_objects(&request.source, &prefix)
                .await
                .map_err(|e| BackupError::Fatal(format!("fallback listing failed: {e}")))?;
            for object in listing {
                if let Some(deadline) = deadline {
                    if std::time::Instant::now() >= deadline {
                        warn!(source = %request.source, "fallback listing hit its wall-time cap");
                        break 'prefixes;
                    }
                }
                if let Some(max) = max_objects {
                    if rows.len() as u64 >= max {
                        warn!(source = %request.source, "fallback listing hit its object-count cap");
                        break 'prefixes;
                    }
                }
                if object.key.ends_with('/') {
                    continue;
                }
                if let Some(checkpoint) = checkpoint {
                    if object.last_modified <= checkpoint {
                        continue;
                    }
                }
                rows.push(ManifestRow {
                    source_container: request.source.clone(),
                    key: object.key,
                });
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_core::object_store::test_support::InMemoryStore;
    use chrono::TimeZone;
    use std::io::Write;

    fn config() -> Arc<Config> {
        std::env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        let config = Config::from_env().unwrap();
        std::env::remove_var("CENTRAL_BACKUP_BUCKET");
        Arc::new(config)
    }

    fn gzip_csv(rows: &[(&str, &str, &str)]) -> Vec<u8> {
        let mut csv_bytes = Vec::new();
        {
            let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(&mut csv_bytes);
            for (bucket, key, last_modified) in rows {
                writer.write_record([*bucket, *key, *last_modified]).unwrap();
            }
            writer.flush().unwrap();
        }
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&csv_bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn planner(store: Arc<InMemoryStore>) -> SweepPlanner {
        let checkpoint = Arc::new(CheckpointStore::new(store.clone(), "central"));
        let manifest_writer = Arc::new(ManifestWriter::new(store.clone()));
        SweepPlanner::new(store.clone(), store, checkpoint, manifest_writer, config())
    }

    #[tokio::test]
    async fn descriptor_driven_sweep_filters_by_checkpoint() {
        let store = Arc::new(InMemoryStore::new());
        let shard = gzip_csv(&[
            ("b-1", "data/old.txt", "2025-01-01T00:00:00Z"),
            ("b-1", "data/new.txt", "2025-06-01T00:00:00Z"),
        ]);
        store.seed("central", "inventory-source/b-1/shard-1.csv.gz", shard);
        let descriptor = serde_json::json!({
            "files": [{"key": "inventory-source/b-1/shard-1.csv.gz"}],
            "file_schema": "Bucket,Key,LastModifiedDate",
        });
        store.seed(
            "central",
            "inventory-source/b-1/manifest.json",
            serde_json::to_vec(&descriptor).unwrap(),
        );
        store
            .put_object(
                "central",
                "checkpoints/b-1/incremental.txt",
                Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap().to_rfc3339().into_bytes(),
                &[],
            )
            .await
            .unwrap();

        let planner = planner(store.clone());
        let request = SweepRequest {
            source: "b-1".to_string(),
            central_container: "central".to_string(),
            mode: BackupMode::Incremental,
            tier: CriticalityTier::Critical,
            enumeration_prefix: "inventory-source/b-1/".to_string(),
        };
        let result = planner.plan_sweep(&request).await.unwrap();
        let SweepResult::Completed { object_count, effective_mode, .. } = result else {
            panic!("expected Completed");
        };
        assert_eq!(object_count, 1);
        assert_eq!(effective_mode, BackupMode::Incremental);
    }

    #[tokio::test]
    async fn full_sweep_ignores_the_checkpoint_and_captures_the_complete_snapshot() {
        let store = Arc::new(InMemoryStore::new());
        let shard = gzip_csv(&[
            ("b-1", "data/old.txt", "2025-01-01T00:00:00Z"),
            ("b-1", "data/new.txt", "2025-06-01T00:00:00Z"),
        ]);
        store.seed("central", "inventory-source/b-1/shard-1.csv.gz", shard);
        let descriptor = serde_json::json!({
            "files": [{"key": "inventory-source/b-1/shard-1.csv.gz"}],
            "file_schema": "Bucket,Key,LastModifiedDate",
        });
        store.seed(
            "central",
            "inventory-source/b-1/manifest.json",
            serde_json::to_vec(&descriptor).unwrap(),
        );
        store
            .put_object(
                "central",
                "checkpoints/b-1/full.txt",
                Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap().to_rfc3339().into_bytes(),
                &[],
            )
            .await
            .unwrap();

        let planner = planner(store.clone());
        let request = SweepRequest {
            source: "b-1".to_string(),
            central_container: "central".to_string(),
            mode: BackupMode::Full,
            tier: CriticalityTier::Critical,
            enumeration_prefix: "inventory-source/b-1/".to_string(),
        };
        let result = planner.plan_sweep(&request).await.unwrap();
        let SweepResult::Completed { object_count, effective_mode, .. } = result else {
            panic!("expected Completed");
        };
        assert_eq!(object_count, 2);
        assert_eq!(effective_mode, BackupMode::Full);
    }

    #[tokio::test]
    async fn first_run_incremental_escalates_to_full_when_no_descriptor_exists() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("b-1", "data/a.txt", b"x".to_vec());
        std::env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        std::env::set_var("FORCE_FULL_ON_FIRST_RUN", "true");
        let config = Arc::new(Config::from_env().unwrap());
        std::env::remove_var("CENTRAL_BACKUP_BUCKET");
        std::env::remove_var("FORCE_FULL_ON_FIRST_RUN");

        let checkpoint = Arc::new(CheckpointStore::new(store.clone(), "central"));
        let manifest_writer = Arc::new(ManifestWriter::new(store.clone()));
        let planner = SweepPlanner::new(store.clone(), store.clone(), checkpoint, manifest_writer, config);

        let request = SweepRequest {
            source: "b-1".to_string(),
            central_container: "central".to_string(),
            mode: BackupMode::Incremental,
            tier: CriticalityTier::Critical,
            enumeration_prefix: "inventory-source/b-1/".to_string(),
        };
        let result = planner.plan_sweep(&request).await.unwrap();
        let SweepResult::Completed { effective_mode, object_count, .. } = result else {
            panic!("expected Completed");
        };
        assert_eq!(effective_mode, BackupMode::Full);
        assert_eq!(object_count, 1);
    }

    #[tokio::test]
    async fn fallback_listing_caps_at_configured_object_count() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..5 {
            store.seed("b-1", &format!("data/{i}.txt"), b"x".to_vec());
        }
        std::env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        std::env::set_var("FALLBACK_MAX_OBJECTS", "3");
        let config = Arc::new(Config::from_env().unwrap());
        std::env::remove_var("CENTRAL_BACKUP_BUCKET");
        std::env::remove_var("FALLBACK_MAX_OBJECTS");

        let checkpoint = Arc::new(CheckpointStore::new(store.clone(), "central"));
        let manifest_writer = Arc::new(ManifestWriter::new(store.clone()));
        let planner = SweepPlanner::new(store.clone(), store.clone(), checkpoint, manifest_writer, config);

        let request = SweepRequest {
            source: "b-1".to_string(),
            central_container: "central".to_string(),
            mode: BackupMode::Full,
            tier: CriticalityTier::Critical,
            enumeration_prefix: "inventory-source/b-1/".to_string(),
        };
        let result = planner.plan_sweep(&request).await.unwrap();
        let SweepResult::Completed { object_count, .. } = result else {
            panic!("expected Completed");
        };
        assert_eq!(object_count, 3);
    }

    #[tokio::test]
    async fn fallback_listing_dedups_keys_seen_under_overlapping_prefixes() {
        let store = Arc::new(InMemoryStore::new());
        store.seed("b-1", "data/a.txt", b"x".to_vec());
        std::env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        std::env::set_var("ALLOWED_PREFIXES", r#"{"Critical": ["", "data/"]}"#);
        let config = Arc::new(Config::from_env().unwrap());
        std::env::remove_var("CENTRAL_BACKUP_BUCKET");
        std::env::remove_var("ALLOWED_PREFIXES");

        let checkpoint = Arc::new(CheckpointStore::new(store.clone(), "central"));
        let manifest_writer = Arc::new(ManifestWriter::new(store.clone()));
        let planner = SweepPlanner::new(store.clone(), store.clone(), checkpoint, manifest_writer, config);

        let request = SweepRequest {
            source: "b-1".to_string(),
            central_container: "central".to_string(),
            mode: BackupMode::Full,
            tier: CriticalityTier::Critical,
            enumeration_prefix: "inventory-source/b-1/".to_string(),
        };
        let result = planner.plan_sweep(&request).await.unwrap();
        let SweepResult::Completed { object_count, .. } = result else {
            panic!("expected Completed");
        };
        assert_eq!(object_count, 1);
    }

    #[tokio::test]
    async fn zero_rows_returns_empty_without_writing_a_manifest() {
        let store = Arc::new(InMemoryStore::new());
        let planner = planner(store.clone());
        let request = SweepRequest {
            source: "b-1".to_string(),
            central_container: "central".to_string(),
            mode: BackupMode::Full,
            tier: CriticalityTier::Critical,
            enumeration_prefix: "inventory-source/b-1/".to_string(),
        };
        let result = planner.plan_sweep(&request).await.unwrap();
        assert!(matches!(result, SweepResult::Empty));
    }
}
