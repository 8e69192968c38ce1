//! Incremental Window Aggregator (§4.5): decodes a batch of queue messages, groups
//! object-created records by `(tier, source, window)`, and commits one manifest +
//! batch-copy job per group.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

use backup_checkpoint::CheckpointStore;
use backup_core::config::Config;
use backup_core::model::{
    deterministic_client_token, BackupGeneration, BackupMode, BatchCopyRequest, CriticalityTier,
    ManifestRow, RunId, WindowLabel,
};
use backup_core::object_store::BatchJobClient;
use backup_core::path::{self, DataRootTag};
use backup_core::queue::{decode_envelope, QueueMessage};
use backup_discovery::CriticalityResolver;
use backup_manifest::{ManifestWriter, WriteOutcome};
use chrono::Utc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    tier: CriticalityTier,
    source: String,
    window: WindowLabel,
}

#[derive(Default)]
struct GroupAccumulator {
    keys: std::collections::BTreeSet<String>,
    message_ids: HashSet<String>,
}

/// Per-group result, kept for observability and tests (§4.5's literal scenarios).
#[derive(Debug)]
pub enum GroupStatus {
    SkippedAlreadyMarked,
    Committed { object_count: usize, job_id: String },
    Failed(String),
}

#[derive(Debug)]
pub struct GroupReport {
    pub tier: CriticalityTier,
    pub source: String,
    pub window: WindowLabel,
    pub status: GroupStatus,
}

/// §4.5 step 4: partial-failure response. `failed_message_ids` is the complete
/// retry set; every other message in the batch is implicitly acknowledged.
#[derive(Debug, Default)]
pub struct AggregatorOutcome {
    pub failed_message_ids: Vec<String>,
    pub groups: Vec<GroupReport>,
}

pub struct Aggregator {
    config: Arc<Config>,
    resolver: Arc<CriticalityResolver>,
    checkpoint: Arc<CheckpointStore>,
    manifest_writer: Arc<ManifestWriter>,
    batch_job_client: Arc<dyn BatchJobClient>,
    central_container: String,
}

impl Aggregator {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        resolver: Arc<CriticalityResolver>,
        checkpoint: Arc<CheckpointStore>,
        manifest_writer: Arc<ManifestWriter>,
        batch_job_client: Arc<dyn BatchJobClient>,
        central_container: impl Into<String>,
    ) -> Self {
        Self {
            config,
            resolver,
            checkpoint,
            manifest_writer,
            batch_job_client,
            central_container: central_container.into(),
        }
    }

    pub async fn process_batch(&self, messages: &[QueueMessage], run_id: RunId) -> AggregatorOutcome {
        let mut failed: HashSet<String> = HashSet::new();
        let mut groups: HashMap<GroupKey, GroupAccumulator> = HashMap::new();

        for message in messages {
            let records = match decode_envelope(&message.body) {
                Ok(records) => records,
                Err(err) => {
                    warn!(message_id = %message.message_id, %err, "queue message failed to decode");
                    failed.insert(message.message_id.clone());
                    continue;
                }
            };

            for record in records {
                let tier = match self.resolver.resolve(&record.source_container).await {
                    Ok(tier) => tier,
                    Err(err) => {
                        warn!(source = %record.source_container, %err, "criticality resolution failed");
                        failed.insert(message.message_id.clone());
                        continue;
                    }
                };

                let Some(tier_hours) = self.config.backup_frequency_hours.get(tier) else {
                    debug!(source = %record.source_container, ?tier, "tier has no configured window length, skipping");
                    continue;
                };

                if !self.config.object_filter.retain(tier, &record.key) {
                    continue;
                }

                let window = WindowLabel::quantize(record.event_time, tier_hours);
                let key = GroupKey {
                    tier,
                    source: record.source_container.clone(),
                    window,
                };
                let group = groups.entry(key).or_default();
                group.keys.insert(record.key);
                group.message_ids.insert(message.message_id.clone());
            }
        }

        let mut reports = Vec::with_capacity(groups.len());
        for (key, accumulator) in groups {
            let status = self.commit_group(&key, &accumulator, run_id).await;
            if let GroupStatus::Failed(_) = &status {
                failed.extend(accumulator.message_ids.iter().cloned());
            }
            reports.push(GroupReport {
                tier: key.tier,
                source: key.source,
                window: key.window,
                status,
            });
        }

        AggregatorOutcome {
            failed_message_ids: failed.into_iter().collect(),
            groups: reports,
        }
    }

    async fn commit_group(&self, key: &GroupKey, accumulator: &GroupAccumulator, run_id: RunId) -> GroupStatus {
        if self.checkpoint.has_window(&key.source, key.tier, &key.window).await {
            debug!(source = %key.source, window = %key.window, "window already marked, skipping");
            return GroupStatus::SkippedAlreadyMarked;
        }

        let generation = BackupGeneration::from_str(&self.config.generation_incremental).unwrap_or_else(|err| {
            warn!(%err, "unrecognized incremental generation, defaulting to son");
            BackupGeneration::Son
        });

        let manifest_key = path::canonical_incremental_manifest_key(
            key.tier,
            &self.config.initiative,
            &key.source,
            &key.window,
            &run_id,
        );

        // `accumulator.keys` is a `BTreeSet`, so this is already deduplicated and
        // lexicographically sorted (P2).
        let rows = accumulator.keys.iter().map(|object_key| ManifestRow {
            source_container: key.source.clone(),
            key: object_key.clone(),
        });

        let object_count = accumulator.keys.len();
        let metadata_strings = [
            ("criticality".to_string(), key.tier.to_string()),
            ("object-count".to_string(), object_count.to_string()),
            ("source-bucket".to_string(), key.source.clone()),
            ("window-start".to_string(), key.window.start().to_rfc3339()),
            ("created-at".to_string(), Utc::now().to_rfc3339()),
        ];
        let metadata: Vec<(&str, &str)> = metadata_strings.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let location = match self
            .manifest_writer
            .write_manifest(&self.central_container, &manifest_key, rows, &metadata)
            .await
        {
            Ok(WriteOutcome::Written(location)) => location,
            Ok(WriteOutcome::Empty) => {
                return GroupStatus::Failed("manifest writer produced zero rows for a non-empty group".to_string());
            }
            Err(err) => {
                return GroupStatus::Failed(format!("manifest write failed: {err}"));
            }
        };

        let Some(role_arn) = self.config.batch_role_arn.clone() else {
            return GroupStatus::Failed("BATCH_ROLE_ARN is not configured".to_string());
        };

        let root = path::data_root_prefix(
            key.tier,
            BackupMode::Incremental,
            generation,
            &self.config.initiative,
            &key.source,
            key.window.start(),
        );
        let target_key_prefix = path::data_prefix(&root, DataRootTag::Window(&key.window));
        let reports_prefix = path::reports_prefix(
            key.tier,
            BackupMode::Incremental,
            generation,
            &self.config.initiative,
            &key.source,
            DataRootTag::Window(&key.window),
        );
        let client_token = deterministic_client_token(&key.source, BackupMode::Incremental, generation, key.tier, &key.window);

        let request = BatchCopyRequest {
            manifest_bucket: self.central_container.clone(),
            manifest_key,
            manifest_etag: location.integrity_tag,
            target_bucket: self.central_container.clone(),
            target_key_prefix,
            reports_prefix,
            role_arn,
            client_token,
        };

        match self.batch_job_client.create_job(&request).await {
            Ok(job_id) => {
                if let Err(err) = self.checkpoint.mark_window(&key.source, key.tier, &key.window).await {
                    return GroupStatus::Failed(format!("window marker write failed after job submission: {err}"));
                }
                info!(source = %key.source, window = %key.window, %job_id, "incremental window committed");
                GroupStatus::Committed { object_count, job_id }
            }
            Err(err) => GroupStatus::Failed(format!("batch-copy job submission failed: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_core::object_store::test_support::InMemoryStore;
    use backup_core::tagging::TaggingClient;
    use chrono::TimeZone;
    use std::collections::HashMap as StdHashMap;

    struct NoTagging;
    #[async_trait::async_trait]
    impl TaggingClient for NoTagging {
        async fn list_backup_enabled_containers(&self) -> Result<Vec<backup_core::model::SourceContainer>, backup_core::error::StoreError> {
            Ok(Vec::new())
        }
        async fn get_tags(&self, _container: &str) -> Result<StdHashMap<String, String>, backup_core::error::StoreError> {
            let mut tags = StdHashMap::new();
            tags.insert("BackupCriticality".to_string(), "Critical".to_string());
            Ok(tags)
        }
    }

    fn config() -> Arc<Config> {
        std::env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        std::env::set_var("BACKUP_FREQUENCY_HOURS_CRITICAL", "12");
        std::env::set_var("BATCH_ROLE_ARN", "arn:aws:iam::1:role/batch");
        std::env::set_var("INITIATIVE", "X");
        let config = Config::from_env().unwrap();
        std::env::remove_var("CENTRAL_BACKUP_BUCKET");
        std::env::remove_var("BACKUP_FREQUENCY_HOURS_CRITICAL");
        std::env::remove_var("BATCH_ROLE_ARN");
        std::env::remove_var("INITIATIVE");
        Arc::new(config)
    }

    fn envelope(bucket: &str, key: &str, hour: u32) -> String {
        let event_time = Utc.with_ymd_and_hms(2025, 10, 20, hour, 15, 0).unwrap().to_rfc3339();
        format!(
            r#"{{"Records":[{{"eventTime":"{event_time}","s3":{{"bucket":{{"name":"{bucket}"}},"object":{{"key":"{key}"}}}}}}]}}"#
        )
    }

    fn build_aggregator(store: Arc<InMemoryStore>) -> Aggregator {
        let config = config();
        let resolver = Arc::new(CriticalityResolver::new(Arc::new(NoTagging)));
        let checkpoint = Arc::new(CheckpointStore::new(store.clone(), "central"));
        let manifest_writer = Arc::new(ManifestWriter::new(store.clone()));
        Aggregator::new(config, resolver, checkpoint, manifest_writer, store, "central")
    }

    #[tokio::test]
    async fn commits_one_group_per_window_and_acknowledges_its_message() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = build_aggregator(store.clone());
        let messages = vec![QueueMessage {
            message_id: "m-1".to_string(),
            body: envelope("b-1", "data/a.txt", 13),
        }];
        let outcome = aggregator.process_batch(&messages, RunId::now(Utc.with_ymd_and_hms(2025, 10, 20, 13, 20, 0).unwrap())).await;
        assert!(outcome.failed_message_ids.is_empty());
        assert_eq!(outcome.groups.len(), 1);
        assert!(matches!(outcome.groups[0].status, GroupStatus::Committed { object_count: 1, .. }));
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn replaying_a_marked_window_is_skipped_without_a_second_job() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = build_aggregator(store.clone());
        let run_id = RunId::now(Utc.with_ymd_and_hms(2025, 10, 20, 13, 20, 0).unwrap());
        let messages = vec![QueueMessage {
            message_id: "m-1".to_string(),
            body: envelope("b-1", "data/a.txt", 13),
        }];
        aggregator.process_batch(&messages, run_id).await;
        assert_eq!(store.job_count(), 1);

        let replay = vec![QueueMessage {
            message_id: "m-2".to_string(),
            body: envelope("b-1", "data/a.txt", 13),
        }];
        let outcome = aggregator.process_batch(&replay, run_id).await;
        assert!(matches!(outcome.groups[0].status, GroupStatus::SkippedAlreadyMarked));
        assert_eq!(store.job_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_keys_across_messages_are_committed_once() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = build_aggregator(store.clone());
        let messages = vec![
            QueueMessage {
                message_id: "m-1".to_string(),
                body: envelope("b-1", "data/a.txt", 13),
            },
            QueueMessage {
                message_id: "m-2".to_string(),
                body: envelope("b-1", "data/a.txt", 13),
            },
        ];
        let outcome = aggregator.process_batch(&messages, RunId::now(Utc.with_ymd_and_hms(2025, 10, 20, 13, 20, 0).unwrap())).await;
        assert_eq!(outcome.groups.len(), 1);
        assert!(matches!(outcome.groups[0].status, GroupStatus::Committed { object_count: 1, .. }));
    }

    #[tokio::test]
    async fn malformed_message_is_marked_failed_without_affecting_others() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = build_aggregator(store.clone());
        let messages = vec![
            QueueMessage {
                message_id: "bad".to_string(),
                body: "not json".to_string(),
            },
            QueueMessage {
                message_id: "good".to_string(),
                body: envelope("b-1", "data/a.txt", 13),
            },
        ];
        let outcome = aggregator.process_batch(&messages, RunId::now(Utc.with_ymd_and_hms(2025, 10, 20, 13, 20, 0).unwrap())).await;
        assert_eq!(outcome.failed_message_ids, vec!["bad".to_string()]);
        assert_eq!(outcome.groups.len(), 1);
    }

    #[tokio::test]
    async fn excluded_keys_never_form_a_group() {
        let store = Arc::new(InMemoryStore::new());
        std::env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        std::env::set_var("BACKUP_FREQUENCY_HOURS_CRITICAL", "12");
        std::env::set_var("BATCH_ROLE_ARN", "arn:aws:iam::1:role/batch");
        std::env::set_var("EXCLUDE_KEY_PREFIXES", "logs");
        let config = Arc::new(Config::from_env().unwrap());
        std::env::remove_var("CENTRAL_BACKUP_BUCKET");
        std::env::remove_var("BACKUP_FREQUENCY_HOURS_CRITICAL");
        std::env::remove_var("BATCH_ROLE_ARN");
        std::env::remove_var("EXCLUDE_KEY_PREFIXES");

        let resolver = Arc::new(CriticalityResolver::new(Arc::new(NoTagging)));
        let checkpoint = Arc::new(CheckpointStore::new(store.clone(), "central"));
        let manifest_writer = Arc::new(ManifestWriter::new(store.clone()));
        let aggregator = Aggregator::new(config, resolver, checkpoint, manifest_writer, store.clone(), "central");

        let messages = vec![QueueMessage {
            message_id: "m-1".to_string(),
            body: envelope("b-1", "logs/a.txt", 13),
        }];
        let outcome = aggregator.process_batch(&messages, RunId::now(Utc.with_ymd_and_hms(2025, 10, 20, 13, 20, 0).unwrap())).await;
        assert!(outcome.groups.is_empty());
        assert_eq!(store.job_count(), 0);
    }
}
