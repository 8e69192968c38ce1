//! Restore Resolver (§4.8): locates the latest manifest and data window for a
//! `(tier, mode, generation, source)` and replays objects back to their origin
//! container, grounded on `restore_from_backup/lambda_function.py`.

use std::sync::Arc;

use backup_core::config::Config;
use backup_core::error::BackupError;
use backup_core::model::{BackupGeneration, BackupMode, CriticalityTier};
use backup_core::object_store::{MetadataDirective, ObjectStore};
use backup_core::path;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{error, info, warn};

pub struct RestoreRequest {
    pub source: String,
    pub tier: CriticalityTier,
    pub mode: BackupMode,
    pub generation: BackupGeneration,
    /// Resolve the container for a specific point in time; `None` resolves the latest.
    pub at: Option<DateTime<Utc>>,
    pub prefix_filter: String,
    /// 0 means unlimited.
    pub max_objects: u64,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOutcome {
    pub manifest_key: String,
    pub data_prefix: String,
    pub restored: u64,
    pub skipped: u64,
    pub errors: u64,
}

pub struct RestoreResolver {
    central: Arc<dyn ObjectStore>,
    origin: Arc<dyn ObjectStore>,
    config: Arc<Config>,
}

impl RestoreResolver {
    #[must_use]
    pub fn new(central: Arc<dyn ObjectStore>, origin: Arc<dyn ObjectStore>, config: Arc<Config>) -> Self {
        Self { central, origin, config }
    }

    pub async fn restore(&self, request: &RestoreRequest) -> Result<RestoreOutcome, BackupError> {
        let (manifest_key, data_prefix) = self.resolve_manifest_and_data_prefix(request).await?;
        info!(manifest = %manifest_key, data_prefix = %data_prefix, "restoring from manifest");

        let body = self.central.get_object(&self.config.central_backup_bucket, &manifest_key).await?;
        let mut reader = csv::ReaderBuilder::new().has_headers(false).from_reader(body.as_ref());

        let mut outcome = RestoreOutcome {
            manifest_key: manifest_key.clone(),
            data_prefix: data_prefix.clone(),
            ..Default::default()
        };

        for record in reader.records() {
            let record = record.map_err(|e| BackupError::Fatal(format!("malformed manifest row: {e}")))?;
            let (Some(bucket), Some(key)) = (record.get(0), record.get(1)) else {
                outcome.skipped += 1;
                continue;
            };
            if bucket != request.source {
                outcome.skipped += 1;
                continue;
            }
            if !request.prefix_filter.is_empty() && !key.starts_with(request.prefix_filter.as_str()) {
                outcome.skipped += 1;
                continue;
            }

            if request.dry_run {
                outcome.restored += 1;
                if request.max_objects > 0 && outcome.restored >= request.max_objects {
                    break;
                }
                continue;
            }

            let src_key = format!("{data_prefix}{key}");
            match self
                .origin
                .copy_object(&self.config.central_backup_bucket, &src_key, &request.source, key, MetadataDirective::Replace)
                .await
            {
                Ok(_) => outcome.restored += 1,
                Err(err) => {
                    error!(key, src_key, %err, "restore copy failed");
                    outcome.errors += 1;
                }
            }
            if request.max_objects > 0 && outcome.restored >= request.max_objects {
                break;
            }
        }

        Ok(outcome)
    }

    async fn resolve_manifest_and_data_prefix(&self, request: &RestoreRequest) -> Result<(String, String), BackupError> {
        let manifest_key = match request.at {
            Some(at) => {
                let prefix = path::canonical_sweep_manifest_prefix(
                    request.tier,
                    request.mode,
                    &self.config.initiative,
                    &request.source,
                    at,
                );
                self.latest_csv_under(&prefix).await?.ok_or_else(|| {
                    BackupError::Fatal(format!("no manifest found under {prefix}"))
                })?
            }
            None => {
                let root = path::canonical_manifest_root(request.tier, request.mode, &self.config.initiative, &request.source);
                self.latest_csv_under(&root).await?.ok_or_else(|| {
                    BackupError::Fatal(format!("no manifest found under {root}"))
                })?
            }
        };

        let year = segment_value(&manifest_key, "year")
            .ok_or_else(|| BackupError::Fatal(format!("manifest key missing year segment: {manifest_key}")))?;
        let month = segment_value(&manifest_key, "month")
            .ok_or_else(|| BackupError::Fatal(format!("manifest key missing month segment: {manifest_key}")))?;
        let day = segment_value(&manifest_key, "day")
            .ok_or_else(|| BackupError::Fatal(format!("manifest key missing day segment: {manifest_key}")))?;
        let hour = segment_value(&manifest_key, "hour")
            .ok_or_else(|| BackupError::Fatal(format!("manifest key missing hour segment: {manifest_key}")))?;

        let at = Utc
            .with_ymd_and_hms(
                year.parse().unwrap_or(1970),
                month.parse().unwrap_or(1),
                day.parse().unwrap_or(1),
                hour.parse().unwrap_or(0),
                0,
                0,
            )
            .single()
            .ok_or_else(|| BackupError::Fatal(format!("manifest key has an invalid date: {manifest_key}")))?;

        let data_root = path::data_root_prefix(
            request.tier,
            request.mode,
            request.generation,
            &self.config.initiative,
            &request.source,
            at,
        );
        let data_prefix = self.latest_timestamp_prefix(&data_root).await?.ok_or_else(|| {
            BackupError::Fatal(format!("no timestamped data prefix found under {data_root}"))
        })?;

        Ok((manifest_key, data_prefix))
    }

    /// Lexically (and therefore chronologically, given the zero-padded grammar)
    /// greatest `.csv` key under `prefix`.
    async fn latest_csv_under(&self, prefix: &str) -> Result<Option<String>, BackupError> {
        let objects = self.central.list_objects(&self.config.central_backup_bucket, prefix).await?;
        Ok(objects
            .into_iter()
            .map(|o| o.key)
            .filter(|k| k.ends_with(".csv"))
            .max())
    }

    /// The most recent `<root>timestamp=<run_id>/` prefix observed among `root`'s objects.
    async fn latest_timestamp_prefix(&self, root: &str) -> Result<Option<String>, BackupError> {
        let objects = self.central.list_objects(&self.config.central_backup_bucket, root).await?;
        let latest = objects
            .iter()
            .filter_map(|o| segment_value(&o.key, "timestamp"))
            .max()
            .map(str::to_string);
        match latest {
            Some(ts) => Ok(Some(format!("{root}timestamp={ts}/"))),
            None => {
                warn!(root, "no timestamp prefix found while resolving restore data path");
                Ok(None)
            }
        }
    }
}

/// Returns the value of a `name=value` path segment, if present.
fn segment_value<'a>(key: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=");
    key.split('/').find_map(|segment| segment.strip_prefix(needle.as_str()))
}
