//! Core data model (§3): criticality tiers, generations, window/run identifiers,
//! source containers, manifests, checkpoints and enumeration descriptors.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Closed enum driving incremental window length, enumeration frequency, and
/// whether event notifications are provisioned for a source container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CriticalityTier {
    Critical,
    LessCritical,
    NonCritical,
}

impl CriticalityTier {
    /// Tag value used by `BackupCriticality` on a source container.
    #[must_use]
    pub fn as_tag_value(self) -> &'static str {
        match self {
            CriticalityTier::Critical => "Critical",
            CriticalityTier::LessCritical => "LessCritical",
            CriticalityTier::NonCritical => "NonCritical",
        }
    }

    /// Parses a tag value, defaulting to `LessCritical` for anything unrecognized.
    #[must_use]
    pub fn from_tag_value(value: Option<&str>) -> Self {
        match value {
            Some("Critical") => CriticalityTier::Critical,
            Some("NonCritical") => CriticalityTier::NonCritical,
            _ => CriticalityTier::LessCritical,
        }
    }

    /// Path segment used in `criticality=<tier>` key grammar.
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        self.as_tag_value()
    }
}

impl fmt::Display for CriticalityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag_value())
    }
}

/// Retention class assigned to a produced dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupGeneration {
    Son,
    Father,
    Grandfather,
}

impl BackupGeneration {
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            BackupGeneration::Son => "son",
            BackupGeneration::Father => "father",
            BackupGeneration::Grandfather => "grandfather",
        }
    }
}

impl fmt::Display for BackupGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl std::str::FromStr for BackupGeneration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "son" => Ok(BackupGeneration::Son),
            "father" => Ok(BackupGeneration::Father),
            "grandfather" => Ok(BackupGeneration::Grandfather),
            other => Err(format!("unknown generation: {other}")),
        }
    }
}

/// The backup mode: continuous incremental windows, or a point-in-time sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupMode {
    Incremental,
    Full,
}

impl BackupMode {
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            BackupMode::Incremental => "incremental",
            BackupMode::Full => "full",
        }
    }
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl std::str::FromStr for BackupMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(BackupMode::Incremental),
            "full" => Ok(BackupMode::Full),
            other => Err(format!("unknown backup mode: {other}")),
        }
    }
}

/// A canonical UTC window identifier `YYYYMMDDTHHMMZ`, minute always `00`.
///
/// A window is the half-open interval `[start, start + tier_hours)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WindowLabel(DateTime<Utc>);

impl WindowLabel {
    /// Computes `window_start = event_time.floor_to(tier_hours)` on the hour axis (P1).
    ///
    /// `tier_hours` must be greater than zero; callers skip tiers with no configured
    /// window length before reaching this point (§4.5).
    #[must_use]
    pub fn quantize(event_time: DateTime<Utc>, tier_hours: u32) -> Self {
        debug_assert!(tier_hours > 0, "tier_hours must be non-zero");
        let floored_hour = (event_time.hour() / tier_hours) * tier_hours;
        let start = event_time
            .date_naive()
            .and_hms_opt(floored_hour, 0, 0)
            .unwrap_or_else(|| event_time.date_naive().and_hms_opt(0, 0, 0).unwrap())
            .and_utc();
        WindowLabel(start)
    }

    /// Parses a `YYYYMMDDTHHMMZ` label.
    pub fn parse(label: &str) -> Option<Self> {
        let stripped = label.strip_suffix('Z')?;
        let (date, time) = stripped.split_once('T')?;
        if date.len() != 8 || time.len() != 4 {
            return None;
        }
        let year: i32 = date[0..4].parse().ok()?;
        let month: u32 = date[4..6].parse().ok()?;
        let day: u32 = date[6..8].parse().ok()?;
        let hour: u32 = time[0..2].parse().ok()?;
        let minute: u32 = time[2..4].parse().ok()?;
        let naive = chrono::NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)?;
        Some(WindowLabel(naive.and_utc()))
    }

    #[must_use]
    pub fn start(self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for WindowLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Z", self.0.format("%Y%m%dT%H%M"))
    }
}

/// A UTC timestamp string `YYYYMMDD-HHMMSS` identifying one invocation of the
/// Aggregator or Planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunId(DateTime<Utc>);

impl RunId {
    #[must_use]
    pub fn now(now: DateTime<Utc>) -> Self {
        RunId(now)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y%m%d-%H%M%S"))
    }
}

/// A named object-store bucket tagged for protection, never owned by the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContainer {
    pub name: String,
    pub account_id: String,
    pub criticality_tier: CriticalityTier,
    pub tags: HashMap<String, String>,
}

/// One `(source_container, key)` row of a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub source_container: String,
    pub key: String,
}

/// Location of a finalized manifest plus the integrity tag captured at upload time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestLocation {
    pub bucket: String,
    pub key: String,
    pub integrity_tag: String,
    pub row_count: u64,
}

/// Parameters needed to launch a batch-copy job (§4.7), independent of how the
/// manifest was produced.
#[derive(Debug, Clone)]
pub struct BatchCopyRequest {
    pub manifest_bucket: String,
    pub manifest_key: String,
    pub manifest_etag: String,
    pub target_bucket: String,
    pub target_key_prefix: String,
    pub reports_prefix: String,
    pub role_arn: String,
    pub client_token: String,
}

/// Deterministic client token derivation, shared between the Aggregator (§4.5) and
/// the Launcher (§4.7): `sha256("<source>|<mode>|<generation>|<tier>|<window_label>")`.
#[must_use]
pub fn deterministic_client_token(
    source: &str,
    mode: BackupMode,
    generation: BackupGeneration,
    tier: CriticalityTier,
    window_label: &WindowLabel,
) -> String {
    use sha2::{Digest, Sha256};
    let input = format!(
        "{source}|{mode}|{generation}|{tier}|{window_label}",
        mode = mode.path_segment(),
        generation = generation.path_segment(),
    );
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)
}

/// A shard listing + required-column schema for a point-in-time object enumeration.
#[derive(Debug, Clone, Deserialize)]
pub struct EnumerationDescriptor {
    pub files: Vec<EnumerationShard>,
    /// Comma-separated column names, e.g. `"Bucket,Key,Size,LastModifiedDate,ETag"`.
    pub file_schema: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnumerationShard {
    pub key: String,
}

impl EnumerationDescriptor {
    /// Resolves the column indices of `Bucket`, `Key`, `LastModifiedDate`.
    ///
    /// Fails if any required column is missing (§4.6 structural failure).
    pub fn required_columns(&self) -> Result<EnumerationColumns, crate::error::BackupError> {
        let columns: Vec<&str> = self.file_schema.split(',').map(str::trim).collect();
        let find = |name: &str| {
            columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    crate::error::BackupError::Fatal(format!(
                        "enumeration descriptor schema missing required column: {name}"
                    ))
                })
        };
        Ok(EnumerationColumns {
            bucket: find("Bucket")?,
            key: find("Key")?,
            last_modified_date: find("LastModifiedDate")?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnumerationColumns {
    pub bucket: usize,
    pub key: usize,
    pub last_modified_date: usize,
}
