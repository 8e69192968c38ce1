//! Environment configuration (§6).

use std::collections::HashMap;
use std::env;

use tracing::warn;

use crate::error::ConfigError;
use crate::filter::ObjectFilter;
use crate::model::CriticalityTier;
use crate::object_store::EnumerationFrequency;

/// Per-tier numeric setting: hours for that tier, `None` meaning disabled.
#[derive(Debug, Clone, Default)]
pub struct TierTable<T> {
    critical: Option<T>,
    less_critical: Option<T>,
    non_critical: Option<T>,
}

impl<T: Copy> TierTable<T> {
    #[must_use]
    pub fn get(&self, tier: CriticalityTier) -> Option<T> {
        match tier {
            CriticalityTier::Critical => self.critical,
            CriticalityTier::LessCritical => self.less_critical,
            CriticalityTier::NonCritical => self.non_critical,
        }
    }
}

/// Full environment configuration table (§6).
#[derive(Debug, Clone)]
pub struct Config {
    pub central_backup_bucket: String,
    pub central_account_id: Option<String>,
    pub sqs_queue_arn: Option<String>,
    pub backup_bucket_arn: Option<String>,
    pub batch_role_arn: Option<String>,
    pub account_id: Option<String>,
    pub initiative: String,
    pub generation_incremental: String,
    pub backup_frequency_hours: TierTable<u32>,
    pub object_filter: ObjectFilter,
    pub criticalities_with_notifications: Vec<CriticalityTier>,
    pub force_full_on_first_run: bool,
    pub fallback_max_objects: u64,
    pub fallback_time_limit_seconds: u64,
    pub disable_window_checkpoint: bool,
}

impl Config {
    /// Loads and validates the process environment, per §6's table.
    pub fn from_env() -> Result<Self, ConfigError> {
        let central_backup_bucket = required("CENTRAL_BACKUP_BUCKET")?;

        let initiative = env::var("INITIATIVE")
            .or_else(|_| env::var("INICIATIVA"))
            .unwrap_or_else(|_| "default".to_string());

        let backup_frequency_hours = TierTable {
            critical: tier_hours("BACKUP_FREQUENCY_HOURS_CRITICAL")?,
            less_critical: tier_hours("BACKUP_FREQUENCY_HOURS_LESSCRITICAL")?,
            non_critical: tier_hours("BACKUP_FREQUENCY_HOURS_NONCRITICAL")?,
        };

        let object_filter = ObjectFilter {
            allowed_prefixes: parse_allowed_prefixes("ALLOWED_PREFIXES"),
            exclude_prefixes: parse_string_list("EXCLUDE_KEY_PREFIXES"),
            exclude_suffixes: parse_string_list("EXCLUDE_KEY_SUFFIXES"),
        };

        let criticalities_with_notifications = env::var("CRITICALITIES_WITH_NOTIFICATIONS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| CriticalityTier::from_tag_value(Some(s)))
                    .collect()
            })
            .unwrap_or_else(|| vec![CriticalityTier::Critical]);

        Ok(Self {
            central_backup_bucket,
            central_account_id: env::var("CENTRAL_ACCOUNT_ID").ok(),
            sqs_queue_arn: env::var("SQS_QUEUE_ARN").ok(),
            backup_bucket_arn: env::var("BACKUP_BUCKET_ARN").ok(),
            batch_role_arn: env::var("BATCH_ROLE_ARN").ok(),
            account_id: env::var("ACCOUNT_ID").ok(),
            initiative,
            generation_incremental: env::var("GENERATION_INCREMENTAL")
                .unwrap_or_else(|_| "son".to_string()),
            backup_frequency_hours,
            object_filter,
            criticalities_with_notifications,
            force_full_on_first_run: parse_bool("FORCE_FULL_ON_FIRST_RUN"),
            fallback_max_objects: parse_u64("FALLBACK_MAX_OBJECTS", 0),
            fallback_time_limit_seconds: parse_u64("FALLBACK_TIME_LIMIT_SECONDS", 0),
            disable_window_checkpoint: parse_bool("DISABLE_WINDOW_CHECKPOINT"),
        })
    }

    /// Whether the tier requires event notifications (§4.4 policy).
    #[must_use]
    pub fn notifications_required(&self, tier: CriticalityTier) -> bool {
        self.criticalities_with_notifications.contains(&tier)
    }

    /// The enumeration frequency target for a tier (§4.4 "Enumeration Frequency
    /// Policy"): Daily for Critical/LessCritical, Weekly for NonCritical.
    #[must_use]
    pub fn enumeration_frequency(&self, tier: CriticalityTier) -> EnumerationFrequency {
        match tier {
            CriticalityTier::Critical | CriticalityTier::LessCritical => EnumerationFrequency::Daily,
            CriticalityTier::NonCritical => EnumerationFrequency::Weekly,
        }
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn tier_hours(name: &'static str) -> Result<Option<u32>, ConfigError> {
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => {
            let value: u32 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: name,
                reason: format!("not an integer: {raw}"),
            })?;
            Ok(if value == 0 { None } else { Some(value) })
        }
        Err(_) => Ok(None),
    }
}

fn parse_bool(name: &'static str) -> bool {
    env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn parse_u64(name: &'static str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_string_list(name: &'static str) -> Vec<String> {
    let Ok(raw) = env::var(name) else {
        return Vec::new();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<String>>(trimmed) {
            Ok(list) => return list,
            Err(err) => {
                warn!(%name, %err, "failed to parse JSON list, falling back to unset");
                return Vec::new();
            }
        }
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_allowed_prefixes(name: &'static str) -> HashMap<CriticalityTier, Vec<String>> {
    let Ok(raw) = env::var(name) else {
        return HashMap::new();
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return HashMap::new();
    }
    match serde_json::from_str::<HashMap<String, Vec<String>>>(trimmed) {
        Ok(map) => map
            .into_iter()
            .map(|(tier, prefixes)| (CriticalityTier::from_tag_value(Some(&tier)), prefixes))
            .collect(),
        Err(err) => {
            warn!(%name, %err, "failed to parse JSON tier map, falling back to unset");
            HashMap::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation must be serialized across tests in this module.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for var in [
            "CENTRAL_BACKUP_BUCKET",
            "INITIATIVE",
            "INICIATIVA",
            "BACKUP_FREQUENCY_HOURS_CRITICAL",
            "ALLOWED_PREFIXES",
            "EXCLUDE_KEY_PREFIXES",
            "CRITICALITIES_WITH_NOTIFICATIONS",
            "FORCE_FULL_ON_FIRST_RUN",
        ] {
            env::remove_var(var);
        }
    }

    #[test]
    fn missing_required_variable_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("CENTRAL_BACKUP_BUCKET")));
    }

    #[test]
    fn loads_minimal_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        let config = Config::from_env().unwrap();
        assert_eq!(config.central_backup_bucket, "central");
        assert_eq!(config.initiative, "default");
        assert!(config.notifications_required(CriticalityTier::Critical));
        assert!(!config.notifications_required(CriticalityTier::NonCritical));
        clear_all();
    }

    #[test]
    fn zero_frequency_hours_means_disabled() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        env::set_var("BACKUP_FREQUENCY_HOURS_CRITICAL", "0");
        let config = Config::from_env().unwrap();
        assert_eq!(config.backup_frequency_hours.get(CriticalityTier::Critical), None);
        clear_all();
    }

    #[test]
    fn malformed_allowed_prefixes_soft_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        env::set_var("ALLOWED_PREFIXES", "not-json");
        let config = Config::from_env().unwrap();
        assert!(config.object_filter.allowed_prefixes.is_empty());
        clear_all();
    }
}
