//! Central container key grammar (§6).
//!
//! ```text
//! inventory-source/<source>/<enumeration_id>/
//! manifests/temp/<source>-<uuid>.csv
//! manifests/criticality=<tier>/backup_type=<mode>/initiative=<i>/bucket=<source>/window=<label>/manifest-<run_id>.csv
//! manifests/criticality=<tier>/backup_type=<mode>/initiative=<i>/bucket=<source>/year=YYYY/month=MM/day=DD/hour=HH/manifest-*.csv
//! backup/criticality=<tier>/backup_type=<mode>/generation=<gen>/initiative=<i>/bucket=<source>/year=YYYY/month=MM/day=DD/hour=HH/(window=<…>|timestamp=<run_id>)/<original_key>
//! reports/…/<window|run>/
//! checkpoints/<source>/<mode>.txt
//! checkpoints/incremental/<source>/<tier>/<window>.marker
//! ```

use crate::model::{BackupGeneration, BackupMode, CriticalityTier, RunId, WindowLabel};
use chrono::{DateTime, Datelike, Utc};

/// `inventory-source/<source>/` root under which the enumeration writes its descriptor + shards.
#[must_use]
pub fn enumeration_prefix(source: &str) -> String {
    format!("inventory-source/{source}/")
}

/// `manifests/temp/<source>-<uuid>.csv`
#[must_use]
pub fn temp_manifest_key(source: &str, uuid: &str) -> String {
    format!("manifests/temp/{source}-{uuid}.csv")
}

/// `manifests/criticality=<tier>/backup_type=<mode>/initiative=<i>/bucket=<source>/window=<label>/manifest-<run_id>.csv`
#[must_use]
pub fn canonical_incremental_manifest_key(
    tier: CriticalityTier,
    initiative: &str,
    source: &str,
    window_label: &WindowLabel,
    run_id: &RunId,
) -> String {
    format!(
        "manifests/criticality={tier}/backup_type=incremental/initiative={initiative}/bucket={source}/window={window_label}/manifest-{run_id}.csv"
    )
}

/// `manifests/criticality=<tier>/backup_type=<mode>/initiative=<i>/bucket=<source>/window=<label>/manifest-<run_id>.csv`,
/// generalizing [`canonical_incremental_manifest_key`] to an arbitrary mode (§4.7
/// step 1, where the Launcher always resolves a window label regardless of mode).
#[must_use]
pub fn canonical_window_manifest_key(
    tier: CriticalityTier,
    mode: BackupMode,
    initiative: &str,
    source: &str,
    window_label: &WindowLabel,
    run_id: &RunId,
) -> String {
    format!(
        "manifests/criticality={tier}/backup_type={mode}/initiative={initiative}/bucket={source}/window={window_label}/manifest-{run_id}.csv"
    )
}

/// `manifests/criticality=<tier>/backup_type=<mode>/initiative=<i>/bucket=<source>/year=YYYY/month=MM/day=DD/hour=HH/` prefix,
/// under which sweep manifests are named `manifest-<run_id>.csv`.
#[must_use]
pub fn canonical_sweep_manifest_prefix(
    tier: CriticalityTier,
    mode: BackupMode,
    initiative: &str,
    source: &str,
    at: DateTime<Utc>,
) -> String {
    format!(
        "manifests/criticality={tier}/backup_type={mode}/initiative={initiative}/bucket={source}/year={year:04}/month={month:02}/day={day:02}/hour={hour:02}/",
        year = at.year(),
        month = at.month(),
        day = at.day(),
        hour = at.hour(),
    )
}

/// Prefix under which every canonical manifest for a `(tier, mode, source)` lives,
/// used by the Restore Resolver to find the latest one (§4.8 step 1).
#[must_use]
pub fn canonical_manifest_root(
    tier: CriticalityTier,
    mode: BackupMode,
    initiative: &str,
    source: &str,
) -> String {
    format!("manifests/criticality={tier}/backup_type={mode}/initiative={initiative}/bucket={source}/")
}

/// Data-root variant of the time-based prefix, used to locate the correct
/// `generation=<gen>` data for a restore.
pub enum DataRootTag<'a> {
    Window(&'a WindowLabel),
    Timestamp(&'a RunId),
}

/// `backup/criticality=<tier>/backup_type=<mode>/generation=<gen>/initiative=<i>/bucket=<source>/year=YYYY/month=MM/day=DD/hour=HH/`
/// root, before the trailing `(window=<…>|timestamp=<run_id>)/` segment.
#[must_use]
pub fn data_root_prefix(
    tier: CriticalityTier,
    mode: BackupMode,
    generation: BackupGeneration,
    initiative: &str,
    source: &str,
    at: DateTime<Utc>,
) -> String {
    format!(
        "backup/criticality={tier}/backup_type={mode}/generation={generation}/initiative={initiative}/bucket={source}/year={year:04}/month={month:02}/day={day:02}/hour={hour:02}/",
        year = at.year(),
        month = at.month(),
        day = at.day(),
        hour = at.hour(),
    )
}

/// Appends the trailing `window=<…>` or `timestamp=<run_id>` segment to a data root.
#[must_use]
pub fn data_prefix(root: &str, tag: DataRootTag<'_>) -> String {
    match tag {
        DataRootTag::Window(w) => format!("{root}window={w}/"),
        DataRootTag::Timestamp(r) => format!("{root}timestamp={r}/"),
    }
}

/// `reports/criticality=<tier>/backup_type=<mode>/generation=<gen>/initiative=<i>/bucket=<source>/(window=<…>|timestamp=<run_id>)/`
#[must_use]
pub fn reports_prefix(
    tier: CriticalityTier,
    mode: BackupMode,
    generation: BackupGeneration,
    initiative: &str,
    source: &str,
    tag: DataRootTag<'_>,
) -> String {
    let root = format!(
        "reports/criticality={tier}/backup_type={mode}/generation={generation}/initiative={initiative}/bucket={source}/"
    );
    data_prefix(&root, tag)
}

/// `checkpoints/<source>/<mode>.txt`
#[must_use]
pub fn sweep_checkpoint_key(source: &str, mode: BackupMode) -> String {
    format!("checkpoints/{source}/{mode}.txt")
}

/// `checkpoints/incremental/<source>/<tier>/<window>.marker`
#[must_use]
pub fn window_marker_key(source: &str, tier: CriticalityTier, window_label: &WindowLabel) -> String {
    format!("checkpoints/incremental/{source}/{tier}/{window_label}.marker")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn canonical_incremental_manifest_key_matches_grammar() {
        let window = WindowLabel::parse("20251020T1200Z").unwrap();
        let run_id = RunId::now(Utc.with_ymd_and_hms(2025, 10, 20, 12, 5, 30).unwrap());
        let key = canonical_incremental_manifest_key(
            CriticalityTier::Critical,
            "X",
            "b-1",
            &window,
            &run_id,
        );
        assert_eq!(
            key,
            "manifests/criticality=Critical/backup_type=incremental/initiative=X/bucket=b-1/window=20251020T1200Z/manifest-20251020-120530.csv"
        );
    }

    #[test]
    fn window_marker_key_matches_grammar() {
        let window = WindowLabel::parse("20251020T1200Z").unwrap();
        let key = window_marker_key("b-1", CriticalityTier::Critical, &window);
        assert_eq!(key, "checkpoints/incremental/b-1/Critical/20251020T1200Z.marker");
    }

    #[test]
    fn sweep_checkpoint_key_matches_grammar() {
        assert_eq!(sweep_checkpoint_key("b-1", BackupMode::Full), "checkpoints/b-1/full.txt");
    }
}
