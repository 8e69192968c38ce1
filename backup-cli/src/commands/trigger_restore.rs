//! Invokes the Restore Resolver for one source bucket.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;

use backup_core::config::Config;
use backup_core::credentials::CredentialProvider;
use backup_core::model::{BackupGeneration, BackupMode, CriticalityTier};
use backup_restore::{RestoreRequest, RestoreResolver};

use crate::credentials::AmbientCredentialProvider;
use crate::output::{print_info, print_success};

#[derive(Args)]
pub struct TriggerRestoreArgs {
    #[arg(long)]
    account: String,

    #[arg(long = "source-bucket")]
    source_bucket: String,

    #[arg(long)]
    criticality: String,

    #[arg(long = "backup-type")]
    backup_type: String,

    #[arg(long)]
    generation: String,

    #[arg(long, default_value = "")]
    prefix: String,

    #[arg(long = "dry-run")]
    dry_run: bool,

    #[arg(long = "max-objects", default_value_t = 0)]
    max_objects: u64,
}

fn parse_tier(raw: &str) -> Result<CriticalityTier> {
    match raw {
        "Critical" => Ok(CriticalityTier::Critical),
        "LessCritical" => Ok(CriticalityTier::LessCritical),
        "NonCritical" => Ok(CriticalityTier::NonCritical),
        other => bail!("unknown criticality tier: {other} (expected Critical, LessCritical, NonCritical)"),
    }
}

pub async fn run(args: TriggerRestoreArgs) -> Result<()> {
    let tier = parse_tier(&args.criticality)?;
    let mode = BackupMode::from_str(&args.backup_type).map_err(|e| anyhow::anyhow!(e))?;
    let generation = BackupGeneration::from_str(&args.generation).map_err(|e| anyhow::anyhow!(e))?;

    let config = Arc::new(Config::from_env()?);
    let provider = AmbientCredentialProvider::from_env(None).await;
    let session = provider.resolve(&args.account).await?;

    let resolver = RestoreResolver::new(session.object_store.clone(), session.object_store.clone(), config);

    let request = RestoreRequest {
        source: args.source_bucket.clone(),
        tier,
        mode,
        generation,
        at: None,
        prefix_filter: args.prefix.clone(),
        max_objects: args.max_objects,
        dry_run: args.dry_run,
    };

    let outcome = resolver.restore(&request).await?;
    print_info(&format!("manifest: {}", outcome.manifest_key));
    print_info(&format!("data prefix: {}", outcome.data_prefix));

    if args.dry_run {
        print_success(&format!(
            "dry run: {} object(s) would be restored, {} skipped",
            outcome.restored, outcome.skipped
        ));
    } else if outcome.errors == 0 {
        print_success(&format!("{} object(s) restored, {} skipped", outcome.restored, outcome.skipped));
    } else {
        bail!("{} object(s) restored, {} skipped, {} failed", outcome.restored, outcome.skipped, outcome.errors);
    }

    Ok(())
}
