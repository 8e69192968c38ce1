//! Invokes the Sweep Planner followed by the Batch-Copy Launcher for one
//! `(account, tier, mode)`.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;

use backup_checkpoint::CheckpointStore;
use backup_core::config::Config;
use backup_core::credentials::CredentialProvider;
use backup_core::model::{BackupGeneration, BackupMode, CriticalityTier};
use backup_core::path;
use backup_launcher::{BatchCopyLauncher, LaunchRequest};
use backup_manifest::ManifestWriter;
use backup_sweep::{SweepPlanner, SweepRequest, SweepResult};

use crate::credentials::AmbientCredentialProvider;
use crate::output::{print_info, print_success};

#[derive(Args)]
pub struct TriggerBackupArgs {
    /// Account key the credential provider resolves (also the source bucket name).
    #[arg(long)]
    account: String,

    #[arg(long)]
    criticality: String,

    #[arg(long = "backup-type")]
    backup_type: String,

    #[arg(long, default_value = "son")]
    generation: String,
}

fn parse_tier(raw: &str) -> Result<CriticalityTier> {
    match raw {
        "Critical" => Ok(CriticalityTier::Critical),
        "LessCritical" => Ok(CriticalityTier::LessCritical),
        "NonCritical" => Ok(CriticalityTier::NonCritical),
        other => bail!("unknown criticality tier: {other} (expected Critical, LessCritical, NonCritical)"),
    }
}

pub async fn run(args: TriggerBackupArgs) -> Result<()> {
    let tier = parse_tier(&args.criticality)?;
    let mode = BackupMode::from_str(&args.backup_type).map_err(|e| anyhow::anyhow!(e))?;
    let generation = BackupGeneration::from_str(&args.generation).map_err(|e| anyhow::anyhow!(e))?;

    let config = Arc::new(Config::from_env()?);
    let provider = AmbientCredentialProvider::from_env(None).await;
    let session = provider.resolve(&args.account).await?;

    let checkpoint = Arc::new(CheckpointStore::new(session.object_store.clone(), config.central_backup_bucket.clone()));
    let manifest_writer = Arc::new(ManifestWriter::new(session.object_store.clone()));
    let planner = SweepPlanner::new(
        session.object_store.clone(),
        session.object_store.clone(),
        checkpoint,
        manifest_writer,
        config.clone(),
    );

    let sweep_request = SweepRequest {
        source: args.account.clone(),
        central_container: config.central_backup_bucket.clone(),
        mode,
        tier,
        enumeration_prefix: path::enumeration_prefix(&args.account),
    };

    match planner.plan_sweep(&sweep_request).await? {
        SweepResult::Empty => {
            print_info(&format!("no changes to back up for {}", args.account));
        }
        SweepResult::Completed { bucket, key, effective_mode, object_count, .. } => {
            print_info(&format!("manifest written: {bucket}/{key} ({object_count} objects, mode={effective_mode})"));

            let launcher = BatchCopyLauncher::new(
                session.object_store.clone(),
                session.batch_job_client.clone(),
                config.clone(),
                config.central_backup_bucket.clone(),
            );
            let launch_request = LaunchRequest {
                manifest_bucket: bucket,
                manifest_key: key,
                source: args.account.clone(),
                mode: effective_mode,
                generation,
                tier,
                window_label: None,
            };
            let result = launcher.launch(&launch_request).await?;
            print_success(&format!("batch-copy job {} submitted for {}", result.job_id, args.account));
        }
    }

    Ok(())
}
