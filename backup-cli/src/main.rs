//! Unified backup-engine CLI: manual triggers and inspection around the
//! automated sweep/launch/restore pipeline.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod credentials;
mod output;

use commands::{list_accounts, report_summary, trigger_backup, trigger_restore};

/// backup-engine - multi-account, tag-driven S3 backup CLI
#[derive(Parser)]
#[command(name = "backup-engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manual triggers and inspection for the S3 backup engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List accounts the configured credential provider knows about
    ListAccounts(list_accounts::ListAccountsArgs),

    /// Plan and launch a backup sweep for one account/tier/mode
    TriggerBackup(trigger_backup::TriggerBackupArgs),

    /// Resolve and run (or dry-run) a restore for one source bucket
    TriggerRestore(trigger_restore::TriggerRestoreArgs),

    /// Summarize the most recent S3 Batch Operations report
    ReportSummary(report_summary::ReportSummaryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::ListAccounts(args) => list_accounts::run(args).await,
        Commands::TriggerBackup(args) => trigger_backup::run(args).await,
        Commands::TriggerRestore(args) => trigger_restore::run(args).await,
        Commands::ReportSummary(args) => report_summary::run(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_known_subcommands() {
        let cli = Cli::try_parse_from(["backup-engine", "list-accounts"]).expect("parse list-accounts");
        assert!(matches!(cli.command, Commands::ListAccounts(_)));

        let cli = Cli::try_parse_from([
            "backup-engine",
            "trigger-backup",
            "--account",
            "b-1",
            "--criticality",
            "Critical",
            "--backup-type",
            "incremental",
        ])
        .expect("parse trigger-backup");
        assert!(matches!(cli.command, Commands::TriggerBackup(_)));
    }

    #[test]
    fn clap_enforces_required_args() {
        assert!(Cli::try_parse_from(["backup-engine", "trigger-backup"]).is_err());
        assert!(Cli::try_parse_from(["backup-engine", "report-summary"]).is_err());
    }
}
