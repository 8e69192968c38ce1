//! Lists the accounts the configured credential provider knows about.

use anyhow::Result;
use clap::Args;

use crate::credentials::AmbientCredentialProvider;
use crate::output::{create_table, print_info};
use backup_core::credentials::CredentialProvider;

#[derive(Args)]
pub struct ListAccountsArgs {}

pub async fn run(_args: ListAccountsArgs) -> Result<()> {
    let provider = AmbientCredentialProvider::from_env(std::env::var("ACCOUNT_ID").ok()).await;
    let accounts = provider.list_accounts().await?;

    if accounts.is_empty() {
        print_info("No accounts configured; the ambient credential provider resolves any account key against the current AWS session.");
        return Ok(());
    }

    let mut table = create_table();
    table.set_header(vec!["Account"]);
    for account in accounts {
        table.add_row(vec![account]);
    }
    println!("{table}");
    Ok(())
}
