//! The cross-account credential broker (§1 external collaborator). The core only
//! needs to resolve, for a given logical account key, an object store + batch-job
//! client pair scoped to that account's session.

use async_trait::async_trait;

use crate::object_store::{BatchJobClient, BucketAdmin, ObjectStore};

/// One account's resolved clients, as handed back by a `CredentialProvider`.
pub struct AccountSession {
    pub account_id: String,
    pub object_store: std::sync::Arc<dyn ObjectStore>,
    pub bucket_admin: std::sync::Arc<dyn BucketAdmin>,
    pub batch_job_client: std::sync::Arc<dyn BatchJobClient>,
}

/// Resolves a logical account key (an alias, not necessarily the raw account id)
/// to a session of clients already carrying that account's assumed-role credentials.
///
/// A real cross-account broker is expected to be supplied by the deployment; see
/// `backup_cli::credentials::AmbientCredentialProvider` for the single-account
/// passthrough used when no broker is configured.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(&self, account_key: &str) -> Result<AccountSession, crate::error::BackupError>;

    /// Lists the account keys this provider knows how to resolve.
    async fn list_accounts(&self) -> Result<Vec<String>, crate::error::BackupError>;
}
