//! Single-account passthrough `CredentialProvider` used when no cross-account
//! broker is configured: every account key resolves to the same ambient
//! `aws-config` session (§1, §9 — the real broker is a deployment concern).

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3control::Client as S3ControlClient;
use backup_core::credentials::{AccountSession, CredentialProvider};
use backup_core::error::BackupError;
use backup_core::object_store::s3::{S3BatchJobClient, S3ObjectStore};

pub struct AmbientCredentialProvider {
    config: aws_config::SdkConfig,
    known_account: Option<String>,
}

impl AmbientCredentialProvider {
    pub async fn from_env(known_account: Option<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self { config, known_account }
    }
}

#[async_trait]
impl CredentialProvider for AmbientCredentialProvider {
    async fn resolve(&self, account_key: &str) -> Result<AccountSession, BackupError> {
        let object_store = Arc::new(S3ObjectStore::new(S3Client::new(&self.config)));
        let batch_job_client = Arc::new(S3BatchJobClient::new(S3ControlClient::new(&self.config), account_key));
        Ok(AccountSession {
            account_id: account_key.to_string(),
            object_store: object_store.clone(),
            bucket_admin: object_store,
            batch_job_client,
        })
    }

    async fn list_accounts(&self) -> Result<Vec<String>, BackupError> {
        Ok(self.known_account.iter().cloned().collect())
    }
}
