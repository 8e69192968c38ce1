//! Tag/Criticality Resolver (§4.3) and Discovery Reconciler (§4.4).

use std::collections::HashMap;
use std::sync::Arc;

use backup_core::config::Config;
use backup_core::credentials::CredentialProvider;
use backup_core::error::{BackupError, StoreError};
use backup_core::model::{CriticalityTier, SourceContainer};
use backup_core::object_store::BucketAdmin;
use backup_core::path::enumeration_prefix;
use backup_core::retry::{retry_with_backoff, RetryConfig};
use backup_core::tagging::TaggingClient;
use tokio::sync::Mutex;
use tracing::{info, warn};

const NOTIFICATION_ID: &str = "BckIncrementalTrigger-SQS";
const ENUMERATION_DESTINATION_PREFIX: &str = "inventory-source";

/// Resolves `BackupCriticality` per source container, memoized for the process
/// lifetime (§4.3). No cross-process cache.
pub struct CriticalityResolver {
    tagging: Arc<dyn TaggingClient>,
    cache: Mutex<HashMap<String, CriticalityTier>>,
}

impl CriticalityResolver {
    #[must_use]
    pub fn new(tagging: Arc<dyn TaggingClient>) -> Self {
        Self {
            tagging,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached tier, or reads the container's tags and caches the result.
    /// "No tags" and a missing tag both resolve to `LessCritical`; other faults propagate.
    pub async fn resolve(&self, source: &str) -> Result<CriticalityTier, StoreError> {
        if let Some(tier) = self.cache.lock().await.get(source).copied() {
            return Ok(tier);
        }
        let tags = self.tagging.get_tags(source).await?;
        let tier = CriticalityTier::from_tag_value(tags.get("BackupCriticality").map(String::as_str));
        self.cache.lock().await.insert(source.to_string(), tier);
        Ok(tier)
    }

    /// Seeds the cache directly from a result that already carries the tier, avoiding
    /// a redundant `get_tags` round-trip (§4.4 step 2 uses this after the tag-scan).
    pub async fn seed(&self, source: &str, tier: CriticalityTier) {
        self.cache.lock().await.insert(source.to_string(), tier);
    }
}

/// One source container's successful reconciliation.
#[derive(Debug, Clone)]
pub struct SourceReconciliation {
    pub source: String,
    pub tier: CriticalityTier,
    pub enumeration_prefix: String,
    pub central_container: String,
}

/// §4.4 output: successes plus per-source errors. A per-source failure never
/// aborts the run.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub sources: Vec<SourceReconciliation>,
    pub errors: Vec<(String, String)>,
}

pub struct DiscoveryReconciler {
    tagging: Arc<dyn TaggingClient>,
    resolver: Arc<CriticalityResolver>,
    credentials: Arc<dyn CredentialProvider>,
    config: Arc<Config>,
}

impl DiscoveryReconciler {
    #[must_use]
    pub fn new(
        tagging: Arc<dyn TaggingClient>,
        resolver: Arc<CriticalityResolver>,
        credentials: Arc<dyn CredentialProvider>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            tagging,
            resolver,
            credentials,
            config,
        }
    }

    /// Runs the full tag-scan-and-converge pass (§4.4 steps 1-4).
    pub async fn reconcile(&self, central_container: &str, event_queue_arn: &str) -> ReconcileOutcome {
        let containers = match self.tagging.list_backup_enabled_containers().await {
            Ok(containers) => containers,
            Err(err) => {
                warn!(%err, "tag-scan failed, reconciliation produced no sources");
                return ReconcileOutcome {
                    sources: Vec::new(),
                    errors: vec![(String::new(), err.to_string())],
                };
            }
        };

        let mut outcome = ReconcileOutcome::default();
        for container in containers {
            match self.reconcile_one(&container, central_container, event_queue_arn).await {
                Ok(result) => {
                    info!(source = %result.source, tier = %result.tier, "reconciled source container");
                    outcome.sources.push(result);
                }
                Err(err) => {
                    warn!(source = %container.name, %err, "reconciling source container failed");
                    outcome.errors.push((container.name.clone(), err.to_string()));
                }
            }
        }
        outcome
    }

    async fn reconcile_one(
        &self,
        container: &SourceContainer,
        central_container: &str,
        event_queue_arn: &str,
    ) -> Result<SourceReconciliation, BackupError> {
        self.resolver.seed(&container.name, container.criticality_tier).await;
        let tier = container.criticality_tier;

        let session = self.credentials.resolve(&container.account_id).await?;

        session
            .bucket_admin
            .ensure_enumeration_configuration(
                &container.name,
                central_container,
                ENUMERATION_DESTINATION_PREFIX,
                self.config.enumeration_frequency(tier),
            )
            .await?;

        if self.config.notifications_required(tier) {
            let admin = session.bucket_admin.clone();
            let name = container.name.clone();
            retry_with_backoff(
                &RetryConfig::notification_conflict(),
                StoreError::is_transient,
                || {
                    let admin = admin.clone();
                    let name = name.clone();
                    async move { admin.ensure_notification(&name, NOTIFICATION_ID, event_queue_arn).await }
                },
            )
            .await?;
        } else {
            let admin = session.bucket_admin.clone();
            let name = container.name.clone();
            retry_with_backoff(
                &RetryConfig::notification_conflict(),
                StoreError::is_transient,
                || {
                    let admin = admin.clone();
                    let name = name.clone();
                    async move { admin.remove_notification(&name, NOTIFICATION_ID).await }
                },
            )
            .await?;
        }

        Ok(SourceReconciliation {
            source: container.name.clone(),
            tier,
            enumeration_prefix: enumeration_prefix(&container.name),
            central_container: central_container.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use backup_core::credentials::AccountSession;
    use backup_core::object_store::test_support::InMemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixtureTagging {
        containers: Vec<SourceContainer>,
        tags: HashMap<String, HashMap<String, String>>,
    }

    #[async_trait]
    impl TaggingClient for FixtureTagging {
        async fn list_backup_enabled_containers(&self) -> Result<Vec<SourceContainer>, StoreError> {
            Ok(self.containers.clone())
        }

        async fn get_tags(&self, container: &str) -> Result<HashMap<String, String>, StoreError> {
            Ok(self.tags.get(container).cloned().unwrap_or_default())
        }
    }

    struct SingleAccountCredentials {
        store: Arc<InMemoryStore>,
    }

    #[async_trait]
    impl CredentialProvider for SingleAccountCredentials {
        async fn resolve(&self, account_key: &str) -> Result<AccountSession, BackupError> {
            Ok(AccountSession {
                account_id: account_key.to_string(),
                object_store: self.store.clone(),
                bucket_admin: self.store.clone(),
                batch_job_client: self.store.clone(),
            })
        }

        async fn list_accounts(&self) -> Result<Vec<String>, BackupError> {
            Ok(vec!["111111111111".to_string()])
        }
    }

    fn container(name: &str, tier: CriticalityTier) -> SourceContainer {
        SourceContainer {
            name: name.to_string(),
            account_id: "111111111111".to_string(),
            criticality_tier: tier,
            tags: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn resolver_defaults_missing_tag_to_less_critical() {
        let tagging = Arc::new(FixtureTagging {
            containers: Vec::new(),
            tags: HashMap::new(),
        });
        let resolver = CriticalityResolver::new(tagging);
        assert_eq!(resolver.resolve("b-1").await.unwrap(), CriticalityTier::LessCritical);
    }

    #[tokio::test]
    async fn resolver_memoizes_after_first_read() {
        static CALLS: AtomicU32 = AtomicU32::new(0);

        struct CountingTagging;
        #[async_trait]
        impl TaggingClient for CountingTagging {
            async fn list_backup_enabled_containers(&self) -> Result<Vec<SourceContainer>, StoreError> {
                Ok(Vec::new())
            }
            async fn get_tags(&self, _container: &str) -> Result<HashMap<String, String>, StoreError> {
                CALLS.fetch_add(1, Ordering::SeqCst);
                let mut tags = HashMap::new();
                tags.insert("BackupCriticality".to_string(), "Critical".to_string());
                Ok(tags)
            }
        }

        let resolver = CriticalityResolver::new(Arc::new(CountingTagging));
        assert_eq!(resolver.resolve("b-1").await.unwrap(), CriticalityTier::Critical);
        assert_eq!(resolver.resolve("b-1").await.unwrap(), CriticalityTier::Critical);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reconcile_converges_enumeration_and_notification_for_critical_tier() {
        let store = Arc::new(InMemoryStore::new());
        let tagging = Arc::new(FixtureTagging {
            containers: vec![container("b-1", CriticalityTier::Critical)],
            tags: HashMap::new(),
        });
        let resolver = Arc::new(CriticalityResolver::new(tagging.clone()));
        let credentials = Arc::new(SingleAccountCredentials { store: store.clone() });
        std::env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        let config = Arc::new(Config::from_env().unwrap());
        std::env::remove_var("CENTRAL_BACKUP_BUCKET");

        let reconciler = DiscoveryReconciler::new(tagging, resolver, credentials, config);
        let outcome = reconciler.reconcile("central", "arn:aws:sqs:::queue").await;

        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.sources.len(), 1);
        assert_eq!(outcome.sources[0].enumeration_prefix, "inventory-source/b-1/");
        assert!(store.has_notification("b-1", NOTIFICATION_ID));
    }

    #[tokio::test]
    async fn reconcile_removes_notification_for_non_critical_tier() {
        let store = Arc::new(InMemoryStore::new());
        let tagging = Arc::new(FixtureTagging {
            containers: vec![container("b-2", CriticalityTier::NonCritical)],
            tags: HashMap::new(),
        });
        let resolver = Arc::new(CriticalityResolver::new(tagging.clone()));
        let credentials = Arc::new(SingleAccountCredentials { store: store.clone() });
        std::env::set_var("CENTRAL_BACKUP_BUCKET", "central");
        let config = Arc::new(Config::from_env().unwrap());
        std::env::remove_var("CENTRAL_BACKUP_BUCKET");

        let reconciler = DiscoveryReconciler::new(tagging, resolver, credentials, config);
        let outcome = reconciler.reconcile("central", "arn:aws:sqs:::queue").await;

        assert!(outcome.errors.is_empty());
        assert!(!store.has_notification("b-2", NOTIFICATION_ID));
    }
}
