//! The resource-tagging API surface the Discovery Reconciler's tag-scan and the
//! Tag/Criticality Resolver (§4.3, §4.4) depend on.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::StoreError;
use crate::model::SourceContainer;

/// Reduced resource-tagging surface: list containers matching a tag filter, and
/// read one container's full tag set.
#[async_trait]
pub trait TaggingClient: Send + Sync {
    /// Lists every container whose tags satisfy `BackupEnabled = true` (§4.4 step 1).
    async fn list_backup_enabled_containers(&self) -> Result<Vec<SourceContainer>, StoreError>;

    /// Reads the full tag set for one container (used by the Criticality Resolver
    /// when a cached entry is absent, §4.3).
    async fn get_tags(&self, container: &str) -> Result<HashMap<String, String>, StoreError>;
}
