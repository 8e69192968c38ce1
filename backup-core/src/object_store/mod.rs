//! The object-store client SDK surface the core actually calls (§1 names the SDK
//! itself as an external collaborator; this trait is the seam).

pub mod s3;
pub mod test_support;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// Metadata returned by `head_object` / `list_objects`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub etag: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Directive for `copy_object`: whether to copy or replace the source's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataDirective {
    Copy,
    Replace,
}

/// A completed part of a multipart upload.
#[derive(Debug, Clone)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// The reduced object-store surface the engine's components depend on: single-object
/// get/put/head/delete/copy, pagination, and multipart upload (Manifest Writer, §4.2).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<bytes::Bytes, StoreError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: &[(&str, &str)],
    ) -> Result<String, StoreError>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StoreError>;

    /// Lists objects with the given prefix, most-recently-used stores should paginate
    /// internally and return the full set (callers only need the aggregate).
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        metadata_directive: MetadataDirective,
    ) -> Result<String, StoreError>;

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &[(&str, &str)],
    ) -> Result<String, StoreError>;

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String, StoreError>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<String, StoreError>;

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError>;
}

/// Bucket-level administration the Discovery Reconciler needs (§4.4): idempotent
/// enumeration-source configuration and event-notification configuration.
#[async_trait]
pub trait BucketAdmin: Send + Sync {
    async fn ensure_enumeration_configuration(
        &self,
        bucket: &str,
        destination_bucket: &str,
        destination_prefix: &str,
        frequency: EnumerationFrequency,
    ) -> Result<(), StoreError>;

    async fn ensure_notification(
        &self,
        bucket: &str,
        notification_id: &str,
        queue_arn: &str,
    ) -> Result<(), StoreError>;

    async fn remove_notification(&self, bucket: &str, notification_id: &str) -> Result<(), StoreError>;
}

/// Enumeration (inventory) report frequency, chosen per tier (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationFrequency {
    Daily,
    Weekly,
}

/// The batch-copy job creation surface (§4.7): at-most-once creation per client token.
#[async_trait]
pub trait BatchJobClient: Send + Sync {
    async fn create_job(&self, request: &crate::model::BatchCopyRequest) -> Result<String, StoreError>;
}
