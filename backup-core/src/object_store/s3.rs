//! Real implementation of [`ObjectStore`], [`BucketAdmin`], [`BatchJobClient`] and
//! [`TaggingClient`] on top of `aws-sdk-s3` / `aws-sdk-s3control`, grounded on the
//! multipart-upload and error-mapping style used for checkpoint persistence
//! elsewhere in this workspace.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    InventoryConfiguration, InventoryDestination, InventoryFormat, InventoryS3BucketDestination,
    InventorySchedule, InventoryScheduleFrequency, NotificationConfiguration, QueueConfiguration,
    ServerSideEncryption,
};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3control::Client as S3ControlClient;
use tracing::{debug, error, warn};

use super::{BatchJobClient, BucketAdmin, CompletedPart, EnumerationFrequency, MetadataDirective, ObjectMeta, ObjectStore};
use crate::error::StoreError;
use crate::model::{BatchCopyRequest, CriticalityTier, SourceContainer};
use crate::tagging::TaggingClient;

fn is_not_found(err: &aws_sdk_s3::Error) -> bool {
    err.to_string().contains("NoSuchKey") || err.to_string().contains("NotFound")
}

fn map_store_error(context: &str, err: impl std::fmt::Display) -> StoreError {
    let message = err.to_string();
    if message.contains("Conflict") || message.contains("409") {
        StoreError::Conflict(format!("{context}: {message}"))
    } else if message.contains("Throttl") || message.contains("SlowDown") || message.contains("503") {
        StoreError::Throttled(format!("{context}: {message}"))
    } else {
        StoreError::Operation(format!("{context}: {message}"))
    }
}

/// `ObjectStore` backed by a real (or LocalStack-pointed) S3 client.
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    #[must_use]
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }

    /// Builds a client from the ambient AWS configuration (`aws_config::load_from_env`).
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(S3Client::new(&config))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<bytes::Bytes, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e.into()) {
                    StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    map_store_error("get_object", "request failed")
                }
            })?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| map_store_error("get_object body", e))?;
        Ok(bytes.into_bytes())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: &[(&str, &str)],
    ) -> Result<String, StoreError> {
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .body(ByteStream::from(body));
        for (k, v) in metadata {
            request = request.metadata(*k, *v);
        }
        let output = request
            .send()
            .await
            .map_err(|e| map_store_error("put_object", e))?;
        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Operation("put_object returned no ETag".to_string()))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if is_not_found(&e.into()) {
                    StoreError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    map_store_error("head_object", "request failed")
                }
            })?;
        Ok(ObjectMeta {
            key: key.to_string(),
            etag: output.e_tag().unwrap_or_default().to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified: output
                .last_modified()
                .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), 0))
                .unwrap_or_else(chrono::Utc::now),
        })
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let mut items = Vec::new();
        let mut continuation_token = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }
            let output = request
                .send()
                .await
                .map_err(|e| map_store_error("list_objects_v2", e))?;
            for object in output.contents() {
                let Some(key) = object.key() else { continue };
                items.push(ObjectMeta {
                    key: key.to_string(),
                    etag: object.e_tag().unwrap_or_default().to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                    last_modified: object
                        .last_modified()
                        .and_then(|t| chrono::DateTime::from_timestamp(t.secs(), 0))
                        .unwrap_or_else(chrono::Utc::now),
                });
            }
            if output.is_truncated().unwrap_or(false) {
                continuation_token = output.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }
        Ok(items)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_store_error("delete_object", e))?;
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        metadata_directive: MetadataDirective,
    ) -> Result<String, StoreError> {
        let source = format!("{src_bucket}/{src_key}");
        let directive = match metadata_directive {
            MetadataDirective::Copy => aws_sdk_s3::types::MetadataDirective::Copy,
            MetadataDirective::Replace => aws_sdk_s3::types::MetadataDirective::Replace,
        };
        let output = self
            .client
            .copy_object()
            .bucket(dst_bucket)
            .key(dst_key)
            .copy_source(source)
            .metadata_directive(directive)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .send()
            .await
            .map_err(|e| map_store_error("copy_object", e))?;
        output
            .copy_object_result()
            .and_then(|r| r.e_tag())
            .map(str::to_string)
            .ok_or_else(|| StoreError::Operation("copy_object returned no ETag".to_string()))
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &[(&str, &str)],
    ) -> Result<String, StoreError> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .server_side_encryption(ServerSideEncryption::Aes256)
            .content_type("text/csv");
        for (k, v) in metadata {
            request = request.metadata(*k, *v);
        }
        let output = request
            .send()
            .await
            .map_err(|e| {
                error!("failed to initiate multipart upload: {e}");
                map_store_error("create_multipart_upload", e)
            })?;
        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Operation("no upload id returned".to_string()))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String, StoreError> {
        debug!(bucket, key, part_number, bytes = body.len(), "uploading part");
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_store_error("upload_part", e))?;
        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Operation(format!("part {part_number} returned no ETag")))
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<String, StoreError> {
        let completed_parts: Vec<_> = parts
            .into_iter()
            .map(|p| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.etag)
                    .build()
            })
            .collect();
        let completed = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();
        let output = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| map_store_error("complete_multipart_upload", e))?;
        output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Operation("complete_multipart_upload returned no ETag".to_string()))
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| map_store_error("abort_multipart_upload", e))?;
        Ok(())
    }
}

#[async_trait]
impl BucketAdmin for S3ObjectStore {
    async fn ensure_enumeration_configuration(
        &self,
        bucket: &str,
        destination_bucket: &str,
        destination_prefix: &str,
        frequency: EnumerationFrequency,
    ) -> Result<(), StoreError> {
        let id = "backup-engine-inventory";
        let schedule_frequency = match frequency {
            EnumerationFrequency::Daily => InventoryScheduleFrequency::Daily,
            EnumerationFrequency::Weekly => InventoryScheduleFrequency::Weekly,
        };

        if let Ok(existing) = self
            .client
            .get_bucket_inventory_configuration()
            .bucket(bucket)
            .id(id)
            .send()
            .await
        {
            let current_frequency = existing
                .inventory_configuration()
                .and_then(|c| c.schedule())
                .map(InventorySchedule::frequency);
            if current_frequency == Some(&schedule_frequency) {
                debug!(bucket, "enumeration configuration already converged");
                return Ok(());
            }
        }

        let destination = InventoryDestination::builder()
            .s3_bucket_destination(
                InventoryS3BucketDestination::builder()
                    .bucket(format!("arn:aws:s3:::{destination_bucket}"))
                    .prefix(destination_prefix)
                    .format(InventoryFormat::Csv)
                    .build()
                    .map_err(|e| StoreError::Operation(e.to_string()))?,
            )
            .build();

        let configuration = InventoryConfiguration::builder()
            .id(id)
            .is_enabled(true)
            .included_object_versions(aws_sdk_s3::types::InventoryIncludedObjectVersions::Current)
            .destination(destination)
            .schedule(InventorySchedule::builder().frequency(schedule_frequency).build().map_err(|e| StoreError::Operation(e.to_string()))?)
            .build()
            .map_err(|e| StoreError::Operation(e.to_string()))?;

        self.client
            .put_bucket_inventory_configuration()
            .bucket(bucket)
            .id(id)
            .inventory_configuration(configuration)
            .send()
            .await
            .map_err(|e| map_store_error("put_bucket_inventory_configuration", e))?;
        Ok(())
    }

    async fn ensure_notification(
        &self,
        bucket: &str,
        notification_id: &str,
        queue_arn: &str,
    ) -> Result<(), StoreError> {
        let existing = self
            .client
            .get_bucket_notification_configuration()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| map_store_error("get_bucket_notification_configuration", e))?;

        let mut queue_configs: Vec<QueueConfiguration> = existing
            .queue_configurations()
            .iter()
            .filter(|q| q.id() != Some(notification_id))
            .cloned()
            .collect();

        queue_configs.push(
            QueueConfiguration::builder()
                .id(notification_id)
                .queue_arn(queue_arn)
                .events(aws_sdk_s3::types::Event::S3ObjectCreated)
                .build()
                .map_err(|e| StoreError::Operation(e.to_string()))?,
        );

        let configuration = NotificationConfiguration::builder()
            .set_queue_configurations(Some(queue_configs))
            .set_topic_configurations(Some(existing.topic_configurations().to_vec()))
            .set_lambda_function_configurations(Some(existing.lambda_function_configurations().to_vec()))
            .build();

        self.client
            .put_bucket_notification_configuration()
            .bucket(bucket)
            .notification_configuration(configuration)
            .send()
            .await
            .map_err(|e| map_store_error("put_bucket_notification_configuration", e))?;
        Ok(())
    }

    async fn remove_notification(&self, bucket: &str, notification_id: &str) -> Result<(), StoreError> {
        let existing = self
            .client
            .get_bucket_notification_configuration()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| map_store_error("get_bucket_notification_configuration", e))?;

        let queue_configs: Vec<QueueConfiguration> = existing
            .queue_configurations()
            .iter()
            .filter(|q| q.id() != Some(notification_id))
            .cloned()
            .collect();

        if queue_configs.len() == existing.queue_configurations().len() {
            return Ok(());
        }

        let configuration = NotificationConfiguration::builder()
            .set_queue_configurations(Some(queue_configs))
            .set_topic_configurations(Some(existing.topic_configurations().to_vec()))
            .set_lambda_function_configurations(Some(existing.lambda_function_configurations().to_vec()))
            .build();

        self.client
            .put_bucket_notification_configuration()
            .bucket(bucket)
            .notification_configuration(configuration)
            .send()
            .await
            .map_err(|e| map_store_error("put_bucket_notification_configuration", e))?;
        Ok(())
    }
}

/// `BatchJobClient` backed by S3 Batch Operations (`aws-sdk-s3control`).
pub struct S3BatchJobClient {
    client: S3ControlClient,
    account_id: String,
}

impl S3BatchJobClient {
    #[must_use]
    pub fn new(client: S3ControlClient, account_id: impl Into<String>) -> Self {
        Self {
            client,
            account_id: account_id.into(),
        }
    }

    pub async fn from_env(account_id: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(S3ControlClient::new(&config), account_id)
    }
}

#[async_trait]
impl BatchJobClient for S3BatchJobClient {
    async fn create_job(&self, request: &BatchCopyRequest) -> Result<String, StoreError> {
        use aws_sdk_s3control::types::{
            JobManifest, JobManifestFieldName, JobManifestFormat, JobManifestLocation,
            JobManifestSpec, JobOperation, JobReport, JobReportFormat, JobReportScope,
            S3CopyObjectOperation,
        };

        let manifest_location = JobManifestLocation::builder()
            .object_arn(format!("arn:aws:s3:::{}/{}", request.manifest_bucket, request.manifest_key))
            .e_tag(&request.manifest_etag)
            .build()
            .map_err(|e| StoreError::Operation(e.to_string()))?;

        let manifest = JobManifest::builder()
            .spec(
                JobManifestSpec::builder()
                    .format(JobManifestFormat::S3BatchOperationsCsv20180820)
                    .set_fields(Some(vec![JobManifestFieldName::Bucket, JobManifestFieldName::Key]))
                    .build(),
            )
            .location(manifest_location)
            .build()
            .map_err(|e| StoreError::Operation(e.to_string()))?;

        let report = JobReport::builder()
            .bucket(format!("arn:aws:s3:::{}", request.manifest_bucket))
            .format(JobReportFormat::ReportCsv20180820)
            .prefix(&request.reports_prefix)
            .report_scope(JobReportScope::AllTasks)
            .enabled(true)
            .build();

        let operation = JobOperation::builder()
            .s3_put_object_copy(
                S3CopyObjectOperation::builder()
                    .target_resource(format!("arn:aws:s3:::{}", request.target_bucket))
                    .set_target_key_prefix(Some(request.target_key_prefix.clone()))
                    .build(),
            )
            .build();

        let output = self
            .client
            .create_job()
            .account_id(&self.account_id)
            .manifest(manifest)
            .operation(operation)
            .report(report)
            .priority(10)
            .role_arn(&request.role_arn)
            .client_request_token(&request.client_token)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("IdempotencyException") {
                    warn!("batch job creation idempotency hit, treating as success");
                }
                map_store_error("create_job", e)
            })?;

        output
            .job_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Operation("create_job returned no job id".to_string()))
    }
}

/// `TaggingClient` backed by S3's own bucket-tagging API. Uses `list_buckets` +
/// `get_bucket_tagging` rather than the separate Resource Groups Tagging API, since a
/// single-account deployment has no need for that API's cross-service reach.
pub struct S3TaggingClient {
    client: S3Client,
    account_id: String,
}

impl S3TaggingClient {
    #[must_use]
    pub fn new(client: S3Client, account_id: impl Into<String>) -> Self {
        Self {
            client,
            account_id: account_id.into(),
        }
    }

    pub async fn from_env(account_id: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(S3Client::new(&config), account_id)
    }
}

#[async_trait]
impl TaggingClient for S3TaggingClient {
    async fn list_backup_enabled_containers(&self) -> Result<Vec<SourceContainer>, StoreError> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| map_store_error("list_buckets", e))?;

        let mut containers = Vec::new();
        for bucket in output.buckets() {
            let Some(name) = bucket.name() else { continue };
            let tags = match self.get_tags(name).await {
                Ok(tags) => tags,
                Err(err) => {
                    warn!(bucket = name, %err, "failed to read bucket tags during discovery scan, skipping");
                    continue;
                }
            };
            let enabled = tags.get("BackupEnabled").is_some_and(|v| v.eq_ignore_ascii_case("true"));
            if !enabled {
                continue;
            }
            let criticality_tier = CriticalityTier::from_tag_value(tags.get("BackupCriticality").map(String::as_str));
            containers.push(SourceContainer {
                name: name.to_string(),
                account_id: self.account_id.clone(),
                criticality_tier,
                tags,
            });
        }
        Ok(containers)
    }

    async fn get_tags(&self, container: &str) -> Result<HashMap<String, String>, StoreError> {
        match self.client.get_bucket_tagging().bucket(container).send().await {
            Ok(output) => Ok(output
                .tag_set()
                .iter()
                .map(|tag| (tag.key().to_string(), tag.value().to_string()))
                .collect()),
            Err(e) => {
                let err: aws_sdk_s3::Error = e.into();
                if err.to_string().contains("NoSuchTagSet") {
                    Ok(HashMap::new())
                } else {
                    Err(map_store_error("get_bucket_tagging", err))
                }
            }
        }
    }
}
