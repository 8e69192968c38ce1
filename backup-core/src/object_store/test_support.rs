//! In-memory fakes used by unit tests across the workspace, grounded on the
//! `with_client` testing seam the teacher's checkpointer exposes for `LocalStack`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{BatchJobClient, BucketAdmin, CompletedPart, EnumerationFrequency, MetadataDirective, ObjectMeta, ObjectStore};
use crate::error::StoreError;
use crate::model::BatchCopyRequest;

#[derive(Default)]
struct Bucket {
    objects: HashMap<String, (Vec<u8>, String, Vec<(String, String)>)>,
    multipart: HashMap<String, Vec<(i32, Vec<u8>)>>,
}

/// An in-process object store fake: enough fidelity to exercise every component's
/// logic (multipart assembly, listing, copy, head) without any network I/O.
#[derive(Default)]
pub struct InMemoryStore {
    buckets: Mutex<HashMap<String, Bucket>>,
    notifications: Mutex<HashMap<String, Vec<String>>>,
    enumeration_frequency: Mutex<HashMap<String, EnumerationFrequency>>,
    jobs: Mutex<HashMap<String, String>>,
    next_job_seq: Mutex<u64>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn etag_for(body: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(body))
    }

    /// Seeds an object directly, bypassing upload semantics, for test fixtures.
    pub fn seed(&self, bucket: &str, key: &str, body: Vec<u8>) {
        let etag = Self::etag_for(&body);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let entry = buckets.entry(bucket.to_string()).or_default();
        entry.objects.insert(key.to_string(), (body, etag, Vec::new()));
    }

    /// Test assertion helper: whether a key exists.
    #[must_use]
    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.get(bucket).map(|b| b.objects.contains_key(key)).unwrap_or(false)
    }

    /// Number of batch-copy jobs created so far, keyed by client token.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Test assertion helper: whether a notification entry is present on a bucket.
    #[must_use]
    pub fn has_notification(&self, bucket: &str, notification_id: &str) -> bool {
        self.notifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(bucket)
            .map(|ids| ids.iter().any(|id| id == notification_id))
            .unwrap_or(false)
    }

    /// Test assertion helper: the last converged enumeration frequency for a bucket.
    #[must_use]
    pub fn enumeration_frequency_for(&self, bucket: &str) -> Option<EnumerationFrequency> {
        self.enumeration_frequency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(bucket)
            .copied()
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<bytes::Bytes, StoreError> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|(body, _, _)| bytes::Bytes::from(body.clone()))
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        metadata: &[(&str, &str)],
    ) -> Result<String, StoreError> {
        let etag = Self::etag_for(&body);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let entry = buckets.entry(bucket.to_string()).or_default();
        let meta = metadata.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        entry.objects.insert(key.to_string(), (body, etag.clone(), meta));
        Ok(etag)
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StoreError> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|(body, etag, _)| ObjectMeta {
                key: key.to_string(),
                etag: etag.clone(),
                size: body.len() as u64,
                last_modified: Utc::now(),
            })
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>, StoreError> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let mut items: Vec<ObjectMeta> = buckets
            .get(bucket)
            .map(|b| {
                b.objects
                    .iter()
                    .filter(|(key, _)| key.starts_with(prefix))
                    .map(|(key, (body, etag, _))| ObjectMeta {
                        key: key.clone(),
                        etag: etag.clone(),
                        size: body.len() as u64,
                        last_modified: Utc::now(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(items)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(b) = buckets.get_mut(bucket) {
            b.objects.remove(key);
        }
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
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let (body, old_meta) = buckets
            .get(src_bucket)
            .and_then(|b| b.objects.get(src_key))
            .map(|(body, _, meta)| (body.clone(), meta.clone()))
            .ok_or_else(|| StoreError::NotFound {
                bucket: src_bucket.to_string(),
                key: src_key.to_string(),
            })?;
        let etag = Self::etag_for(&body);
        let meta = match metadata_directive {
            MetadataDirective::Copy => old_meta,
            MetadataDirective::Replace => Vec::new(),
        };
        let entry = buckets.entry(dst_bucket.to_string()).or_default();
        entry.objects.insert(dst_key.to_string(), (body, etag.clone(), meta));
        Ok(etag)
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        _metadata: &[(&str, &str)],
    ) -> Result<String, StoreError> {
        let upload_id = format!("upload-{bucket}-{key}-{}", uuid::Uuid::new_v4());
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let entry = buckets.entry(bucket.to_string()).or_default();
        entry.multipart.insert(upload_id.clone(), Vec::new());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String, StoreError> {
        let etag = Self::etag_for(&body);
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let entry = buckets.entry(bucket.to_string()).or_default();
        let parts = entry
            .multipart
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::Operation(format!("unknown upload id: {upload_id}")))?;
        parts.push((part_number, body));
        Ok(etag)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<String, StoreError> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let entry = buckets.entry(bucket.to_string()).or_default();
        let mut staged = entry
            .multipart
            .remove(upload_id)
            .ok_or_else(|| StoreError::Operation(format!("unknown upload id: {upload_id}")))?;
        staged.sort_by_key(|(n, _)| *n);
        let mut assembled = Vec::new();
        for part in &parts {
            let (_, body) = staged
                .iter()
                .find(|(n, _)| *n == part.part_number)
                .ok_or_else(|| StoreError::Operation(format!("missing part {}", part.part_number)))?;
            assembled.extend_from_slice(body);
        }
        let etag = Self::etag_for(&assembled);
        entry.objects.insert(key.to_string(), (assembled, etag.clone(), Vec::new()));
        Ok(etag)
    }

    async fn abort_multipart_upload(&self, bucket: &str, _key: &str, upload_id: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(b) = buckets.get_mut(bucket) {
            b.multipart.remove(upload_id);
        }
        Ok(())
    }
}

#[async_trait]
impl BucketAdmin for InMemoryStore {
    async fn ensure_enumeration_configuration(
        &self,
        bucket: &str,
        _destination_bucket: &str,
        _destination_prefix: &str,
        frequency: EnumerationFrequency,
    ) -> Result<(), StoreError> {
        self.enumeration_frequency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(bucket.to_string(), frequency);
        Ok(())
    }

    async fn ensure_notification(&self, bucket: &str, notification_id: &str, _queue_arn: &str) -> Result<(), StoreError> {
        let mut notifications = self.notifications.lock().unwrap_or_else(|e| e.into_inner());
        let entry = notifications.entry(bucket.to_string()).or_default();
        if !entry.iter().any(|id| id == notification_id) {
            entry.push(notification_id.to_string());
        }
        Ok(())
    }

    async fn remove_notification(&self, bucket: &str, notification_id: &str) -> Result<(), StoreError> {
        let mut notifications = self.notifications.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = notifications.get_mut(bucket) {
            entry.retain(|id| id != notification_id);
        }
        Ok(())
    }
}

#[async_trait]
impl BatchJobClient for InMemoryStore {
    async fn create_job(&self, request: &BatchCopyRequest) -> Result<String, StoreError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = jobs.get(&request.client_token) {
            return Ok(existing.clone());
        }
        let mut seq = self.next_job_seq.lock().unwrap_or_else(|e| e.into_inner());
        *seq += 1;
        let job_id = format!("job-{seq}");
        jobs.insert(request.client_token.clone(), job_id.clone());
        Ok(job_id)
    }
}
