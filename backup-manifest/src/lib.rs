//! Manifest Writer (§4.2): streams a two-column CSV into the central container via
//! chunked/multipart upload and returns the store's integrity tag for the exact
//! bytes uploaded.

use std::sync::Arc;
use std::time::Duration;

use backup_core::error::StoreError;
use backup_core::model::{ManifestLocation, ManifestRow};
use backup_core::object_store::{CompletedPart, ObjectStore};
use tracing::{debug, error, warn};

/// AWS's minimum multipart part size is 5 MiB; the spec requires a 6 MiB floor (§4.2).
const MIN_PART_SIZE: usize = 6 * 1024 * 1024;

/// Bounded retries for the post-upload integrity-tag re-query (§4.2).
const TAG_VERIFY_RETRIES: u32 = 3;
const TAG_VERIFY_DELAY: Duration = Duration::from_millis(200);

pub struct ManifestWriter {
    store: Arc<dyn ObjectStore>,
}

/// Outcome of writing a manifest: either a finalized location, or `Empty` when the
/// row source produced nothing (§4.2, §4.6 step 5).
#[derive(Debug)]
pub enum WriteOutcome {
    Written(ManifestLocation),
    Empty,
}

impl ManifestWriter {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Streams `rows` as CSV into `bucket/key`, using multipart upload once the
    /// buffered bytes cross the part-size floor. Aborts the pending multipart upload
    /// on an empty result or on any error before propagating it.
    pub async fn write_manifest(
        &self,
        bucket: &str,
        key: &str,
        rows: impl IntoIterator<Item = ManifestRow>,
        metadata: &[(&str, &str)],
    ) -> Result<WriteOutcome, StoreError> {
        let mut session = MultipartSession::new(self.store.clone(), bucket.to_string(), key.to_string());
        let mut row_count: u64 = 0;
        let mut buffer = Vec::new();

        let result: Result<(), StoreError> = async {
            for row in rows {
                write_csv_row(&mut buffer, &row)?;
                row_count += 1;
                if buffer.len() >= MIN_PART_SIZE {
                    session.upload_chunk(std::mem::take(&mut buffer), metadata).await?;
                }
            }
            Ok(())
        }
        .await;

        if let Err(err) = result {
            error!(bucket, key, %err, "manifest write failed, aborting pending upload");
            session.abort().await;
            return Err(err);
        }

        if row_count == 0 {
            debug!(bucket, key, "manifest produced zero rows, aborting");
            session.abort().await;
            return Ok(WriteOutcome::Empty);
        }

        let etag = match session.finalize(buffer, metadata).await {
            Ok(etag) => etag,
            Err(err) => {
                error!(bucket, key, %err, "manifest finalize failed, aborting pending upload");
                session.abort().await;
                return Err(err);
            }
        };

        let verified_etag = self.verify_tag(bucket, key, etag).await?;

        Ok(WriteOutcome::Written(ManifestLocation {
            bucket: bucket.to_string(),
            key: key.to_string(),
            integrity_tag: verified_etag,
            row_count,
        }))
    }

    /// Re-queries the object's metadata and compares tags; retries up to
    /// `TAG_VERIFY_RETRIES` times with a bounded delay before surfacing a fatal
    /// condition (§4.2 consistency contract).
    async fn verify_tag(&self, bucket: &str, key: &str, uploaded_tag: String) -> Result<String, StoreError> {
        let mut last_seen = uploaded_tag.clone();
        for attempt in 0..TAG_VERIFY_RETRIES {
            let meta = self.store.head_object(bucket, key).await?;
            if meta.etag == uploaded_tag {
                return Ok(meta.etag);
            }
            warn!(bucket, key, attempt, "integrity tag mismatch on re-query, retrying");
            last_seen = meta.etag;
            tokio::time::sleep(TAG_VERIFY_DELAY).await;
        }
        if last_seen == uploaded_tag {
            Ok(uploaded_tag)
        } else {
            Err(StoreError::IntegrityMismatch(format!(
                "{bucket}/{key}: uploaded={uploaded_tag} last_seen={last_seen}"
            )))
        }
    }
}

fn write_csv_row(buffer: &mut Vec<u8>, row: &ManifestRow) -> Result<(), StoreError> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(buffer);
    writer
        .write_record([row.source_container.as_str(), row.key.as_str()])
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    writer.flush().map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(())
}

/// Tracks whether a multipart upload has been initiated, so callers can abort
/// cleanly regardless of how much was written before a failure.
struct MultipartSession {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    key: String,
    upload_id: Option<String>,
    parts: Vec<CompletedPart>,
    next_part_number: i32,
}

impl MultipartSession {
    fn new(store: Arc<dyn ObjectStore>, bucket: String, key: String) -> Self {
        Self {
            store,
            bucket,
            key,
            upload_id: None,
            parts: Vec::new(),
            next_part_number: 1,
        }
    }

    async fn upload_chunk(&mut self, chunk: Vec<u8>, metadata: &[(&str, &str)]) -> Result<(), StoreError> {
        if self.upload_id.is_none() {
            let id = self
                .store
                .create_multipart_upload(&self.bucket, &self.key, metadata)
                .await?;
            self.upload_id = Some(id);
        }
        let upload_id = self.upload_id.as_ref().expect("set above");
        let part_number = self.next_part_number;
        self.next_part_number += 1;
        let etag = self
            .store
            .upload_part(&self.bucket, &self.key, upload_id, part_number, chunk)
            .await?;
        self.parts.push(CompletedPart { part_number, etag });
        Ok(())
    }

    /// Completes the upload: if multipart was never started, falls back to a single
    /// `put_object` with the remaining buffered bytes.
    async fn finalize(&mut self, remainder: Vec<u8>, metadata: &[(&str, &str)]) -> Result<String, StoreError> {
        match self.upload_id.take() {
            None => self.store.put_object(&self.bucket, &self.key, remainder, metadata).await,
            Some(upload_id) => {
                if !remainder.is_empty() {
                    let part_number = self.next_part_number;
                    let etag = self
                        .store
                        .upload_part(&self.bucket, &self.key, &upload_id, part_number, remainder)
                        .await?;
                    self.parts.push(CompletedPart { part_number, etag });
                }
                let parts = std::mem::take(&mut self.parts);
                self.store
                    .complete_multipart_upload(&self.bucket, &self.key, &upload_id, parts)
                    .await
            }
        }
    }

    async fn abort(&mut self) {
        if let Some(upload_id) = self.upload_id.take() {
            if let Err(err) = self
                .store
                .abort_multipart_upload(&self.bucket, &self.key, &upload_id)
                .await
            {
                warn!(bucket = %self.bucket, key = %self.key, %err, "failed to abort multipart upload");
            }
        }
    }
}
