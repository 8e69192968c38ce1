//! The event-queue message envelope consumed by the Incremental Window Aggregator
//! (§4.5). Receiving/acknowledging messages is the runtime's job; the core only
//! needs the decoded shape of a batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One object-created record inside a queue message's envelope.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ObjectCreatedRecord {
    pub source_container: String,
    /// URL-decoded key, as it must appear in the manifest (§6).
    pub key: String,
    pub event_time: DateTime<Utc>,
}

/// One message pulled off the event queue: an opaque id for acknowledgement plus
/// zero or more decoded records.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
}

/// Decodes a provider-native event envelope into its `object-created` records.
///
/// A decoding failure is not fatal to the batch: the caller marks only this
/// message id as failed and continues (§7).
pub fn decode_envelope(body: &str) -> Result<Vec<ObjectCreatedRecord>, serde_json::Error> {
    #[derive(Deserialize)]
    struct RawEnvelope {
        #[serde(rename = "Records", default)]
        records: Vec<RawRecord>,
    }

    #[derive(Deserialize)]
    struct RawRecord {
        #[serde(rename = "s3")]
        s3: RawS3Entity,
        #[serde(rename = "eventTime")]
        event_time: DateTime<Utc>,
    }

    #[derive(Deserialize)]
    struct RawS3Entity {
        bucket: RawBucket,
        object: RawObject,
    }

    #[derive(Deserialize)]
    struct RawBucket {
        name: String,
    }

    #[derive(Deserialize)]
    struct RawObject {
        key: String,
    }

    let envelope: RawEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .records
        .into_iter()
        .map(|r| ObjectCreatedRecord {
            source_container: r.s3.bucket.name,
            key: urlencoding::decode(&r.s3.object.key)
                .map(|s| s.into_owned())
                .unwrap_or(r.s3.object.key),
            event_time: r.event_time,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_single_record_envelope() {
        let body = r#"{"Records":[{"eventTime":"2025-10-20T13:15:00Z","s3":{"bucket":{"name":"b-1"},"object":{"key":"logs/a.txt"}}}]}"#;
        let records = decode_envelope(body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_container, "b-1");
        assert_eq!(records[0].key, "logs/a.txt");
    }

    #[test]
    fn url_decodes_keys() {
        let body = r#"{"Records":[{"eventTime":"2025-10-20T13:15:00Z","s3":{"bucket":{"name":"b-1"},"object":{"key":"path%20with%20space.txt"}}}]}"#;
        let records = decode_envelope(body).unwrap();
        assert_eq!(records[0].key, "path with space.txt");
    }

    #[test]
    fn malformed_envelope_fails_to_decode() {
        assert!(decode_envelope("not json").is_err());
    }
}
