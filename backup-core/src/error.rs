//! Shared error types for the backup engine crates.

use thiserror::Error;

/// Errors raised while loading or validating environment configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors raised while building or parsing central-container key paths.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PathError {
    #[error("key does not match the expected grammar: {0}")]
    Malformed(String),

    #[error("missing path segment: {0}")]
    MissingSegment(&'static str),
}

/// Errors surfaced by the object-store abstraction (`ObjectStore`, `BucketAdmin`, `BatchJobClient`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("store operation failed: {0}")]
    Operation(String),

    #[error("conflict on write: {0}")]
    Conflict(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("integrity tag mismatch: {0}")]
    IntegrityMismatch(String),
}

impl StoreError {
    /// Transient infrastructure faults (§7): throttling, conflicts, and other conditions
    /// worth retrying with backoff before giving up.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Throttled(_))
    }

    /// Whether the store reported an ETag mismatch on a dependent resource (§4.2, §4.7).
    #[must_use]
    pub fn is_integrity_mismatch(&self) -> bool {
        matches!(self, StoreError::IntegrityMismatch(_))
    }
}

/// The umbrella error type returned by the engine's components.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("fatal: {0}")]
    Fatal(String),
}
