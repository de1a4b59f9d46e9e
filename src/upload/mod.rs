//! Upload module
//!
//! Admission-controlled uploads of local files to object storage.
//!
//! - [`request`]: form fields to a validated `(file, bucket, key)` triple
//! - [`multipart`]: chunked transfer policy shared with the storage backend
//! - [`orchestrator`]: validate, admit, transfer under a deadline, release
//!
//! The storage backend is reached only through [`StorageClient`], so the
//! orchestrator never inspects SDK error types.

use crate::admission::AdmissionError;
use std::time::Duration;
use thiserror::Error;

pub mod multipart;
pub mod orchestrator;
pub mod request;

pub use multipart::{TransferPlan, TransferPolicy};
pub use orchestrator::UploadOrchestrator;
pub use request::{ObjectLocation, UploadRequest, ValidatedUpload, ValidationError};

/// Failure reported by a storage backend, already classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The destination bucket does not exist
    #[error("bucket {0:?} does not exist")]
    NoSuchBucket(String),

    /// The payload exceeds a single-operation or part-count limit
    #[error("entity too large: {0}")]
    EntityTooLarge(String),

    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Classification used in logs, metrics and responses
    pub fn kind(&self) -> StorageErrorKind {
        match self {
            StorageError::NoSuchBucket(_) => StorageErrorKind::NoSuchBucket,
            StorageError::EntityTooLarge(_) => StorageErrorKind::TooLarge,
            StorageError::Other(_) => StorageErrorKind::Other,
        }
    }

    /// Detail carried with the classification
    pub fn detail(&self) -> &str {
        match self {
            StorageError::NoSuchBucket(detail)
            | StorageError::EntityTooLarge(detail)
            | StorageError::Other(detail) => detail,
        }
    }
}

/// Storage failure classes seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
    /// The local file could not be opened
    Open,
    NoSuchBucket,
    TooLarge,
    Other,
}

impl StorageErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageErrorKind::Open => "open",
            StorageErrorKind::NoSuchBucket => "no_such_bucket",
            StorageErrorKind::TooLarge => "too_large",
            StorageErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for StorageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload errors
///
/// One variant per non-success outcome of [`UploadOrchestrator::orchestrate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("upload did not finish within {0:?}")]
    UploadTimeout(Duration),

    #[error("{}", storage_message(.kind, .detail))]
    Storage {
        kind: StorageErrorKind,
        detail: String,
    },
}

impl UploadError {
    /// Build a storage error from a classified backend failure
    pub fn storage(err: StorageError) -> Self {
        UploadError::Storage {
            kind: err.kind(),
            detail: err.detail().to_string(),
        }
    }

    /// Label used for the `outcome` metric dimension
    pub fn outcome(&self) -> &'static str {
        match self {
            UploadError::Validation(_) => "validation_failure",
            UploadError::Admission(AdmissionError::Timeout(_)) => "admission_timeout",
            UploadError::Admission(AdmissionError::Closed) => "admission_closed",
            UploadError::UploadTimeout(_) => "upload_timeout",
            UploadError::Storage { kind, .. } => match kind {
                StorageErrorKind::Open => "storage_open",
                StorageErrorKind::NoSuchBucket => "storage_no_such_bucket",
                StorageErrorKind::TooLarge => "storage_too_large",
                StorageErrorKind::Other => "storage_other",
            },
        }
    }
}

fn storage_message(kind: &StorageErrorKind, detail: &str) -> String {
    match kind {
        StorageErrorKind::Open => format!("unable to open file, {detail}"),
        StorageErrorKind::NoSuchBucket => format!("bucket {detail:?} does not exist"),
        StorageErrorKind::TooLarge => format!("file is too large to upload, {detail}"),
        StorageErrorKind::Other => format!("upload failed, {detail}"),
    }
}

/// Object storage capability used by the orchestrator.
///
/// Implementations own chunking, part concurrency and retries. The call may be
/// dropped at any await point when the upload deadline passes and must not
/// leave anything behind that the caller has to clean up.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait StorageClient: Send + Sync {
    /// Stream `body` to `bucket/key`
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: tokio::fs::File,
    ) -> Result<(), StorageError>;
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub bucket: String,
    pub key: String,
    /// Destination URI exactly as submitted
    pub uri: String,
    pub bytes: u64,
    pub elapsed: Duration,
}
