//! Upload orchestrator
//!
//! Runs one upload request end to end: validate, acquire an admission ticket,
//! open the file and hand it to the storage client under the upload deadline,
//! then release the ticket. The ticket is owned by the call, so it goes back
//! to the pool on every exit path, including when the caller drops the future.

use super::{
    StorageClient, StorageErrorKind, UploadError, UploadReceipt, UploadRequest, ValidatedUpload,
};
use crate::admission::AdmissionController;
use crate::config::TransferConfig;
use crate::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Admission-controlled upload pipeline
///
/// Cheap to share behind an `Arc`; the only mutable state is the admission
/// pool.
pub struct UploadOrchestrator {
    storage: Arc<dyn StorageClient>,
    admission: AdmissionController,
    admission_timeout: Duration,
    upload_timeout: Duration,
}

impl UploadOrchestrator {
    /// Create an orchestrator with a fresh admission pool of
    /// `config.max_parallel_uploads` tickets.
    pub fn new(storage: Arc<dyn StorageClient>, config: &TransferConfig) -> Self {
        Self {
            storage,
            admission: AdmissionController::new(config.max_parallel_uploads),
            admission_timeout: config.admission_timeout,
            upload_timeout: config.upload_timeout,
        }
    }

    /// The admission pool gating this orchestrator
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn upload_timeout(&self) -> Duration {
        self.upload_timeout
    }

    pub fn admission_timeout(&self) -> Duration {
        self.admission_timeout
    }

    /// Upload the file named by `request` to its destination.
    ///
    /// # Returns
    ///
    /// * `Ok(UploadReceipt)` - The object was written
    /// * `Err(UploadError::Validation)` - Rejected before admission
    /// * `Err(UploadError::Admission)` - No ticket within the admission budget
    /// * `Err(UploadError::UploadTimeout)` - Transfer cancelled at the deadline
    /// * `Err(UploadError::Storage)` - File could not be opened or storage failed
    #[tracing::instrument(
        name = "upload.orchestrate",
        skip(self, request),
        fields(
            s3.bucket = tracing::field::Empty,
            s3.key = tracing::field::Empty,
            upload.bytes = tracing::field::Empty,
            upload.outcome = tracing::field::Empty
        )
    )]
    pub async fn orchestrate(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
        let started = Instant::now();
        let result = self.run(request, started).await;
        let elapsed = started.elapsed();

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        metrics::record_upload(outcome, elapsed.as_secs_f64());

        let span = tracing::Span::current();
        span.record("upload.outcome", outcome);

        match &result {
            Ok(receipt) => {
                span.record("upload.bytes", receipt.bytes);
                tracing::info!(
                    bucket = %receipt.bucket,
                    key = %receipt.key,
                    bytes = receipt.bytes,
                    duration_ms = elapsed.as_millis() as u64,
                    "Upload completed"
                );
            }
            Err(UploadError::Validation(e)) => {
                tracing::debug!(reason = e.reason(), error = %e, "Upload request rejected");
            }
            Err(e) => {
                tracing::warn!(
                    outcome = outcome,
                    error = %e,
                    duration_ms = elapsed.as_millis() as u64,
                    "Upload failed"
                );
            }
        }

        result
    }

    async fn run(
        &self,
        request: &UploadRequest,
        started: Instant,
    ) -> Result<UploadReceipt, UploadError> {
        let upload = request.validate()?;

        let span = tracing::Span::current();
        span.record("s3.bucket", upload.location.bucket.as_str());
        span.record("s3.key", upload.location.key.as_str());

        let ticket = self.admission.acquire(self.admission_timeout).await?;
        let transfer = match ticket.acquired_at().checked_add(self.upload_timeout) {
            Some(deadline) => tokio::time::timeout_at(deadline, self.transfer(&upload)).await,
            None => Ok(self.transfer(&upload).await),
        };
        ticket.release();

        let bytes = match transfer {
            Ok(result) => result?,
            Err(_) => return Err(UploadError::UploadTimeout(self.upload_timeout)),
        };

        Ok(UploadReceipt {
            bucket: upload.location.bucket,
            key: upload.location.key,
            uri: upload.uri,
            bytes,
            elapsed: started.elapsed(),
        })
    }

    async fn transfer(&self, upload: &ValidatedUpload) -> Result<u64, UploadError> {
        let open_error = |e: std::io::Error| UploadError::Storage {
            kind: StorageErrorKind::Open,
            detail: format!("{:?}: {}", upload.file, e),
        };

        let file = tokio::fs::File::open(&upload.file)
            .await
            .map_err(open_error)?;
        let bytes = file.metadata().await.map_err(open_error)?.len();

        self.storage
            .put_object(&upload.location.bucket, &upload.location.key, file)
            .await
            .map_err(UploadError::storage)?;

        metrics::record_upload_bytes(bytes);
        Ok(bytes)
    }
}
