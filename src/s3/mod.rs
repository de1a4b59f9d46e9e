//! S3 Client module
//!
//! [`StorageClient`] implementation on top of the AWS SDK, addressing buckets
//! path-style against a configured endpoint.
//!
//! # Features
//!
//! - **Chunked Transfers**: payloads larger than one part go out as a
//!   multipart upload with a bounded number of parts in flight
//! - **Cancellation Safety**: an unfinished multipart upload is aborted in the
//!   background when the transfer fails or is dropped
//! - **Error Classification**: `NoSuchBucket` and `EntityTooLarge` are
//!   recognised by error code
//!
//! # Tracing
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | PutObject | `s3.put_object` | bucket, key, bytes |
//! | CreateMultipartUpload | `s3.create_multipart_upload` | bucket, key, upload_id |
//! | UploadPart | `s3.upload_part` | upload_id, part_number, bytes |
//! | CompleteMultipartUpload | `s3.complete_multipart_upload` | upload_id, parts_count |

pub mod pool;

use crate::config::StorageConfig;
use crate::metrics;
use crate::upload::multipart::read_part;
use crate::upload::{StorageClient, StorageError, TransferPlan, TransferPolicy};
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use futures::stream::{self, TryStreamExt};
use pool::{PoolConfig, PoolError, ReqwestHttpClient};
use thiserror::Error;
use tracing::Instrument;

/// Errors building the storage client
#[derive(Error, Debug)]
pub enum StorageSetupError {
    #[error("Connection pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Startup check failed: {0}")]
    StartupCheck(String),
}

/// S3-backed storage client
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Client,
    policy: TransferPolicy,
}

impl S3Storage {
    /// Wrap an already configured SDK client
    pub fn new(client: Client, policy: TransferPolicy) -> Self {
        Self { client, policy }
    }

    /// Build a client for `config.endpoint_url`.
    ///
    /// Credentials and region come from the standard AWS chain. The region
    /// falls back to `us-east-1` when nothing else provides one.
    pub async fn connect(
        config: &StorageConfig,
        policy: TransferPolicy,
    ) -> Result<Self, StorageSetupError> {
        let http_client = ReqwestHttpClient::new(&PoolConfig::from(config))?;

        let region = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new("us-east-1"));

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .http_client(http_client)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .endpoint_url(&config.endpoint_url)
            .force_path_style(true)
            .build();

        tracing::info!(
            endpoint = %config.endpoint_url,
            region = ?shared.region(),
            part_size = policy.part_size(),
            max_concurrent_parts = policy.max_concurrent_parts(),
            "S3 client configured"
        );

        Ok(Self::new(Client::from_conf(s3_config), policy))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    /// List bucket names visible to the configured credentials
    #[tracing::instrument(name = "s3.list_buckets", skip(self), err)]
    pub async fn list_buckets(&self) -> Result<Vec<String>, StorageSetupError> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| StorageSetupError::StartupCheck(DisplayErrorContext(&e).to_string()))?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(str::to_string))
            .collect())
    }

    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, body),
        fields(s3.bucket = %bucket, s3.key = %key, upload.bytes = size),
        err
    )]
    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        mut body: tokio::fs::File,
        size: u64,
    ) -> Result<(), StorageError> {
        // Buffered so the SDK can replay the body on retry
        let body = read_part(&mut body, size)
            .await
            .map_err(|e| StorageError::Other(format!("reading file: {e}")))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, bucket))?;

        Ok(())
    }

    #[tracing::instrument(
        name = "s3.multipart_upload",
        skip(self, body, plan),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            upload.bytes = plan.size(),
            parts_count = plan.part_count()
        ),
        err
    )]
    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        body: tokio::fs::File,
        plan: TransferPlan,
    ) -> Result<(), StorageError> {
        let (upload_id, guard) = self.begin_multipart_upload(bucket, key).await?;

        let reads = stream::try_unfold((body, 1usize), move |(mut file, number)| async move {
            if number > plan.part_count() {
                return Ok::<_, std::io::Error>(None);
            }
            let part = read_part(&mut file, plan.part_length(number)).await?;
            Ok(Some(((number, part), (file, number + 1))))
        });

        // At most `max_concurrent_parts` part buffers are alive at once
        let mut parts: Vec<CompletedPart> = reads
            .map_err(|e| StorageError::Other(format!("reading file: {e}")))
            .map_ok(|(number, part)| self.upload_part(bucket, key, &upload_id, number as i32, part))
            .try_buffer_unordered(self.policy.max_concurrent_parts())
            .try_collect()
            .await?;

        parts.sort_by_key(|part| part.part_number());
        self.complete_multipart_upload(bucket, key, &upload_id, parts)
            .await?;

        guard.disarm();
        metrics::record_multipart_upload(plan.part_count());
        Ok(())
    }

    /// Start a multipart upload and arm its abort guard.
    ///
    /// CreateMultipartUpload runs on a detached task that arms the guard as
    /// soon as the upload id is known. If this future is dropped first, the
    /// guard is dropped with the undelivered result and the upload is aborted.
    async fn begin_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<(String, AbortGuard), StorageError> {
        let client = self.client.clone();
        let bucket = bucket.to_string();
        let key = key.to_string();
        let (tx, rx) = tokio::sync::oneshot::channel();

        tokio::spawn(
            async move {
                let result = create_multipart_upload(&client, &bucket, &key)
                    .await
                    .map(|upload_id| {
                        let guard = AbortGuard::new(client.clone(), &bucket, &key, &upload_id);
                        (upload_id, guard)
                    });
                let _ = tx.send(result);
            }
            .in_current_span(),
        );

        rx.await.map_err(|_| {
            StorageError::Other("CreateMultipartUpload task ended without a result".into())
        })?
    }

    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, bucket, key, body),
        fields(s3.upload_id = %upload_id, s3.part_number = part_number, upload.bytes = body.len()),
        err
    )]
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, StorageError> {
        let result = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await;

        metrics::record_part_upload(result.is_ok());
        let output = result.map_err(|e| classify_sdk_error(e, bucket))?;

        Ok(CompletedPart::builder()
            .set_e_tag(output.e_tag().map(str::to_string))
            .part_number(part_number)
            .build())
    }

    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, bucket, key, parts),
        fields(s3.upload_id = %upload_id, parts_count = parts.len()),
        err
    )]
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StorageError> {
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, bucket))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageClient for S3Storage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: tokio::fs::File,
    ) -> Result<(), StorageError> {
        let size = body
            .metadata()
            .await
            .map_err(|e| StorageError::Other(format!("reading file metadata: {e}")))?
            .len();

        let plan = self
            .policy
            .plan(size)
            .map_err(|e| StorageError::EntityTooLarge(e.to_string()))?;

        match plan {
            TransferPlan::Single { size } => self.put_single(bucket, key, body, size).await,
            TransferPlan::Multipart { .. } => self.put_multipart(bucket, key, body, plan).await,
        }
    }
}

#[tracing::instrument(
    name = "s3.create_multipart_upload",
    skip(client),
    fields(s3.bucket = %bucket, s3.key = %key, s3.upload_id = tracing::field::Empty),
    err
)]
async fn create_multipart_upload(
    client: &Client,
    bucket: &str,
    key: &str,
) -> Result<String, StorageError> {
    let output = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| classify_sdk_error(e, bucket))?;

    let upload_id = output
        .upload_id()
        .ok_or_else(|| StorageError::Other("CreateMultipartUpload returned no upload id".into()))?
        .to_string();

    tracing::Span::current().record("s3.upload_id", upload_id.as_str());
    Ok(upload_id)
}

/// Map an SDK failure to a storage error by its error code
pub fn classify_sdk_error<E, R>(err: SdkError<E, R>, bucket: &str) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match err.code() {
        Some("NoSuchBucket") => StorageError::NoSuchBucket(bucket.to_string()),
        Some("EntityTooLarge") => StorageError::EntityTooLarge(
            err.message().unwrap_or("entity too large").to_string(),
        ),
        _ => StorageError::Other(DisplayErrorContext(&err).to_string()),
    }
}

/// Aborts a multipart upload unless disarmed.
///
/// Dropping the transfer future at the upload deadline drops this guard, so the
/// abort runs as a detached task on the current runtime.
struct AbortGuard {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl AbortGuard {
    fn new(client: Client, bucket: &str, key: &str, upload_id: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    upload_id = %self.upload_id,
                    "No runtime available, multipart upload left incomplete"
                );
                return;
            }
        };

        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);

        handle.spawn(async move {
            let result = client
                .abort_multipart_upload()
                .bucket(&bucket)
                .key(&key)
                .upload_id(&upload_id)
                .send()
                .await;

            match result {
                Ok(_) => tracing::info!(upload_id = %upload_id, "Aborted multipart upload"),
                Err(e) => tracing::warn!(
                    upload_id = %upload_id,
                    error = %DisplayErrorContext(&e),
                    "Failed to abort multipart upload"
                ),
            }
        });
    }
}
