//! Common Test Infrastructure
//!
//! Provides shared utilities for integration tests:
//! - A stub storage backend that records calls and tracks concurrency
//! - Test server management
//! - Payload files

#![allow(dead_code)]

use s3nd::config::{ServerConfig, TransferConfig};
use s3nd::server::Server;
use s3nd::upload::{StorageClient, StorageError, UploadOrchestrator};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Storage stub
///
/// Sleeps for `delay` inside every call, then returns `result`. Tracks how
/// many calls are running at once.
pub struct StubStorage {
    delay: Duration,
    result: Result<(), StorageError>,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<(String, String)>>,
}

impl StubStorage {
    pub fn ok() -> Self {
        Self::new(Duration::ZERO, Ok(()))
    }

    pub fn slow(delay: Duration) -> Self {
        Self::new(delay, Ok(()))
    }

    pub fn failing(err: StorageError) -> Self {
        Self::new(Duration::ZERO, Err(err))
    }

    fn new(delay: Duration, result: Result<(), StorageError>) -> Self {
        Self {
            delay,
            result,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Calls currently inside `put_object`
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// `(bucket, key)` of every call, in arrival order
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

/// Decrements the active count even when the call is cancelled
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StorageClient for StubStorage {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        _body: tokio::fs::File,
    ) -> Result<(), StorageError> {
        self.calls
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

/// Transfer settings with the knobs the tests care about
pub fn transfer_config(
    max_parallel_uploads: usize,
    admission_timeout: Duration,
    upload_timeout: Duration,
) -> TransferConfig {
    TransferConfig {
        max_parallel_uploads,
        admission_timeout,
        upload_timeout,
        ..TransferConfig::default()
    }
}

/// A temporary file holding `len` bytes
pub fn payload_file(len: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(&vec![b'x'; len])
        .expect("Failed to write temp file");
    file.flush().expect("Failed to flush temp file");
    file
}

/// Absolute path of a temp file as a form value
pub fn path_of(file: &tempfile::NamedTempFile) -> String {
    file.path().to_str().expect("Non UTF-8 temp path").to_string()
}

/// Test server running on an ephemeral port
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    pub orchestrator: Arc<UploadOrchestrator>,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a server backed by `storage`
    pub async fn start(storage: Arc<dyn StorageClient>, transfer: TransferConfig) -> Self {
        let orchestrator = Arc::new(UploadOrchestrator::new(storage, &transfer));
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };

        let server = Server::bind(&config, Arc::clone(&orchestrator))
            .await
            .expect("Failed to bind server");
        let addr = server.local_addr();

        let handle = tokio::spawn(async move {
            let _ = server.run_until(std::future::pending()).await;
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build client");

        Self {
            addr,
            client,
            orchestrator,
            _handle: handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// POST an upload form
    pub async fn upload(&self, fields: &[(&str, &str)]) -> reqwest::Response {
        self.client
            .post(self.url("/"))
            .form(fields)
            .send()
            .await
            .expect("Failed to send request")
    }
}
