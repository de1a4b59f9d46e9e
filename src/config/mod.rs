//! Configuration module for s3nd
//!
//! Handles loading of the optional YAML configuration file, with support for
//! environment variable expansion, and validation of the merged result. The
//! configuration is read once at startup and never changes afterwards.

use crate::upload::multipart::{MAX_PARTS, MAX_PART_SIZE, MIN_PART_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub mod duration;
mod loader;

pub use duration::parse_duration;
pub use loader::ConfigLoader;

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Load configuration from a file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.endpoint_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "s3-endpoint-url is required".into(),
            ));
        }

        if !is_valid_http_url(&self.storage.endpoint_url) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid s3-endpoint-url '{}': must start with http:// or https://",
                self.storage.endpoint_url
            )));
        }

        if self.storage.max_idle_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_idle_connections must be at least 1".into(),
            ));
        }

        let transfer = &self.transfer;

        if transfer.max_parallel_uploads == 0 {
            return Err(ConfigError::ValidationError(
                "max_parallel_uploads must be at least 1".into(),
            ));
        }

        if transfer.upload_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "upload_timeout must be greater than zero".into(),
            ));
        }

        if transfer.admission_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "admission_timeout must be greater than zero".into(),
            ));
        }

        if transfer.part_size < MIN_PART_SIZE || transfer.part_size > MAX_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "Invalid part_size {}: must be between {} and {} bytes",
                transfer.part_size, MIN_PART_SIZE, MAX_PART_SIZE
            )));
        }

        if transfer.max_concurrent_parts == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_parts must be at least 1".into(),
            ));
        }

        if transfer.max_parts == 0 || transfer.max_parts > MAX_PARTS {
            return Err(ConfigError::ValidationError(format!(
                "Invalid max_parts {}: must be between 1 and {}",
                transfer.max_parts, MAX_PARTS
            )));
        }

        Ok(())
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    /// `host:port` as used for logging and binding
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    15555
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// S3 endpoint, e.g. `http://localhost:9000`. Required.
    #[serde(default)]
    pub endpoint_url: String,

    /// Region used for signing. Falls back to the AWS environment, then `us-east-1`.
    #[serde(default)]
    pub region: Option<String>,

    /// Idle connections kept open per backend host
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: usize,

    /// How long an idle connection is kept. `None` keeps it indefinitely.
    #[serde(default, with = "optional_duration")]
    pub idle_timeout: Option<Duration>,

    /// List buckets once at startup and refuse to start if that fails
    #[serde(default = "default_startup_check")]
    pub startup_check: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            region: None,
            max_idle_connections: default_max_idle_connections(),
            idle_timeout: None,
            startup_check: default_startup_check(),
        }
    }
}

fn default_max_idle_connections() -> usize {
    1000
}

fn default_startup_check() -> bool {
    true
}

/// Upload and admission tuning. Immutable after startup.
///
/// # Example
///
/// ```yaml
/// transfer:
///   max_parallel_uploads: 100
///   upload_timeout: 10s
///   admission_timeout: 2s
///   part_size: 5242880
///   max_concurrent_parts: 16
///   max_parts: 1000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Number of uploads allowed to run at the same time. Default: 100
    #[serde(default = "default_max_parallel_uploads")]
    pub max_parallel_uploads: usize,

    /// Deadline for one upload, counted from admission. Default: 10s
    #[serde(default = "default_upload_timeout", with = "duration")]
    pub upload_timeout: Duration,

    /// How long a request may wait for an upload slot. Default: 10s
    #[serde(default = "default_admission_timeout", with = "duration")]
    pub admission_timeout: Duration,

    /// Size of each multipart chunk in bytes. Default: 5 MiB
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Parts of a single upload transferred in parallel. Each one holds a
    /// `part_size` buffer, so this bounds per-upload memory. Default: 16
    #[serde(default = "default_max_concurrent_parts")]
    pub max_concurrent_parts: usize,

    /// Maximum number of parts per upload. Default: 1000
    #[serde(default = "default_max_parts")]
    pub max_parts: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_parallel_uploads: default_max_parallel_uploads(),
            upload_timeout: default_upload_timeout(),
            admission_timeout: default_admission_timeout(),
            part_size: default_part_size(),
            max_concurrent_parts: default_max_concurrent_parts(),
            max_parts: default_max_parts(),
        }
    }
}

fn default_max_parallel_uploads() -> usize {
    100
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_admission_timeout() -> Duration {
    default_upload_timeout()
}

fn default_part_size() -> u64 {
    MIN_PART_SIZE
}

fn default_max_concurrent_parts() -> usize {
    16
}

fn default_max_parts() -> usize {
    1000
}

mod optional_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(duration) => super::duration::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::duration")] Duration);

        let raw: Option<Wrapper> = Option::deserialize(deserializer)?;
        Ok(raw.map(|Wrapper(duration)| duration))
    }
}
