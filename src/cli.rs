//! Command-line arguments
//!
//! Every option can also come from the environment. Flags win over the YAML
//! file, which wins over built-in defaults.

use crate::config::{parse_duration, Config, ConfigError, ConfigLoader};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// s3nd - upload local files to S3 on request
#[derive(Parser, Debug, Clone)]
#[command(name = "s3nd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Optional YAML configuration file
    #[arg(short, long, env = "S3DAEMON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "S3DAEMON_HOST")]
    pub host: Option<String>,

    /// Listen port [default: 15555]
    #[arg(long, env = "S3DAEMON_PORT")]
    pub port: Option<u16>,

    /// S3 endpoint URL (required)
    #[arg(long = "s3-endpoint-url", env = "S3_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Region used to sign requests
    #[arg(long = "s3-region")]
    pub region: Option<String>,

    /// Maximum number of uploads running at once [default: 100]
    #[arg(long, env = "S3DAEMON_MAX_PARALLEL_UPLOADS")]
    pub max_parallel_uploads: Option<usize>,

    /// Deadline for one upload, e.g. 10s [default: 10s]
    #[arg(long, env = "S3DAEMON_UPLOAD_TIMEOUT", value_parser = parse_duration)]
    pub upload_timeout: Option<Duration>,

    /// How long a request waits for an upload slot [default: 10s]
    #[arg(long, env = "S3DAEMON_ADMISSION_TIMEOUT", value_parser = parse_duration)]
    pub admission_timeout: Option<Duration>,

    /// Multipart chunk size in bytes [default: 5242880]
    #[arg(long)]
    pub part_size: Option<u64>,

    /// Parts of one upload sent in parallel [default: 16]
    #[arg(long)]
    pub max_concurrent_parts: Option<usize>,

    /// Maximum number of parts per upload [default: 1000]
    #[arg(long)]
    pub max_parts: Option<usize>,

    /// Idle connections kept per backend host [default: 1000]
    #[arg(long)]
    pub max_idle_connections: Option<usize>,

    /// Do not list buckets at startup
    #[arg(long)]
    pub skip_startup_check: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Build the effective configuration and validate it.
    pub fn resolve(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ConfigLoader::read(path)?,
            None => Config::default(),
        };

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(endpoint_url) = &self.endpoint_url {
            config.storage.endpoint_url = endpoint_url.clone();
        }
        if let Some(region) = &self.region {
            config.storage.region = Some(region.clone());
        }
        if let Some(max) = self.max_idle_connections {
            config.storage.max_idle_connections = max;
        }
        if self.skip_startup_check {
            config.storage.startup_check = false;
        }

        let transfer = &mut config.transfer;
        if let Some(max) = self.max_parallel_uploads {
            transfer.max_parallel_uploads = max;
        }
        if let Some(timeout) = self.upload_timeout {
            transfer.upload_timeout = timeout;
        }
        if let Some(timeout) = self.admission_timeout {
            transfer.admission_timeout = timeout;
        }
        if let Some(part_size) = self.part_size {
            transfer.part_size = part_size;
        }
        if let Some(max) = self.max_concurrent_parts {
            transfer.max_concurrent_parts = max;
        }
        if let Some(max) = self.max_parts {
            transfer.max_parts = max;
        }

        config.validate()?;
        Ok(config)
    }
}
