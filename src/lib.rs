//! s3nd Library
//!
//! A local daemon that uploads files from the local filesystem to S3-compatible
//! object storage on request.
//!
//! # Features
//!
//! - **Admission Control**: A fixed number of uploads run at once; excess demand
//!   waits for a bounded time and is then rejected with 503
//! - **Deadlines**: Every upload is cancelled once its timeout elapses
//! - **Multipart**: Large files are split into parts uploaded in parallel
//! - **S3 Compatible**: Path-style addressing against any S3 endpoint
//!
//! # Example
//!
//! ```no_run
//! use s3nd::config::Config;
//! use s3nd::s3::S3Storage;
//! use s3nd::server::Server;
//! use s3nd::upload::{TransferPolicy, UploadOrchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("s3nd.yaml")?;
//!     let policy = TransferPolicy::from_config(&config.transfer);
//!     let storage = S3Storage::connect(&config.storage, policy).await?;
//!     let orchestrator = Arc::new(UploadOrchestrator::new(Arc::new(storage), &config.transfer));
//!     let server = Server::bind(&config.server, orchestrator).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod cli;
pub mod config;
pub mod metrics;
pub mod s3;
pub mod server;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
