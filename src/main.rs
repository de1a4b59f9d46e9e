//! s3nd - local upload daemon
//!
//! Accepts `file`/`uri` form posts and uploads the named local file to
//! S3-compatible storage, with a bound on concurrent uploads.

use clap::Parser;
use s3nd::cli::Args;
use s3nd::s3::S3Storage;
use s3nd::server::Server;
use s3nd::upload::{TransferPolicy, UploadOrchestrator};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting s3nd v{}", s3nd::VERSION);

    let config = args.resolve()?;
    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let policy = TransferPolicy::from_config(&config.transfer);
    let storage = S3Storage::connect(&config.storage, policy).await?;

    if config.storage.startup_check {
        let buckets = storage.list_buckets().await?;
        info!(count = buckets.len(), buckets = ?buckets, "Storage reachable");
    }

    let orchestrator = Arc::new(UploadOrchestrator::new(Arc::new(storage), &config.transfer));
    info!(
        max_parallel_uploads = config.transfer.max_parallel_uploads,
        upload_timeout_ms = config.transfer.upload_timeout.as_millis() as u64,
        admission_timeout_ms = config.transfer.admission_timeout.as_millis() as u64,
        "Upload pipeline ready"
    );

    let server = Server::bind(&config.server, orchestrator).await?;
    server.run().await?;

    Ok(())
}
