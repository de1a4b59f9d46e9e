//! HTTP server module
//!
//! Accepts connections and serves upload requests.
//!
//! # Architecture
//!
//! The server is built on top of `hyper` and `tokio`:
//! - One task per connection, HTTP/1.1
//! - Every connection shares one [`UploadOrchestrator`]
//! - Graceful shutdown: stop accepting and admitting, then let open
//!   connections finish
//!
//! # Example
//!
//! ```no_run
//! # use s3nd::config::ServerConfig;
//! # use s3nd::server::Server;
//! # use s3nd::upload::UploadOrchestrator;
//! # use std::sync::Arc;
//! # async fn example(orchestrator: Arc<UploadOrchestrator>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig {
//!     host: "127.0.0.1".into(),
//!     port: 0,
//! };
//! let server = Server::bind(&config, orchestrator).await?;
//! println!("Listening on {}", server.local_addr());
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod handler;

use crate::config::ServerConfig;
use crate::upload::UploadOrchestrator;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// How long open connections get to finish after shutdown is requested
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),
}

/// HTTP Server
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    orchestrator: Arc<UploadOrchestrator>,
}

impl Server {
    /// Bind to `config.host:config.port`.
    ///
    /// If port 0 is specified, the OS will assign an available port; see
    /// [`Server::local_addr`].
    pub async fn bind(
        config: &ServerConfig,
        orchestrator: Arc<UploadOrchestrator>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| {
                ServerError::BindError(format!("Failed to bind to {}: {}", config.address(), e))
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            orchestrator,
        })
    }

    /// The address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run until Ctrl-C
    pub async fn run(self) -> Result<(), ServerError> {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        };
        self.run_until(shutdown).await
    }

    /// Run until `shutdown` completes, then drain open connections.
    ///
    /// Connection errors are logged but don't stop the server.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        info!(
            address = %self.local_addr,
            max_parallel_uploads = self.orchestrator.admission().capacity(),
            "Starting server"
        );

        let graceful = GracefulShutdown::new();
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };

            let orchestrator = Arc::clone(&self.orchestrator);
            let io = TokioIo::new(stream);

            let service = service_fn(move |req| {
                let orchestrator = Arc::clone(&orchestrator);
                async move { handler::handle_request(req, orchestrator).await }
            });

            let connection = graceful.watch(http1::Builder::new().serve_connection(io, service));

            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    warn!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }

        info!("Shutting down server");
        drop(self.listener);
        // Requests still arriving on open connections are turned away
        self.orchestrator.admission().close();

        match tokio::time::timeout(SHUTDOWN_GRACE, graceful.shutdown()).await {
            Ok(()) => info!("All connections closed"),
            Err(_) => warn!(
                grace_secs = SHUTDOWN_GRACE.as_secs(),
                "Timed out waiting for connections to close"
            ),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::upload::{StorageClient, StorageError};

    struct NoopStorage;

    #[async_trait::async_trait]
    impl StorageClient for NoopStorage {
        async fn put_object(
            &self,
            _bucket: &str,
            _key: &str,
            _body: tokio::fs::File,
        ) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn orchestrator() -> Arc<UploadOrchestrator> {
        Arc::new(UploadOrchestrator::new(
            Arc::new(NoopStorage),
            &TransferConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        let server = Server::bind(&config, orchestrator()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_invalid_host() {
        let config = ServerConfig {
            host: "invalid host".into(),
            port: 0,
        };
        let result = Server::bind(&config, orchestrator()).await;
        assert!(matches!(result, Err(ServerError::BindError(_))));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        };
        let orchestrator = orchestrator();
        let server = Server::bind(&config, Arc::clone(&orchestrator)).await.unwrap();
        let result = server.run_until(async {}).await;
        assert!(result.is_ok());
        assert!(orchestrator.admission().is_closed());
    }
}
