//! S3 Connection Pool Module
//!
//! Provides the HTTP layer the AWS SDK sends requests through.
//!
//! # Design
//!
//! - One `reqwest` client shared by every request the SDK makes
//! - HTTP/1.1 only, so each in-flight part upload holds its own connection
//! - Idle connections per backend host are bounded; idle ones can expire
//!
//! # Example
//!
//! ```no_run
//! use s3nd::config::StorageConfig;
//! use s3nd::s3::pool::{PoolConfig, ReqwestHttpClient};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PoolConfig::from(&StorageConfig::default());
//! let http_client = ReqwestHttpClient::new(&pool)?;
//! // Hand it to aws_config::ConfigLoader::http_client(...)
//! # Ok(())
//! # }
//! ```

use crate::config::StorageConfig;
use aws_smithy_runtime_api::client::http::{
    HttpClient, HttpConnector, HttpConnectorFuture, HttpConnectorSettings, SharedHttpConnector,
};
use aws_smithy_runtime_api::client::orchestrator::{HttpRequest, HttpResponse};
use aws_smithy_runtime_api::client::result::ConnectorError;
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_runtime_api::http::StatusCode;
use aws_smithy_types::body::SdkBody;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Connection pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Connection pool sizing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle connections kept per backend host
    pub max_idle_per_host: usize,
    /// How long an idle connection is kept; `None` keeps it until the server closes it
    pub idle_timeout: Option<Duration>,
}

impl From<&StorageConfig> for PoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            max_idle_per_host: config.max_idle_connections,
            idle_timeout: config.idle_timeout,
        }
    }
}

/// Connect and read timeouts requested by the SDK
type TimeoutKey = (Option<Duration>, Option<Duration>);

/// SDK HTTP client backed by a pooled `reqwest::Client`
///
/// reqwest applies timeouts per client, so one client is kept for each
/// distinct pair of SDK timeouts. In practice every operation asks for the
/// same pair and a single pool serves all requests.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    config: PoolConfig,
    connectors: Arc<Mutex<HashMap<TimeoutKey, ReqwestConnector>>>,
}

impl ReqwestHttpClient {
    /// Build the pooled client
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Build` if the TLS backend cannot be initialized.
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        let untimed = build_client(config, (None, None))?;

        tracing::debug!(
            max_idle_per_host = config.max_idle_per_host,
            idle_timeout = ?config.idle_timeout,
            "Built S3 connection pool"
        );

        let mut connectors = HashMap::new();
        connectors.insert((None, None), ReqwestConnector { client: untimed });

        Ok(Self {
            config: config.clone(),
            connectors: Arc::new(Mutex::new(connectors)),
        })
    }

    fn connector_for(&self, timeouts: TimeoutKey) -> ReqwestConnector {
        let mut connectors = self.connectors.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(connector) = connectors.get(&timeouts) {
            return connector.clone();
        }

        match build_client(&self.config, timeouts) {
            Ok(client) => {
                let connector = ReqwestConnector { client };
                connectors.insert(timeouts, connector.clone());
                connector
            }
            Err(e) => {
                // Same builder as the untimed client, which did build
                tracing::warn!(error = %e, "Failed to build timed S3 client, using untimed pool");
                connectors
                    .get(&(None, None))
                    .cloned()
                    .unwrap_or_else(|| ReqwestConnector {
                        client: reqwest::Client::new(),
                    })
            }
        }
    }
}

fn build_client(config: &PoolConfig, timeouts: TimeoutKey) -> Result<reqwest::Client, reqwest::Error> {
    let (connect_timeout, read_timeout) = timeouts;

    let mut builder = reqwest::Client::builder()
        .http1_only()
        .pool_max_idle_per_host(config.max_idle_per_host)
        .pool_idle_timeout(config.idle_timeout);
    if let Some(timeout) = connect_timeout {
        builder = builder.connect_timeout(timeout);
    }
    if let Some(timeout) = read_timeout {
        builder = builder.read_timeout(timeout);
    }

    builder.build()
}

impl HttpClient for ReqwestHttpClient {
    fn http_connector(
        &self,
        settings: &HttpConnectorSettings,
        _components: &RuntimeComponents,
    ) -> SharedHttpConnector {
        let timeouts = (settings.connect_timeout(), settings.read_timeout());
        SharedHttpConnector::new(self.connector_for(timeouts))
    }
}

#[derive(Debug, Clone)]
struct ReqwestConnector {
    client: reqwest::Client,
}

impl HttpConnector for ReqwestConnector {
    fn call(&self, request: HttpRequest) -> HttpConnectorFuture {
        let client = self.client.clone();
        HttpConnectorFuture::new(send(client, request))
    }
}

async fn send(client: reqwest::Client, mut request: HttpRequest) -> Result<HttpResponse, ConnectorError> {
    let method = reqwest::Method::from_bytes(request.method().as_bytes())
        .map_err(|e| ConnectorError::user(e.into()))?;

    let mut builder = client.request(method, request.uri());
    for (name, value) in request.headers().iter() {
        builder = builder.header(name, value);
    }

    let body = request.take_body();
    let body = match body.bytes() {
        Some(bytes) => reqwest::Body::from(Bytes::copy_from_slice(bytes)),
        None => reqwest::Body::wrap_stream(http_body_util::BodyDataStream::new(body)),
    };

    let response = builder.body(body).send().await.map_err(connector_error)?;

    let status = StatusCode::try_from(response.status().as_u16())
        .map_err(|e| ConnectorError::other(e.into(), None))?;
    let headers = response.headers().clone();
    let payload = response.bytes().await.map_err(connector_error)?;

    let mut converted = HttpResponse::new(status, SdkBody::from(payload));
    for (name, value) in headers.iter() {
        converted
            .headers_mut()
            .append(name.as_str().to_owned(), header_text(value));
    }

    Ok(converted)
}

/// SDK headers are UTF-8 only; other bytes are replaced rather than dropped
fn header_text(value: &reqwest::header::HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}

fn connector_error(err: reqwest::Error) -> ConnectorError {
    if err.is_timeout() {
        ConnectorError::timeout(err.into())
    } else if err.is_connect() || err.is_body() || err.is_request() {
        ConnectorError::io(err.into())
    } else if err.is_builder() {
        ConnectorError::user(err.into())
    } else {
        ConnectorError::other(err.into(), None)
    }
}
