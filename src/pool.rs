//! Shared HTTP client for backend connections
//!
//! Every proxy mount forwards through one pooled client so that keep-alive
//! connections to a backend are reused across requests.

use http_body_util::BodyExt;
use hyper::{Request, Response, Uri, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

use crate::GatewayBody;

/// Error type for connection pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Error from the HTTP client
    #[error("client error: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),
}

/// Configuration for the connection pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum idle connections per host
    pub max_idle_per_host: usize,
    /// Idle connection timeout
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// A pooled HTTP/1.1 client for talking to backends
#[derive(Clone)]
pub struct ConnectionPool {
    client: Client<HttpConnector, GatewayBody>,
    config: PoolConfig,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector);

        debug!(
            max_idle = config.max_idle_per_host,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Connection pool initialized"
        );

        Self { client, config }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Send a request to `uri`, keeping method, headers and body of `req`
    pub async fn send_request(
        &self,
        req: Request<GatewayBody>,
        uri: Uri,
    ) -> Result<Response<GatewayBody>, PoolError> {
        let (mut parts, body) = req.into_parts();
        parts.uri = uri;
        // Backends are spoken to over HTTP/1.1 even when the client used h2c
        parts.version = Version::HTTP_11;

        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
