//! `/services.json` and `/ping`

use futures::future::{BoxFuture, FutureExt};
use hyper::header::CONTENT_TYPE;
use hyper::{Request, Response, StatusCode};
use std::path::PathBuf;
use tracing::error;

use crate::config::ServiceRegistry;
use crate::error::{full_body, json_error_response, GatewayErrorCode};
use crate::middleware::Handler;
use crate::GatewayBody;

/// Where the reported service count comes from
#[derive(Debug, Clone)]
pub enum CountSource {
    /// Number of services mounted at startup
    Snapshot(usize),
    /// Re-read the registry file on every request
    Live(PathBuf),
}

/// Reports `{"count": N}`
pub struct ServiceCount {
    source: CountSource,
}

impl ServiceCount {
    pub fn new(source: CountSource) -> Self {
        Self { source }
    }

    async fn count(&self) -> Result<usize, crate::error::GatewayError> {
        match &self.source {
            CountSource::Snapshot(count) => Ok(*count),
            CountSource::Live(path) => ServiceRegistry::reload(path).await.map(|r| r.len()),
        }
    }
}

impl Handler for ServiceCount {
    fn call(&self, _req: Request<GatewayBody>) -> BoxFuture<'_, Response<GatewayBody>> {
        async move {
            match self.count().await {
                Ok(count) => {
                    let body = serde_json::json!({ "count": count });
                    Response::builder()
                        .status(StatusCode::OK)
                        .header(CONTENT_TYPE, "application/json")
                        .body(full_body(body.to_string()))
                        .expect("valid response with StatusCode enum and static header")
                }
                Err(e) => {
                    error!(error = %e, "Failed to reload service registry");
                    json_error_response(
                        GatewayErrorCode::RegistryUnavailable,
                        "Service registry unavailable",
                    )
                }
            }
        }
        .boxed()
    }
}

/// Liveness endpoint answering `pong`
pub struct Ping;

impl Handler for Ping {
    fn call(&self, _req: Request<GatewayBody>) -> BoxFuture<'_, Response<GatewayBody>> {
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/html")
            .body(full_body("pong"))
            .expect("valid response with StatusCode enum and static header");
        futures::future::ready(response).boxed()
    }
}
