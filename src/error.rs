//! Startup errors and JSON error responses for the gateway

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::GatewayBody;

/// Fatal errors raised while the gateway is initializing
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("failed to read service registry {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse service registry {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("service '{service}': prefix '{prefix}' must start with '/'")]
    InvalidPrefix { service: String, prefix: String },

    #[error("service '{service}': invalid backend port '{port}': {reason}")]
    InvalidTarget {
        service: String,
        port: String,
        reason: String,
    },

    #[error("prefix '{prefix}' is mounted by both '{first}' and '{second}'")]
    DuplicatePrefix {
        prefix: String,
        first: String,
        second: String,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Error codes for request-time failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    /// No mount matches the request path
    RouteNotFound,
    /// Static asset does not exist
    FileNotFound,
    /// Request could not be turned into a forwarded request
    BadRequest,
    /// Backend refused the connection or failed mid-request
    UpstreamUnreachable,
    /// Live registry reload failed
    RegistryUnavailable,
    /// Internal gateway error
    InternalError,
}

impl GatewayErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayErrorCode::RouteNotFound => StatusCode::NOT_FOUND,
            GatewayErrorCode::FileNotFound => StatusCode::NOT_FOUND,
            GatewayErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            GatewayErrorCode::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            GatewayErrorCode::RegistryUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Gateway-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GatewayErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            GatewayErrorCode::FileNotFound => "FILE_NOT_FOUND",
            GatewayErrorCode::BadRequest => "BAD_REQUEST",
            GatewayErrorCode::UpstreamUnreachable => "UPSTREAM_UNREACHABLE",
            GatewayErrorCode::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            GatewayErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: GatewayErrorCode,
    pub message: String,
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Wrap a complete byte buffer in the gateway body type
pub fn full_body(bytes: impl Into<Bytes>) -> GatewayBody {
    Full::new(bytes.into()).map_err(|never| match never {}).boxed()
}

/// Create a JSON error response with X-Gateway-Error header
pub fn json_error_response(
    code: GatewayErrorCode,
    message: impl Into<String>,
) -> Response<GatewayBody> {
    let error = ErrorResponse::new(code, message);

    Response::builder()
        .status(code.status_code())
        .header("Content-Type", "application/json")
        .header("X-Gateway-Error", code.as_header_value())
        .body(full_body(error.to_json()))
        .expect("valid response with StatusCode enum and static headers")
}
