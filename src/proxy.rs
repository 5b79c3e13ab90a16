//! Reverse proxy mounts
//!
//! A [`ProxyMount`] binds one service prefix to `http://localhost:{port}/`.
//! The prefix is stripped from the request path before forwarding, the rest of
//! the request is relayed as-is and the backend response is streamed back.

use futures::future::{BoxFuture, FutureExt};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::{Request, Response, Uri};
use tracing::{info, warn};

use crate::config::Service;
use crate::error::{json_error_response, GatewayError, GatewayErrorCode};
use crate::middleware::Handler;
use crate::pool::ConnectionPool;
use crate::{ClientAddr, GatewayBody};

/// Header name for forwarded-for
const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwarding rule for one service
pub struct ProxyMount {
    name: String,
    prefix: String,
    target: Uri,
    pool: ConnectionPool,
}

impl ProxyMount {
    /// Build the mount for `service`, failing if no valid target address can be formed
    pub fn new(service: &Service, pool: ConnectionPool) -> Result<Self, GatewayError> {
        service.validate()?;
        let port = service.backend_port()?;

        let target: Uri = format!("http://localhost:{port}/").parse().map_err(
            |e: hyper::http::uri::InvalidUri| GatewayError::InvalidTarget {
                service: service.name.clone(),
                port: service.port.clone(),
                reason: e.to_string(),
            },
        )?;

        info!(service = %service.name, prefix = %service.prefix, target = %target, "Loaded service");

        Ok(Self {
            name: service.name.clone(),
            prefix: service.prefix.clone(),
            target,
            pool,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn target(&self) -> &Uri {
        &self.target
    }

    /// Compute the backend URI for an incoming request URI
    pub fn forward_uri(&self, uri: &Uri) -> Result<Uri, hyper::http::Error> {
        let path = uri.path();
        let stripped = path.strip_prefix(self.prefix.as_str()).unwrap_or(path);
        let joined = single_joining_slash(self.target.path(), stripped);

        let path_and_query = match uri.query() {
            Some(query) => format!("{joined}?{query}"),
            None => joined,
        };

        let mut builder = Uri::builder().path_and_query(path_and_query);
        if let Some(scheme) = self.target.scheme() {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(authority) = self.target.authority() {
            builder = builder.authority(authority.clone());
        }
        builder.build()
    }

    /// Forward a request to the backend and relay its response
    pub async fn forward(&self, mut req: Request<GatewayBody>) -> Response<GatewayBody> {
        let uri = match self.forward_uri(req.uri()) {
            Ok(uri) => uri,
            Err(e) => {
                warn!(service = %self.name, uri = %req.uri(), error = %e, "Failed to build backend URI");
                return json_error_response(GatewayErrorCode::BadRequest, "Invalid request path");
            }
        };

        let client_addr = req.extensions().get::<ClientAddr>().copied();
        let headers = req.headers_mut();
        remove_hop_by_hop_headers(headers);
        add_forwarded_headers(headers, client_addr);

        match self.pool.send_request(req, uri.clone()).await {
            Ok(mut response) => {
                remove_hop_by_hop_headers(response.headers_mut());
                response
            }
            Err(e) => {
                warn!(service = %self.name, backend = %uri, error = %e, "Proxy error");
                json_error_response(
                    GatewayErrorCode::UpstreamUnreachable,
                    "Failed to reach backend",
                )
            }
        }
    }
}

impl Handler for ProxyMount {
    fn call(&self, req: Request<GatewayBody>) -> BoxFuture<'_, Response<GatewayBody>> {
        self.forward(req).boxed()
    }
}

/// Join two path pieces so exactly one slash separates them
pub fn single_joining_slash(base: &str, rest: &str) -> String {
    match (base.ends_with('/'), rest.starts_with('/')) {
        (true, true) => format!("{base}{}", &rest[1..]),
        (false, false) => format!("{base}/{rest}"),
        _ => format!("{base}{rest}"),
    }
}

fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

fn add_forwarded_headers(headers: &mut HeaderMap, client_addr: Option<ClientAddr>) {
    if let Some(ClientAddr(addr)) = client_addr {
        let ip = addr.ip().to_string();
        let prior: Vec<&str> = headers
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let value = if prior.is_empty() {
            ip
        } else {
            format!("{}, {}", prior.join(", "), ip)
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if !headers.contains_key(X_FORWARDED_HOST) {
        if let Some(host) = headers.get(HOST).cloned() {
            headers.insert(X_FORWARDED_HOST, host);
        }
    }

    if !headers.contains_key(X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }
}
