//! Route table and dispatch
//!
//! Exact routes win when the request path equals them. Otherwise the longest
//! registered prefix that the path starts with is selected. The table is
//! built once at startup and never changes afterwards.

use futures::future::{BoxFuture, FutureExt};
use hyper::{Request, Response};
use tracing::{debug, info, warn};

use crate::config::{GatewayOptions, Service, ServiceRegistry, StartupPolicy, CDN_PREFIX};
use crate::diagnostics::{CountSource, Ping, ServiceCount};
use crate::error::{json_error_response, GatewayError, GatewayErrorCode};
use crate::middleware::Handler;
use crate::pool::ConnectionPool;
use crate::proxy::ProxyMount;
use crate::static_files::StaticMount;
use crate::GatewayBody;

/// Path served by the service count endpoint
pub const SERVICES_PATH: &str = "/services.json";

/// Path served by the liveness endpoint
pub const PING_PATH: &str = "/ping";

/// How a route matches a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
}

impl PathMatch {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathMatch::Exact(exact) => path == exact,
            PathMatch::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// One entry in the route table
pub struct Route {
    matcher: PathMatch,
    label: String,
    handler: Box<dyn Handler>,
}

impl Route {
    pub fn matcher(&self) -> &PathMatch {
        &self.matcher
    }

    /// Name of the mount, used in logs and errors
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Immutable route table
pub struct Router {
    exact: Vec<Route>,
    /// Sorted by prefix length, longest first
    prefixes: Vec<Route>,
}

impl Router {
    pub fn builder(pool: ConnectionPool, policy: StartupPolicy) -> RouterBuilder {
        RouterBuilder {
            routes: Vec::new(),
            pool,
            policy,
        }
    }

    /// Select the route for `path`
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.exact
            .iter()
            .find(|route| route.matcher.matches(path))
            .or_else(|| self.prefixes.iter().find(|route| route.matcher.matches(path)))
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Handler for Router {
    fn call(&self, req: Request<GatewayBody>) -> BoxFuture<'_, Response<GatewayBody>> {
        match self.resolve(req.uri().path()) {
            Some(route) => {
                debug!(path = req.uri().path(), route = %route.label(), matcher = ?route.matcher(), "Dispatching request");
                route.handler.call(req)
            }
            None => {
                let response = json_error_response(
                    GatewayErrorCode::RouteNotFound,
                    format!("No route for {}", req.uri().path()),
                );
                futures::future::ready(response).boxed()
            }
        }
    }
}

/// Assembles a [`Router`], enforcing prefix uniqueness and the startup policy
pub struct RouterBuilder {
    routes: Vec<Route>,
    pool: ConnectionPool,
    policy: StartupPolicy,
}

impl RouterBuilder {
    /// Register a handler for one exact path
    pub fn exact(&mut self, path: &str, label: &str, handler: impl Handler + 'static) -> &mut Self {
        self.routes.push(Route {
            matcher: PathMatch::Exact(path.to_string()),
            label: label.to_string(),
            handler: Box::new(handler),
        });
        self
    }

    /// Register a handler for every path under `prefix`
    pub fn prefix(
        &mut self,
        prefix: &str,
        label: &str,
        handler: impl Handler + 'static,
    ) -> Result<&mut Self, GatewayError> {
        if let Some(existing) = self
            .routes
            .iter()
            .find(|route| route.matcher == PathMatch::Prefix(prefix.to_string()))
        {
            return Err(GatewayError::DuplicatePrefix {
                prefix: prefix.to_string(),
                first: existing.label.clone(),
                second: label.to_string(),
            });
        }

        self.routes.push(Route {
            matcher: PathMatch::Prefix(prefix.to_string()),
            label: label.to_string(),
            handler: Box::new(handler),
        });
        Ok(self)
    }

    /// Mount the static asset directory
    pub fn mount_static(&mut self, mount: StaticMount) -> Result<&mut Self, GatewayError> {
        let prefix = mount.prefix().to_string();
        info!(prefix = %prefix, dir = %mount.root().display(), "Serving static files");
        self.prefix(&prefix, "static files", mount)
    }

    /// Mount one service. Returns whether it was mounted; under
    /// [`StartupPolicy::SkipInvalid`] a bad descriptor is skipped instead of failing.
    pub fn mount_service(&mut self, service: &Service) -> Result<bool, GatewayError> {
        let result = ProxyMount::new(service, self.pool.clone())
            .and_then(|mount| self.prefix(&service.prefix, &service.name, mount).map(|_| ()));

        match (result, self.policy) {
            (Ok(()), _) => Ok(true),
            (Err(e), StartupPolicy::SkipInvalid) => {
                warn!(service = %service.name, error = %e, "Skipping service");
                Ok(false)
            }
            (Err(e), StartupPolicy::FailFast) => Err(e),
        }
    }

    /// Mount every service in the registry, returning how many were mounted
    pub fn mount_services(&mut self, registry: &ServiceRegistry) -> Result<usize, GatewayError> {
        for (outer, inner) in registry.nested_prefixes() {
            warn!(
                outer = %outer.name,
                outer_prefix = %outer.prefix,
                inner = %inner.name,
                inner_prefix = %inner.prefix,
                "Nested service prefixes; the longest prefix wins"
            );
        }

        let mut mounted = 0;
        for service in registry.services() {
            if self.mount_service(service)? {
                mounted += 1;
            }
        }
        Ok(mounted)
    }

    pub fn build(self) -> Router {
        let (exact, mut prefixes): (Vec<Route>, Vec<Route>) = self
            .routes
            .into_iter()
            .partition(|route| matches!(route.matcher, PathMatch::Exact(_)));

        prefixes.sort_by_key(|route| match &route.matcher {
            PathMatch::Prefix(prefix) => std::cmp::Reverse(prefix.len()),
            PathMatch::Exact(_) => std::cmp::Reverse(0),
        });

        Router { exact, prefixes }
    }
}

/// Build the complete route table: diagnostics, static files and one proxy
/// mount per service
pub fn build_router(
    registry: &ServiceRegistry,
    options: &GatewayOptions,
    pool: ConnectionPool,
) -> Result<Router, GatewayError> {
    let mut builder = Router::builder(pool, options.policy);

    builder.mount_static(StaticMount::new(CDN_PREFIX, options.static_dir.clone()))?;
    let mounted = builder.mount_services(registry)?;

    let count_source = if options.live_count {
        CountSource::Live(options.services_path.clone())
    } else {
        CountSource::Snapshot(mounted)
    };
    builder
        .exact(SERVICES_PATH, "service count", ServiceCount::new(count_source))
        .exact(PING_PATH, "ping", Ping);

    info!(services = mounted, "Route table built");
    Ok(builder.build())
}
