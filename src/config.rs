use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::GatewayError;

/// Default location of the service registry
pub const DEFAULT_SERVICES_PATH: &str = "./services.json";

/// Default root directory for the static asset mount
pub const DEFAULT_CDN_DIR: &str = "./cdn";

/// Path prefix the static asset mount is bound to
pub const CDN_PREFIX: &str = "/cdn/";

/// Port the gateway listens on
pub const LISTEN_PORT: u16 = 8080;

/// A backend service mounted behind a path prefix
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Service {
    /// Human-readable label, used for logging
    pub name: String,

    /// Path prefix requests are matched against, e.g. "/users/"
    pub prefix: String,

    /// Port the backend listens on at localhost, kept as written in the file
    pub port: String,
}

impl Service {
    pub fn new(name: &str, prefix: &str, port: &str) -> Self {
        Self {
            name: name.to_string(),
            prefix: prefix.to_string(),
            port: port.to_string(),
        }
    }

    /// Parse the backend port
    pub fn backend_port(&self) -> Result<u16, GatewayError> {
        let invalid = |reason: String| GatewayError::InvalidTarget {
            service: self.name.clone(),
            port: self.port.clone(),
            reason,
        };

        let port: u16 = self
            .port
            .parse()
            .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;

        if port == 0 {
            return Err(invalid("port must be greater than 0".to_string()));
        }

        Ok(port)
    }

    /// Validate the descriptor on its own
    pub fn validate(&self) -> Result<(), GatewayError> {
        if !self.prefix.starts_with('/') {
            return Err(GatewayError::InvalidPrefix {
                service: self.name.clone(),
                prefix: self.prefix.clone(),
            });
        }

        self.backend_port().map(|_| ())
    }
}

/// The immutable list of services loaded at startup
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<Service>,
}

impl ServiceRegistry {
    pub fn new(services: Vec<Service>) -> Self {
        Self { services }
    }

    /// Load the registry from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| GatewayError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content, path)
    }

    /// Re-read the registry without blocking the runtime
    pub async fn reload<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| GatewayError::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                })?;
        Self::from_json(&content, path)
    }

    fn from_json(content: &str, path: &Path) -> Result<Self, GatewayError> {
        let services: Vec<Service> =
            serde_json::from_str(content).map_err(|source| GatewayError::ConfigParse {
                path: PathBuf::from(path),
                source,
            })?;
        Ok(Self { services })
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Pairs of services where the first prefix strictly contains the second.
    /// Longest-prefix routing resolves these, so they are reported, not rejected.
    pub fn nested_prefixes(&self) -> Vec<(&Service, &Service)> {
        let mut nested = Vec::new();
        for outer in &self.services {
            for inner in &self.services {
                if inner.prefix.len() > outer.prefix.len() && inner.prefix.starts_with(&outer.prefix) {
                    nested.push((outer, inner));
                }
            }
        }
        nested
    }
}

/// What to do with a service descriptor that cannot be mounted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartupPolicy {
    /// Abort startup on the first invalid descriptor
    #[default]
    FailFast,
    /// Log the invalid descriptor and keep going without it
    SkipInvalid,
}

/// Everything needed to assemble the gateway's route table
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Registry file, also re-read per request when `live_count` is set
    pub services_path: PathBuf,
    /// Root directory for the static asset mount
    pub static_dir: PathBuf,
    pub policy: StartupPolicy,
    /// Report the live registry file count from `/services.json`
    pub live_count: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            services_path: PathBuf::from(DEFAULT_SERVICES_PATH),
            static_dir: PathBuf::from(DEFAULT_CDN_DIR),
            policy: StartupPolicy::default(),
            live_count: false,
        }
    }
}
