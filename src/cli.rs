//! Command line arguments

use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::{GatewayOptions, StartupPolicy, DEFAULT_CDN_DIR, DEFAULT_SERVICES_PATH};

/// Long flags that may also be written with a single dash
const SINGLE_DASH_FLAGS: [&str; 4] = ["dir", "services", "skip-invalid", "live-count"];

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "switchyard", version, about = "Path-prefix HTTP gateway for local services")]
pub struct Args {
    /// Root directory served under /cdn/
    #[arg(long, default_value = DEFAULT_CDN_DIR)]
    pub dir: PathBuf,

    /// Service registry file
    #[arg(long, default_value = DEFAULT_SERVICES_PATH)]
    pub services: PathBuf,

    /// Skip services that cannot be mounted instead of refusing to start
    #[arg(long)]
    pub skip_invalid: bool,

    /// Re-read the registry file on every /services.json request
    #[arg(long)]
    pub live_count: bool,
}

impl Args {
    /// Parse the process arguments, accepting `-dir` as well as `--dir`
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize_go_flags(std::env::args_os()))
    }

    pub fn into_options(self) -> GatewayOptions {
        GatewayOptions {
            services_path: self.services,
            static_dir: self.dir,
            policy: if self.skip_invalid {
                StartupPolicy::SkipInvalid
            } else {
                StartupPolicy::FailFast
            },
            live_count: self.live_count,
        }
    }
}

/// Rewrite `-dir x` and `-dir=x` as `--dir x` and `--dir=x`
pub fn normalize_go_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    args.into_iter()
        .map(|arg| {
            let Some(text) = arg.to_str() else {
                return arg;
            };
            let Some(rest) = text.strip_prefix('-').filter(|r| !r.starts_with('-')) else {
                return arg;
            };
            let name = rest.split('=').next().unwrap_or(rest);
            if SINGLE_DASH_FLAGS.contains(&name) {
                OsString::from(format!("--{rest}"))
            } else {
                arg
            }
        })
        .collect()
}
