//! Switchyard - a small HTTP gateway for local services
//!
//! This library provides a single-port front door that:
//! - Mounts each service from a JSON registry behind a path prefix
//! - Strips the prefix and forwards requests to `http://localhost:{port}/`
//! - Serves static assets from a directory under `/cdn/`
//! - Answers `/ping` and reports the registered service count on `/services.json`
//! - Logs every request and sets a permissive CORS header on every response

use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use std::net::SocketAddr;

pub mod cli;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod router;
pub mod server;
pub mod static_files;

/// Body type shared by every handler
pub type GatewayBody = BoxBody<Bytes, hyper::Error>;

/// Peer address of the connection a request arrived on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);
