use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use switchyard::cli::Args;
use switchyard::config::{ServiceRegistry, LISTEN_PORT};
use switchyard::middleware;
use switchyard::pool::{ConnectionPool, PoolConfig};
use switchyard::router::build_router;
use switchyard::server::GatewayServer;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("switchyard=info".parse().expect("valid log directive")),
        )
        .init();

    let options = Args::parse_normalized().into_options();

    let registry = ServiceRegistry::load(&options.services_path).map_err(|e| {
        error!(path = %options.services_path.display(), error = %e, "Failed to load service registry");
        e
    })?;
    info!(
        path = %options.services_path.display(),
        services = registry.len(),
        "Service registry loaded"
    );

    let pool_config = PoolConfig::default();
    info!(
        max_idle = pool_config.max_idle_per_host,
        idle_timeout_secs = pool_config.idle_timeout.as_secs(),
        "Connection pool configured"
    );

    let router = build_router(&registry, &options, ConnectionPool::new(pool_config))
        .context("Failed to build route table")?;
    let handler = Arc::new(middleware::chain(router));

    let addr = SocketAddr::from(([0, 0, 0, 0], LISTEN_PORT));
    let server = GatewayServer::bind(addr, handler).await?;
    info!(addr = %addr, "Starting gateway");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down...");
        }
    }

    info!("Shutdown complete");
    Ok(())
}
