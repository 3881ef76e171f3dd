//! Onboarding server entry point.

use anyhow::Context;
use onboarding_core::spawn_purger;
use onboarding_server::{
    api::{create_router_with_rate_limit, RateLimitState},
    app,
    config::{Config, LogConfig, LogFormat},
};
use std::net::{IpAddr, SocketAddr};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_logging(&config.log);

    info!("Starting onboarding server...");

    let services = app::build(&config).await?;

    let purger = spawn_purger(
        services.repository,
        services.ledger,
        config.flow.purge_interval,
    );

    let app = create_router_with_rate_limit(
        services.state,
        RateLimitState::new(config.rate_limit.global_per_minute),
    );

    let ip: IpAddr = config.server.listen_addr.parse().unwrap_or_else(|_| {
        warn!(listen_addr = %config.server.listen_addr, "Unparseable listen address, using 0.0.0.0");
        IpAddr::from([0, 0, 0, 0])
    });
    let addr = SocketAddr::new(ip, config.server.port);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
        })
        .await
        .context("Server error")?;

    purger.abort();
    info!("Shutting down...");
    Ok(())
}

/// `RUST_LOG` overrides the configured level.
fn init_logging(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry().with(filter);

    match log.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
