use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tracing::{info, warn};

use tinypay_gateway::api::{RateLimitConfig, create_router_with_rate_limit};
use tinypay_gateway::app::{AppState, PaymentService};
use tinypay_gateway::config::AppConfig;
use tinypay_gateway::infra::{
    LogFormat, RpcClientConfig, build_adapters, init_metrics_handle, init_tracing,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let log_format = LogFormat::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref());
    init_tracing(log_format).context("failed to install tracing subscriber")?;

    let config = AppConfig::load().context("failed to load configuration")?;

    let registry = Arc::new(config.registry());
    let adapters = build_adapters(&config.networks, &RpcClientConfig::default())?;
    let service = PaymentService::new(registry, adapters, config.confirmation)?;

    let mut app_state = AppState::new(Arc::new(service));
    match config.server.api_key {
        Some(key) => app_state = app_state.with_api_key(key),
        None => warn!("No API key configured, POST routes are unauthenticated"),
    }
    match init_metrics_handle() {
        Some(handle) => app_state = app_state.with_metrics(handle),
        None => warn!("Prometheus recorder unavailable, /metrics disabled"),
    }

    let router = create_router_with_rate_limit(
        Arc::new(app_state),
        RateLimitConfig::from_settings(config.rate_limit),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, networks = config.networks.len(), "Gateway listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
