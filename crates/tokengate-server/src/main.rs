//! Boundary launcher for the Tokengate gateway.
//!
//! Environment: `CONFIG_PATH` (default `config.json`), `SERVER_PORT` and
//! `SERVER_URL` override the file. Exits non-zero on configuration
//! validation failure, bind failure, or an unreachable IDP at startup.

use std::sync::Arc;

use anyhow::Context as _;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tokengate_core::cache::TokenCache;
use tokengate_core::config::GatewayConfig;
use tokengate_core::context::CoreContext;
use tokengate_delegation::DelegationRegistry;
use tokengate_server::dispatcher::ToolDispatcher;
use tokengate_server::routes::build_router;
use tokengate_server::state::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "startup failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    let mut config =
        GatewayConfig::from_file(&config_path).context("loading configuration")?;

    if let Ok(port) = std::env::var("SERVER_PORT") {
        config.mcp.port = port.parse().context("SERVER_PORT is not a port number")?;
    }
    if let Ok(url) = std::env::var("SERVER_URL") {
        config.mcp.server_url = Some(url);
    }

    let port = config.mcp.port;
    let core = CoreContext::from_config(config).context("building core services")?;

    // Fail fast when an IDP is unreachable.
    core.idp_registry
        .probe_all()
        .await
        .map_err(|e| anyhow::anyhow!("IDP unreachable at startup: {e}"))?;

    let delegation = Arc::new(DelegationRegistry::new(core.audit.clone()));
    let tools = Arc::new(ToolDispatcher::new(core.audit.clone()));
    let sweeper = core.token_cache.as_ref().map(|cache| {
        TokenCache::spawn_sweeper(Arc::clone(cache))
    });

    let state = AppState::new(core, Arc::clone(&delegation), tools);
    let router = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(
        port,
        server_url = %state.server_url,
        server_name = %state.core.config.mcp.server_name,
        "tokengate listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving")?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    delegation.shutdown().await;
    info!("shutdown complete");
    Ok(())
}
