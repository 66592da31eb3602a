//! Entry point for the artifact-proxy server.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use artifact_proxy::{AppState, Config, server};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    // Another crate in the tree may already have picked a provider
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = Config::parse();

    if config.has_token() {
        info!("upstream token found");
    } else {
        warn!("no upstream token, outbound calls are unauthenticated");
    }

    let state = AppState::from_config(&config)?;
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    info!(
        api = %config.api_url,
        lookup = ?config.lookup,
        resolve_ttl_secs = config.resolve_ttl,
        "starting artifact proxy"
    );
    server::serve(listener, state).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
