//! HTTP surface of the proxy.
//!
//! ```text
//! GET /{owner}/{repo}/.../artifacts/{id}/{path?}   file from a fixed artifact
//! GET /{owner}/{repo}/{branch}/{path?}             file from the newest build of a branch
//! ```

mod handler;

pub use handler::content_type_for;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use reqwest::Client;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::cache::ReaderCache;
use crate::config::Config;
use crate::resolve::{GithubApi, ResolutionCache, Resolver};

const USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION")
);

/// State shared by every request: the resolver and the archive reader cache.
#[derive(Clone)]
pub struct AppState {
    resolver: Arc<Resolver>,
    readers: Arc<ReaderCache>,
}

impl AppState {
    pub fn new(resolver: Arc<Resolver>, readers: Arc<ReaderCache>) -> Self {
        Self { resolver, readers }
    }

    /// Wire up the upstream client, both caches and the resolver.
    ///
    /// Starts the resolution cache sweeper, so this must run inside a Tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let headers = config.credential_headers()?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .context("failed to build HTTP client")?;

        let api = GithubApi::new(
            client.clone(),
            config.api_url.clone(),
            headers.clone(),
            config.lookup_strategy(),
        );
        let resolutions = Arc::new(ResolutionCache::new(config.resolve_ttl()));
        resolutions.spawn_sweeper();

        let resolver = Resolver::new(
            Arc::new(api),
            resolutions,
            config.retry_policy(),
            config.api_url.clone(),
            config.branch_max_age(),
        );
        let readers = ReaderCache::new(client, headers, config.reader_capacity as usize);

        Ok(Self::new(Arc::new(resolver), Arc::new(readers)))
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn readers(&self) -> &Arc<ReaderCache> {
        &self.readers
    }
}

/// Build the router: one catch-all route, everything else is a 404.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/{*path}", get(handler::serve_entry))
        .fallback(handler::no_address)
        .with_state(state)
}

/// Serve until Ctrl-C or SIGTERM.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down");
}
