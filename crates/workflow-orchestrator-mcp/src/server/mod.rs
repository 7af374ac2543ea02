//! HTTP server for the workflow orchestrator.
//!
//! Wires the configuration, the authorization store and the OAuth server
//! into the axum router from [`transport`].

pub mod oauth;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use crate::config::Config;
use oauth::{AuthStore, OAuthServer};

/// MCP server with its embedded authorization server.
#[derive(Debug, Clone)]
pub struct McpServer {
    config: Arc<Config>,
    oauth: OAuthServer,
}

impl McpServer {
    /// Connect the authorization store and set up token signing.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or the signing key is invalid.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let store = AuthStore::connect(&config.database_url).await?;
        let oauth = OAuthServer::new(Arc::clone(&config), store)?;

        tracing::info!(
            issuer = %config.issuer(),
            algorithm = ?oauth.codec().algorithm(),
            login = config.login_enabled(),
            "Authorization server ready"
        );

        Ok(Self { config, oauth })
    }

    #[must_use]
    pub const fn oauth(&self) -> &OAuthServer {
        &self.oauth
    }

    /// Build the HTTP router.
    #[must_use]
    pub fn router(&self) -> Router {
        transport::create_router(Arc::clone(&self.config), self.oauth.clone())
    }

    /// Run the server in HTTP mode.
    ///
    /// # Errors
    ///
    /// Returns error on server failure.
    pub async fn run_http(self, addr: SocketAddr) -> anyhow::Result<()> {
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(base_url = %self.config.public_base_url, "HTTP server listening on http://{}", addr);

        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
