//! Workflow Orchestrator MCP Server
//!
//! An MCP server for task workflows with an embedded OAuth 2.0 authorization
//! server. Clients register dynamically, run the authorization code flow with
//! PKCE, and call the MCP endpoint with the bearer token they receive.
//!
//! # Features
//!
//! - **OAuth 2.0**: Authorization code + PKCE, refresh, revocation, dynamic registration
//! - **JWT tokens**: HS256/384/512 or RS256/384/512, looked up and revoked by SHA-256 hash
//! - **SQLite**: Clients, users, codes and tokens via sqlx
//! - **Bearer gate**: Middleware with RFC 6750 challenges for protected paths
//!
//! # Example
//!
//! ```no_run
//! use workflow_orchestrator_mcp::{config::Config, server::McpServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = McpServer::new(config).await?;
//!
//!     server.run_http(([0, 0, 0, 0], 8000).into()).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;

pub use config::Config;
pub use error::{OAuthError, StoreError, TokenError};
pub use server::McpServer;
pub use server::oauth::OAuthServer;
