//! OAuth 2.0 authorization server for MCP authentication.
//!
//! Issues and validates the bearer tokens that gate the MCP endpoint.
//!
//! ## Supported Standards
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256, plain)
//! - RFC 6749: Authorization Code and Refresh Token grants
//! - RFC 7009: Token Revocation
//!
//! ## Layout
//! - [`pkce`], [`token`], [`token_hash`]: pure primitives
//! - [`store`]: SQLite persistence for clients, users, codes and tokens
//! - [`flow`]: the protocol steps composed from the above
//! - [`gate`]: bearer token middleware for protected paths
//! - [`handlers`], [`login`]: the HTTP surface

pub mod flow;
pub mod gate;
pub mod handlers;
pub mod login;
pub mod pkce;
pub mod store;
pub mod token;
pub mod token_hash;
pub mod types;

pub use flow::OAuthServer;
pub use gate::{AuthContext, GateRejection};
pub use store::AuthStore;
pub use token::TokenCodec;
