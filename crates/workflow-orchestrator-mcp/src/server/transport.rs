//! HTTP transport.
//!
//! Mounts the OAuth endpoints, the bearer-gated MCP JSON-RPC endpoint and the
//! service glue (`/health`, `/manifest.json`) on one axum router.

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::State,
    http::{HeaderName, HeaderValue, Method, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::oauth::gate::{AuthContext, GuardPipeline, gate_middleware};
use super::oauth::{OAuthServer, handlers};
use crate::config::{Config, server};

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcResponse {
    const VERSION: &'static str = "2.0";

    #[must_use]
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self { jsonrpc: Cow::Borrowed(Self::VERSION), result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
            id,
        }
    }
}

/// Shared state for HTTP handlers.
#[derive(Debug)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub oauth: OAuthServer,
}

/// Create the HTTP router.
///
/// The bearer gate wraps every route; it lets public paths through and
/// rejects unauthenticated requests to protected ones. CORS sits outside the
/// gate so preflights and 401s still carry CORS headers.
pub fn create_router(config: Arc<Config>, oauth: OAuthServer) -> Router {
    let pipeline = GuardPipeline::bearer(oauth.clone());
    let cors = cors_layer(&config);
    let state = Arc::new(HttpState { config, oauth });

    Router::new()
        .route("/health", get(health_check))
        .route("/manifest.json", get(manifest))
        .route("/mcp", post(handle_mcp_post))
        .route("/.well-known/oauth-protected-resource", get(handlers::handle_protected_resource))
        .route("/.well-known/oauth-authorization-server", get(handlers::handle_auth_server_metadata))
        .route("/.well-known/openid-configuration", get(handlers::handle_auth_server_metadata))
        .route("/.well-known/jwks.json", get(handlers::handle_jwks))
        .route("/authorize", get(handlers::handle_authorize))
        .route("/login", post(handlers::handle_login))
        .route("/token", post(handlers::handle_token))
        .route("/revoke", post(handlers::handle_revoke))
        .route("/register", post(handlers::handle_register))
        .layer(middleware::from_fn_with_state(pipeline, gate_middleware))
        .layer(TimeoutLayer::new(server::REQUEST_TIMEOUT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            config.allowed_origins.iter().filter_map(|o| match HeaderValue::from_str(o) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                    None
                }
            }),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("mcp-protocol-version"),
            HeaderName::from_static("mcp-session-id"),
        ])
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn manifest(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "mcp_endpoint": state.config.endpoint("/mcp"),
        "authorization_server": state.config.endpoint("/.well-known/oauth-authorization-server"),
        "resource_metadata": state.config.resource_metadata_url()
    }))
}

/// Handle POST requests to /mcp.
///
/// Only reachable through the bearer gate, which attaches the caller's
/// [`AuthContext`].
async fn handle_mcp_post(
    auth: Option<Extension<AuthContext>>,
    Json(req): Json<JsonRpcRequest>,
) -> Response {
    let Some(Extension(auth)) = auth else {
        tracing::error!("MCP request reached the handler without an auth context");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    tracing::debug!(method = %req.method, user_id = %auth.user_id, client_id = %auth.client_id, "Handling MCP request");

    let is_notification = req.id.is_none();

    let response = match req.method.as_str() {
        "initialize" => JsonRpcResponse::success(req.id, handle_initialize(&req.params)),
        "ping" => JsonRpcResponse::success(req.id, serde_json::json!({})),
        "tools/list" => JsonRpcResponse::success(req.id, serde_json::json!({ "tools": [] })),
        method if method.starts_with("notifications/") || method == "initialized" => {
            if is_notification {
                return StatusCode::ACCEPTED.into_response();
            }
            JsonRpcResponse::success(req.id, serde_json::json!({}))
        }
        _ => {
            if is_notification {
                return StatusCode::ACCEPTED.into_response();
            }
            JsonRpcResponse::error(req.id, -32601, format!("Method not found: {}", req.method))
        }
    };

    Json(response).into_response()
}

fn handle_initialize(params: &serde_json::Value) -> serde_json::Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(|v| v.as_str())
        .unwrap_or("2024-11-05");

    tracing::info!(protocol_version, "MCP initialize");

    serde_json::json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}
