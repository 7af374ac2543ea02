//! Bearer token gate for protected paths.
//!
//! Requests pass through an ordered list of [`Guard`]s. Each guard either
//! hands the request on, lets it through without further checks, or answers
//! it directly. The last guard verifies the bearer token and attaches an
//! [`AuthContext`] that downstream handlers read as an extension.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use super::flow::OAuthServer;
use super::token::TokenKind;
use super::token_hash::hash_token;
use crate::config::{Config, oauth};
use crate::error::{OAuthError, StoreError, TokenError};

/// Paths that never require a token.
pub const PUBLIC_PATHS: &[&str] = &[
    "/health",
    "/manifest.json",
    "/.well-known/",
    "/authorize",
    "/login",
    "/token",
    "/revoke",
    "/register",
    "/docs",
    "/redoc",
    "/openapi.json",
];

/// Identity resolved from a verified access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: String,
    pub client_id: String,
    pub scope: String,
}

/// Why a bearer token was refused. Every variant is a 401.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GateRejection {
    #[error("missing Authorization header")]
    Missing,
    #[error("token has expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token not found")]
    NotFound,
    #[error("token has been revoked")]
    Revoked,
}

impl GateRejection {
    const fn error_code(&self) -> &'static str {
        match self {
            Self::Missing => "invalid_request",
            _ => "invalid_token",
        }
    }

    const fn description(&self) -> &'static str {
        match self {
            Self::Missing => "Missing Authorization header",
            Self::Expired => "Token has expired",
            Self::Invalid(_) => "Invalid token",
            Self::NotFound => "Token not found",
            Self::Revoked => "Token has been revoked",
        }
    }

    /// Render as a 401 with a `WWW-Authenticate` challenge.
    #[must_use]
    pub fn into_challenge(self, config: &Config) -> Response {
        let challenge = format!(
            r#"Bearer realm="{}", error="{}", error_description="{}", resource_metadata="{}", scope="{}""#,
            oauth::REALM,
            self.error_code(),
            self.description(),
            config.resource_metadata_url(),
            oauth::DEFAULT_SCOPE,
        );

        let body = serde_json::json!({
            "error": self.error_code(),
            "error_description": self.description(),
        });
        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        match HeaderValue::from_str(&challenge) {
            Ok(value) => {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
            Err(e) => tracing::error!(error = %e, "Unencodable WWW-Authenticate challenge"),
        }
        response
    }
}

impl From<TokenError> for GateRejection {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Self::Expired,
            other => Self::Invalid(other.to_string()),
        }
    }
}

/// Failure while authenticating a bearer token.
#[derive(thiserror::Error, Debug)]
pub enum GateError {
    #[error(transparent)]
    Rejected(#[from] GateRejection),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a single guard.
#[derive(Debug)]
pub enum Verdict {
    /// Hand the request to the next guard.
    Next,
    /// Skip the remaining guards and run the handler.
    Pass,
    /// Answer with this response instead of running the handler.
    Reject(Response),
}

/// One step of the request pipeline.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Guard name for logs.
    fn name(&self) -> &'static str;

    async fn check(&self, req: &mut Request) -> Verdict;
}

/// Ordered guards run in front of every request.
#[derive(Clone)]
pub struct GuardPipeline {
    guards: Arc<Vec<Box<dyn Guard>>>,
}

impl GuardPipeline {
    #[must_use]
    pub fn new(guards: Vec<Box<dyn Guard>>) -> Self {
        Self { guards: Arc::new(guards) }
    }

    /// Preflight, public-path and bearer guards, in that order.
    #[must_use]
    pub fn bearer(server: OAuthServer) -> Self {
        let paths = PathGuard::new(&server.config().protected_paths);
        Self::new(vec![Box::new(PreflightGuard), Box::new(paths), Box::new(BearerGuard::new(server))])
    }

    /// Run the guards, then the handler unless a guard answered.
    pub async fn run(&self, mut req: Request, next: Next) -> Response {
        for guard in self.guards.iter() {
            match guard.check(&mut req).await {
                Verdict::Next => {}
                Verdict::Pass => break,
                Verdict::Reject(response) => {
                    tracing::debug!(guard = guard.name(), path = %req.uri().path(), "Request rejected");
                    return response;
                }
            }
        }
        next.run(req).await
    }
}

impl std::fmt::Debug for GuardPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.guards.iter().map(|g| g.name()).collect();
        f.debug_struct("GuardPipeline").field("guards", &names).finish()
    }
}

/// Axum middleware entry point.
pub async fn gate_middleware(
    State(pipeline): State<GuardPipeline>,
    req: Request,
    next: Next,
) -> Response {
    pipeline.run(req, next).await
}

// ─── Guards ──────────────────────────────────────────────────────────────────

/// CORS preflight never carries credentials.
#[derive(Debug)]
pub struct PreflightGuard;

#[async_trait]
impl Guard for PreflightGuard {
    fn name(&self) -> &'static str {
        "preflight"
    }

    async fn check(&self, req: &mut Request) -> Verdict {
        if *req.method() == Method::OPTIONS { Verdict::Pass } else { Verdict::Next }
    }
}

/// Lets public paths and anything outside the protected prefixes through.
///
/// With no protected prefixes configured, every non-public path is protected.
#[derive(Debug)]
pub struct PathGuard {
    protected: Vec<String>,
}

impl PathGuard {
    #[must_use]
    pub fn new(protected: &[String]) -> Self {
        Self { protected: protected.to_vec() }
    }

    fn requires_token(&self, path: &str) -> bool {
        if PUBLIC_PATHS.iter().any(|prefix| path.starts_with(prefix)) {
            return false;
        }
        self.protected.is_empty() || self.protected.iter().any(|prefix| under_prefix(path, prefix))
    }
}

#[async_trait]
impl Guard for PathGuard {
    fn name(&self) -> &'static str {
        "path"
    }

    async fn check(&self, req: &mut Request) -> Verdict {
        if self.requires_token(req.uri().path()) { Verdict::Next } else { Verdict::Pass }
    }
}

/// Verifies `Authorization: Bearer` against the codec and the store.
#[derive(Debug)]
pub struct BearerGuard {
    server: OAuthServer,
}

impl BearerGuard {
    #[must_use]
    pub const fn new(server: OAuthServer) -> Self {
        Self { server }
    }

    /// Resolve an access token to its identity.
    ///
    /// The signature is checked first, then the persisted record: it must
    /// exist, be unrevoked and its stored access expiry must not have passed.
    /// Revocation state is read from the store on every call.
    pub async fn authenticate(&self, token: &str) -> Result<AuthContext, GateError> {
        let claims = self
            .server
            .codec()
            .verify(token, TokenKind::AccessToken)
            .map_err(GateRejection::from)?;

        let Some(record) = self.server.store().find_token_by_access_hash(&hash_token(token)).await? else {
            return Err(GateRejection::NotFound.into());
        };
        if record.revoked {
            return Err(GateRejection::Revoked.into());
        }
        if record.is_access_expired(Utc::now()) {
            return Err(GateRejection::Expired.into());
        }

        Ok(AuthContext { user_id: claims.sub, client_id: claims.client_id, scope: claims.scope })
    }
}

#[async_trait]
impl Guard for BearerGuard {
    fn name(&self) -> &'static str {
        "bearer"
    }

    async fn check(&self, req: &mut Request) -> Verdict {
        let path = req.uri().path().to_string();
        let Some(token) = bearer_token(req.headers()) else {
            tracing::warn!(path = %path, "Missing Authorization header for protected path");
            return Verdict::Reject(GateRejection::Missing.into_challenge(self.server.config()));
        };

        match self.authenticate(&token).await {
            Ok(context) => {
                tracing::debug!(user_id = %context.user_id, path = %path, "Authenticated request");
                req.extensions_mut().insert(context);
                Verdict::Pass
            }
            Err(GateError::Rejected(rejection)) => {
                match &rejection {
                    GateRejection::Expired => tracing::info!(path = %path, "Expired token"),
                    other => tracing::warn!(path = %path, reason = %other, "Rejected bearer token"),
                }
                Verdict::Reject(rejection.into_challenge(self.server.config()))
            }
            Err(GateError::Store(e)) => Verdict::Reject(OAuthError::from(e).into_response()),
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => {
            Some(token.to_string())
        }
        _ => None,
    }
}

fn under_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}
