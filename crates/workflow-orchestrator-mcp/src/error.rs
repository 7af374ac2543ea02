//! Error types for the Workflow Orchestrator MCP server.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Errors from PKCE verification.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PkceError {
    /// Verifier length outside 43..=128 characters
    #[error("code_verifier must be 43-128 characters, got {0}")]
    InvalidVerifier(usize),

    /// Challenge method other than `S256` or `plain`
    #[error("unsupported code_challenge_method: {0}")]
    UnsupportedMethod(String),
}

/// Errors from minting or verifying signed tokens.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Signature valid but `exp` has passed
    #[error("token has expired")]
    Expired,

    /// Not a structurally valid token
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Signature, issuer or audience check failed
    #[error("invalid token signature or claims: {0}")]
    InvalidSignature(String),

    /// Valid token of a different kind than expected
    #[error("token kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        /// Kind the caller required
        expected: &'static str,
        /// Kind embedded in the token
        actual: String,
    },

    /// Encoding failed (key problem)
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl TokenError {
    /// Returns true if the token failed only because it expired.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// Errors from loading signing keys.
#[derive(thiserror::Error, Debug)]
pub enum KeyError {
    /// No usable shared secret
    #[error("JWT shared secret is empty")]
    EmptySecret,
}

/// Errors from the authorization store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Database driver error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Persisted row could not be decoded
    #[error("corrupt row in {table}: {message}")]
    Corrupt {
        /// Table the row came from
        table: &'static str,
        /// What failed to decode
        message: String,
    },
}

impl StoreError {
    /// Create a corrupt-row error.
    #[must_use]
    pub fn corrupt(table: &'static str, message: impl Into<String>) -> Self {
        Self::Corrupt { table, message: message.into() }
    }
}

/// OAuth 2.0 error codes (RFC 6749 §5.2, RFC 8707).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    InvalidToken,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidTarget,
    AccessDenied,
    ServerError,
}

impl OAuthErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidToken => "invalid_token",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidTarget => "invalid_target",
            Self::AccessDenied => "access_denied",
            Self::ServerError => "server_error",
        }
    }
}

/// OAuth error returned to clients as `{"error", "error_description"}`.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{}: {description}", .code.as_str())]
pub struct OAuthError {
    pub code: OAuthErrorCode,
    pub description: String,
    pub status: StatusCode,
}

impl OAuthError {
    fn new(code: OAuthErrorCode, description: impl Into<String>, status: StatusCode) -> Self {
        Self { code, description: description.into(), status }
    }

    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidRequest, description, StatusCode::BAD_REQUEST)
    }

    /// Unknown client; always 401.
    #[must_use]
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidClient, description, StatusCode::UNAUTHORIZED)
    }

    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidGrant, description, StatusCode::BAD_REQUEST)
    }

    #[must_use]
    pub fn unsupported_grant_type() -> Self {
        Self::new(
            OAuthErrorCode::UnsupportedGrantType,
            "Only 'authorization_code' and 'refresh_token' are supported",
            StatusCode::BAD_REQUEST,
        )
    }

    #[must_use]
    pub fn unsupported_response_type() -> Self {
        Self::new(
            OAuthErrorCode::UnsupportedResponseType,
            "Only 'code' is supported",
            StatusCode::BAD_REQUEST,
        )
    }

    #[must_use]
    pub fn invalid_target(resource: &str) -> Self {
        Self::new(
            OAuthErrorCode::InvalidTarget,
            format!("Unknown resource: {resource}"),
            StatusCode::BAD_REQUEST,
        )
    }

    #[must_use]
    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::AccessDenied, description, StatusCode::FORBIDDEN)
    }

    /// Internal failure. The detail is logged here and never sent to the caller.
    #[must_use]
    pub fn server_error(context: &str, err: &dyn std::error::Error) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::new(
            OAuthErrorCode::ServerError,
            "The server encountered an internal error",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }
}

impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        Self::server_error("Authorization store failure", &err)
    }
}

#[derive(Serialize)]
struct OAuthErrorBody<'a> {
    error: &'static str,
    error_description: &'a str,
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let body = OAuthErrorBody { error: self.code.as_str(), error_description: &self.description };
        (self.status, Json(body)).into_response()
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for OAuth protocol operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oauth_error_status() {
        assert_eq!(OAuthError::invalid_client("x").status, StatusCode::UNAUTHORIZED);
        assert_eq!(OAuthError::invalid_grant("x").status, StatusCode::BAD_REQUEST);
        assert_eq!(OAuthError::invalid_target("urn:x").code.as_str(), "invalid_target");
        assert_eq!(OAuthError::access_denied("x").status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_token_error_expired() {
        assert!(TokenError::Expired.is_expired());
        assert!(!TokenError::Malformed("x".into()).is_expired());
    }

    #[tokio::test]
    async fn test_oauth_error_body() {
        let response = OAuthError::invalid_grant("Authorization code already used").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "invalid_grant");
        assert_eq!(json["error_description"], "Authorization code already used");
    }

    #[test]
    fn test_server_error_hides_detail() {
        let err = OAuthError::from(StoreError::corrupt("users", "bad uuid"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.description.contains("uuid"));
    }
}
