//! OAuth 2.0 entities and wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pkce::PkceMethod;
use super::token::MintedToken;

// ─── Persisted entities ──────────────────────────────────────────────────────

/// A dynamically registered OAuth client.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_name: Option<String>,
    pub client_uri: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub scope: String,
    /// Always `none`: clients are public and rely on PKCE.
    pub token_endpoint_auth_method: String,
    pub created_at: DateTime<Utc>,
}

impl OAuthClient {
    /// Exact-match check against the registered redirect URIs.
    #[must_use]
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }
}

/// Metadata for a client about to be registered.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub client_name: Option<String>,
    pub client_uri: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub scope: String,
}

/// A resource owner, provisioned on first authorization.
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    /// External subject identifier.
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A single-use code binding user, client, redirect and scope to a PKCE challenge.
#[derive(Debug, Clone)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: String,
    pub code_challenge_method: PkceMethod,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl AuthorizationCode {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Input for a new authorization code.
#[derive(Debug, Clone)]
pub struct NewAuthorizationCode {
    pub client_id: String,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: String,
    pub code_challenge_method: PkceMethod,
    pub expires_at: DateTime<Utc>,
}

/// An issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub id: Uuid,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub access_token_hash: String,
    pub refresh_token_hash: Option<String>,
    pub token_type: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub scope: String,
    pub access_token_expires_at: DateTime<Utc>,
    /// `None` is treated as already expired.
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

impl TokenRecord {
    #[must_use]
    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_token_expires_at
    }

    #[must_use]
    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token_expires_at.is_none_or(|exp| now >= exp)
    }
}

/// Freshly minted tokens to persist together.
#[derive(Debug, Clone)]
pub struct NewTokenPair {
    pub access: MintedToken,
    pub refresh: MintedToken,
    pub client_id: String,
    pub user_id: Uuid,
    pub scope: String,
}

// ─── Wire types ──────────────────────────────────────────────────────────────

/// `GET /authorize` query parameters.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthorizeQuery {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub resource: Option<String>,
}

/// `POST /token` form body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub refresh_token: Option<String>,
    pub resource: Option<String>,
}

/// Successful `/token` response (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
    pub scope: String,
}

/// `POST /revoke` form body (RFC 7009).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevokeRequest {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
}

/// `POST /register` JSON body (RFC 7591).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterRequest {
    pub client_name: Option<String>,
    pub client_uri: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    pub scope: Option<String>,
    /// Accepted and ignored; registration always yields `none`.
    pub token_endpoint_auth_method: Option<String>,
}

/// `POST /register` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    pub client_id_issued_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub scope: String,
    pub token_endpoint_auth_method: String,
}

impl From<OAuthClient> for ClientRegistrationResponse {
    fn from(client: OAuthClient) -> Self {
        Self {
            client_id: client.client_id,
            client_id_issued_at: client.created_at.timestamp(),
            client_name: client.client_name,
            client_uri: client.client_uri,
            redirect_uris: client.redirect_uris,
            grant_types: client.grant_types,
            response_types: client.response_types,
            scope: client.scope,
            token_endpoint_auth_method: client.token_endpoint_auth_method,
        }
    }
}

/// `POST /login` form body.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub return_to: String,
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn record(refresh_expiry: Option<DateTime<Utc>>) -> TokenRecord {
        let now = Utc::now();
        TokenRecord {
            id: Uuid::new_v4(),
            access_token: "a".into(),
            refresh_token: Some("r".into()),
            access_token_hash: "ha".into(),
            refresh_token_hash: Some("hr".into()),
            token_type: "Bearer".into(),
            client_id: "client_x".into(),
            user_id: Uuid::new_v4(),
            scope: "tasks.read".into(),
            access_token_expires_at: now + Duration::hours(1),
            refresh_token_expires_at: refresh_expiry,
            revoked: false,
            created_at: now,
        }
    }

    #[test]
    fn test_missing_refresh_expiry_is_expired() {
        assert!(record(None).is_refresh_expired(Utc::now()));
        assert!(!record(Some(Utc::now() + Duration::days(1))).is_refresh_expired(Utc::now()));
    }

    #[test]
    fn test_access_expiry_boundary() {
        let rec = record(None);
        assert!(!rec.is_access_expired(rec.created_at));
        assert!(rec.is_access_expired(rec.access_token_expires_at));
    }

    #[test]
    fn test_register_request_defaults() {
        let req: RegisterRequest =
            serde_json::from_str(r#"{"redirect_uris":["https://app.example/cb"]}"#).unwrap();
        assert!(req.grant_types.is_empty());
        assert_eq!(req.redirect_uris.unwrap(), vec!["https://app.example/cb"]);
    }
}
