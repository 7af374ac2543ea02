//! Authorization flow controller.
//!
//! Composes the PKCE verifier, token codec and store into the `/authorize`,
//! `/token`, `/revoke` and `/register` protocol steps. Handlers stay thin:
//! they extract parameters, call in here and render the result.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use url::Url;

use super::pkce::{self, PkceMethod};
use super::store::{AuthStore, CodeExchange};
use super::token::{MintRequest, MintedToken, TokenCodec, TokenKind};
use super::token_hash::hash_token;
use super::types::{
    AuthorizationCode, AuthorizeQuery, ClientRegistrationResponse, NewAuthorizationCode, NewClient,
    NewTokenPair, OAuthClient, RegisterRequest, RevokeRequest, TokenRequest, TokenResponse,
};
use crate::config::{Config, oauth};
use crate::error::{KeyError, OAuthError, OAuthResult};

const GRANT_TYPES: &[&str] = &["authorization_code", "refresh_token"];
const RESPONSE_TYPES: &[&str] = &["code"];
const CHALLENGE_METHODS: &[&str] = &["S256", "plain"];

/// A validated `/authorize` request, ready to be approved.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub client: OAuthClient,
    pub redirect_uri: String,
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: String,
    pub code_challenge_method: PkceMethod,
}

/// The embedded OAuth 2.0 authorization server.
#[derive(Debug, Clone)]
pub struct OAuthServer {
    config: Arc<Config>,
    codec: TokenCodec,
    store: AuthStore,
}

impl OAuthServer {
    pub fn new(config: Arc<Config>, store: AuthStore) -> Result<Self, KeyError> {
        let codec = TokenCodec::new(&config)?;
        Ok(Self { config, codec, store })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[must_use]
    pub const fn store(&self) -> &AuthStore {
        &self.store
    }

    // ─── Metadata ────────────────────────────────────────────────────────────

    /// RFC 8414 authorization server metadata.
    #[must_use]
    pub fn authorization_server_metadata(&self) -> serde_json::Value {
        let config = &self.config;
        let mut doc = serde_json::json!({
            "issuer": config.issuer(),
            "authorization_endpoint": config.endpoint("/authorize"),
            "token_endpoint": config.endpoint("/token"),
            "registration_endpoint": config.endpoint("/register"),
            "revocation_endpoint": config.endpoint("/revoke"),
            "response_types_supported": RESPONSE_TYPES,
            "grant_types_supported": GRANT_TYPES,
            "token_endpoint_auth_methods_supported": ["none"],
            "code_challenge_methods_supported": CHALLENGE_METHODS,
            "scopes_supported": oauth::SCOPES_SUPPORTED,
        });

        if self.codec.is_asymmetric() {
            if let Some(obj) = doc.as_object_mut() {
                obj.insert(
                    "jwks_uri".to_string(),
                    serde_json::Value::String(config.endpoint("/.well-known/jwks.json")),
                );
            }
        }
        doc
    }

    /// RFC 9728 protected resource metadata.
    #[must_use]
    pub fn protected_resource_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "resource": self.config.resource(),
            "authorization_servers": [self.config.issuer()],
            "bearer_methods_supported": ["header"],
            "scopes_supported": oauth::SCOPES_SUPPORTED,
        })
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Dynamic client registration (RFC 7591).
    ///
    /// Open: no initial access token is required. Every client is public and
    /// gets `token_endpoint_auth_method = none`.
    pub async fn register(&self, req: RegisterRequest) -> OAuthResult<ClientRegistrationResponse> {
        let redirect_uris = req.redirect_uris.unwrap_or_default();
        if redirect_uris.is_empty() {
            return Err(OAuthError::invalid_request("redirect_uris is required"));
        }
        if let Some(bad) = redirect_uris.iter().find(|uri| Url::parse(uri).is_err()) {
            return Err(OAuthError::invalid_request(format!("Invalid redirect_uri: {bad}")));
        }

        let client = self
            .store
            .create_client(NewClient {
                client_name: req.client_name,
                client_uri: req.client_uri,
                redirect_uris,
                grant_types: or_default_list(req.grant_types, GRANT_TYPES),
                response_types: or_default_list(req.response_types, RESPONSE_TYPES),
                scope: req.scope.unwrap_or_else(|| oauth::DEFAULT_SCOPE.to_string()),
            })
            .await?;

        tracing::info!(client_id = %client.client_id, "Registered OAuth client");
        Ok(client.into())
    }

    // ─── Authorization ───────────────────────────────────────────────────────

    /// Validate an `/authorize` request.
    ///
    /// Checks run in order: response type, required parameters, challenge
    /// method, resource indicator, client, redirect URI.
    pub async fn validate_authorization(
        &self,
        query: &AuthorizeQuery,
    ) -> OAuthResult<AuthorizationRequest> {
        match query.response_type.as_deref() {
            Some("code") => {}
            Some(_) => return Err(OAuthError::unsupported_response_type()),
            None => return Err(OAuthError::invalid_request("Missing response_type")),
        }

        let Some(client_id) = query.client_id.as_deref() else {
            return Err(OAuthError::invalid_request("Missing client_id"));
        };
        let Some(redirect_uri) = query.redirect_uri.as_deref() else {
            return Err(OAuthError::invalid_request("Missing redirect_uri"));
        };
        let Some(code_challenge) = query.code_challenge.as_deref() else {
            return Err(OAuthError::invalid_request("Missing code_challenge"));
        };

        let method = query.code_challenge_method.as_deref().unwrap_or("S256");
        let Ok(code_challenge_method) = method.parse::<PkceMethod>() else {
            return Err(OAuthError::invalid_request("code_challenge_method must be S256 or plain"));
        };

        self.check_resource(query.resource.as_deref())?;

        let Some(client) = self.store.find_client_by_id(client_id).await? else {
            tracing::warn!(client_id = %client_id, "Authorization for unknown client");
            return Err(OAuthError::invalid_client("Unknown client_id"));
        };

        if !client.allows_redirect(redirect_uri) {
            tracing::warn!(client_id = %client_id, redirect_uri = %redirect_uri, "Unregistered redirect_uri");
            return Err(OAuthError::invalid_request("Invalid redirect_uri"));
        }

        Ok(AuthorizationRequest {
            client,
            redirect_uri: redirect_uri.to_string(),
            scope: query.scope.clone().unwrap_or_else(|| oauth::DEFAULT_SCOPE.to_string()),
            state: query.state.clone(),
            code_challenge: code_challenge.to_string(),
            code_challenge_method,
        })
    }

    /// Approve a validated request on behalf of `subject`.
    ///
    /// Provisions the user if needed, issues a code and returns the redirect
    /// URL carrying `code` and the caller's `state`.
    pub async fn approve(&self, request: &AuthorizationRequest, subject: &str) -> OAuthResult<Url> {
        let user = self.store.find_or_create_user_by_subject(subject).await?;
        let expires_at = expiry_after(self.config.auth_code_ttl);

        let code = self
            .store
            .create_authorization_code(NewAuthorizationCode {
                client_id: request.client.client_id.clone(),
                user_id: user.id,
                redirect_uri: request.redirect_uri.clone(),
                scope: request.scope.clone(),
                code_challenge: request.code_challenge.clone(),
                code_challenge_method: request.code_challenge_method,
                expires_at,
            })
            .await?;

        let mut location = Url::parse(&request.redirect_uri)
            .map_err(|e| OAuthError::server_error("Registered redirect_uri does not parse", &e))?;
        {
            let mut pairs = location.query_pairs_mut();
            pairs.append_pair("code", &code.code);
            if let Some(state) = &request.state {
                pairs.append_pair("state", state);
            }
        }

        tracing::info!(
            client_id = %request.client.client_id,
            user_id = %user.id,
            method = %request.code_challenge_method,
            "Issued authorization code"
        );
        Ok(location)
    }

    // ─── Token endpoint ──────────────────────────────────────────────────────

    /// Handle a `/token` request for either supported grant.
    pub async fn exchange(&self, req: &TokenRequest) -> OAuthResult<TokenResponse> {
        match req.grant_type.as_deref() {
            Some("authorization_code") => self.exchange_authorization_code(req).await,
            Some("refresh_token") => self.exchange_refresh_token(req).await,
            Some(_) => Err(OAuthError::unsupported_grant_type()),
            None => Err(OAuthError::invalid_request("Missing grant_type")),
        }
    }

    async fn exchange_authorization_code(&self, req: &TokenRequest) -> OAuthResult<TokenResponse> {
        let (Some(code), Some(redirect_uri), Some(code_verifier)) =
            (req.code.as_deref(), req.redirect_uri.as_deref(), req.code_verifier.as_deref())
        else {
            return Err(OAuthError::invalid_request(
                "code, redirect_uri, and code_verifier are required for authorization_code grant",
            ));
        };

        self.check_resource(req.resource.as_deref())?;
        // Resolved before the exchange opens; the exchange pins a connection.
        let client = self.resolve_client(req.client_id.as_deref()).await?;

        let exchange = self.store.begin_code_exchange(code).await?;
        let checked = check_exchange(&exchange, client.as_ref(), redirect_uri, code_verifier).cloned();

        let granted = match checked {
            Ok(granted) => granted,
            Err(err) => {
                abandon(exchange).await;
                return Err(err);
            }
        };

        let pair = match self.mint_pair(&granted) {
            Ok(pair) => pair,
            Err(err) => {
                abandon(exchange).await;
                return Err(err);
            }
        };

        exchange.complete(&pair).await?;

        tracing::info!(
            client_id = %granted.client_id,
            user_id = %granted.user_id,
            "Exchanged authorization code for tokens"
        );

        Ok(self.token_response(pair.access.token, pair.refresh.token, granted.scope))
    }

    async fn exchange_refresh_token(&self, req: &TokenRequest) -> OAuthResult<TokenResponse> {
        let Some(refresh_token) = req.refresh_token.as_deref() else {
            return Err(OAuthError::invalid_request("refresh_token is required"));
        };

        self.check_resource(req.resource.as_deref())?;
        let client = self.resolve_client(req.client_id.as_deref()).await?;

        if let Err(e) = self.codec.verify(refresh_token, TokenKind::RefreshToken) {
            tracing::warn!(error = %e, "Refresh token failed verification");
            return Err(OAuthError::invalid_grant("Invalid refresh token"));
        }

        let record = match self.store.find_token_by_refresh_hash(&hash_token(refresh_token)).await? {
            Some(record) if !record.revoked => record,
            _ => return Err(OAuthError::invalid_grant("Token revoked or not found")),
        };

        if client.as_ref().is_some_and(|c| c.client_id != record.client_id) {
            return Err(OAuthError::invalid_grant("client_id mismatch"));
        }

        if record.is_refresh_expired(Utc::now()) {
            return Err(OAuthError::invalid_grant("Refresh token expired"));
        }

        let access = self.mint(
            &record.user_id.to_string(),
            &record.client_id,
            &record.scope,
            TokenKind::AccessToken,
        )?;

        let rotated = self
            .store
            .rotate_access_token(record.id, &access.token, &hash_token(&access.token), access.expires_at)
            .await?;
        if !rotated {
            // Revoked between lookup and update
            return Err(OAuthError::invalid_grant("Token revoked or not found"));
        }

        tracing::info!(client_id = %record.client_id, user_id = %record.user_id, "Refreshed access token");

        // Refresh tokens are not rotated; the same one stays valid until it expires or is revoked.
        Ok(self.token_response(access.token, refresh_token.to_string(), record.scope))
    }

    // ─── Revocation ──────────────────────────────────────────────────────────

    /// Revoke the pair containing `token` (RFC 7009).
    ///
    /// Unknown tokens are not an error.
    pub async fn revoke(&self, req: &RevokeRequest) -> OAuthResult<()> {
        let Some(token) = req.token.as_deref().filter(|t| !t.is_empty()) else {
            return Err(OAuthError::invalid_request("token is required"));
        };

        if let Some(record) = self.store.find_token_by_either_hash(&hash_token(token)).await? {
            self.store.revoke_token(record.id).await?;
            tracing::info!(
                client_id = %record.client_id,
                user_id = %record.user_id,
                hint = ?req.token_type_hint,
                "Revoked token pair"
            );
        } else {
            tracing::debug!("Revocation requested for unknown token");
        }
        Ok(())
    }

    // ─── Interactive login ───────────────────────────────────────────────────

    /// Check demo login credentials in constant time.
    #[must_use]
    pub fn verify_credentials(&self, username: &str, password: &str) -> bool {
        let Some(login) = &self.config.demo_login else {
            return false;
        };
        let user_ok = username.as_bytes().ct_eq(login.username.as_bytes());
        let pass_ok = password.as_bytes().ct_eq(login.password.as_bytes());
        (user_ok & pass_ok).into()
    }

    /// Mint the `demo_session` cookie value for a logged-in subject.
    pub fn start_login_session(&self, subject: &str) -> OAuthResult<MintedToken> {
        self.codec
            .mint(MintRequest {
                subject,
                client_id: "",
                scope: "",
                kind: TokenKind::DemoSession,
                ttl: oauth::LOGIN_SESSION_TTL,
            })
            .map_err(|e| OAuthError::server_error("Failed to mint login session", &e))
    }

    /// Subject of a valid `demo_session` token.
    #[must_use]
    pub fn login_session_subject(&self, token: &str) -> Option<String> {
        match self.codec.verify(token, TokenKind::DemoSession) {
            Ok(claims) => Some(claims.sub),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring invalid login session");
                None
            }
        }
    }

    // ─── Helpers ─────────────────────────────────────────────────────────────

    fn check_resource(&self, resource: Option<&str>) -> OAuthResult<()> {
        match resource {
            Some(resource) if resource != self.config.resource() => {
                Err(OAuthError::invalid_target(resource))
            }
            _ => Ok(()),
        }
    }

    async fn resolve_client(&self, client_id: Option<&str>) -> OAuthResult<Option<OAuthClient>> {
        let Some(client_id) = client_id.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        match self.store.find_client_by_id(client_id).await? {
            Some(client) => Ok(Some(client)),
            None => Err(OAuthError::invalid_client("Unknown client_id")),
        }
    }

    fn mint(&self, subject: &str, client_id: &str, scope: &str, kind: TokenKind) -> OAuthResult<MintedToken> {
        let ttl = match kind {
            TokenKind::RefreshToken => self.config.refresh_token_ttl,
            TokenKind::DemoSession => oauth::LOGIN_SESSION_TTL,
            TokenKind::AccessToken => self.config.access_token_ttl,
        };
        self.codec
            .mint(MintRequest { subject, client_id, scope, kind, ttl })
            .map_err(|e| OAuthError::server_error("Failed to mint token", &e))
    }

    fn mint_pair(&self, code: &AuthorizationCode) -> OAuthResult<NewTokenPair> {
        let subject = code.user_id.to_string();
        Ok(NewTokenPair {
            access: self.mint(&subject, &code.client_id, &code.scope, TokenKind::AccessToken)?,
            refresh: self.mint(&subject, &code.client_id, &code.scope, TokenKind::RefreshToken)?,
            client_id: code.client_id.clone(),
            user_id: code.user_id,
            scope: code.scope.clone(),
        })
    }

    fn token_response(&self, access_token: String, refresh_token: String, scope: String) -> TokenResponse {
        TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_ttl.as_secs(),
            refresh_token,
            scope,
        }
    }
}

/// Run the exchange checks in order. The first failure decides the reason.
fn check_exchange<'a>(
    exchange: &'a CodeExchange,
    client: Option<&OAuthClient>,
    redirect_uri: &str,
    code_verifier: &str,
) -> OAuthResult<&'a AuthorizationCode> {
    let Some(code) = exchange.code() else {
        return Err(OAuthError::invalid_grant("Invalid authorization code"));
    };

    if !exchange.claimed() {
        tracing::warn!(client_id = %code.client_id, "Authorization code already used");
        return Err(OAuthError::invalid_grant("Authorization code already used"));
    }

    if code.is_expired(Utc::now()) {
        tracing::warn!(client_id = %code.client_id, "Authorization code expired");
        return Err(OAuthError::invalid_grant("Authorization code expired"));
    }

    if client.is_some_and(|c| c.client_id != code.client_id) {
        tracing::warn!(client_id = %code.client_id, "Code presented by a different client");
        return Err(OAuthError::invalid_grant("client_id mismatch"));
    }

    if code.redirect_uri != redirect_uri {
        tracing::warn!(client_id = %code.client_id, "redirect_uri mismatch");
        return Err(OAuthError::invalid_grant("redirect_uri mismatch"));
    }

    if !pkce::verify(code_verifier, &code.code_challenge, code.code_challenge_method) {
        tracing::warn!(client_id = %code.client_id, "PKCE verification failed");
        return Err(OAuthError::invalid_grant("Invalid code_verifier"));
    }

    Ok(code)
}

async fn abandon(exchange: CodeExchange) {
    if let Err(e) = exchange.abandon().await {
        tracing::error!(error = %e, "Failed to roll back code exchange");
    }
}

fn or_default_list(values: Vec<String>, defaults: &[&str]) -> Vec<String> {
    if values.is_empty() {
        defaults.iter().map(|v| (*v).to_string()).collect()
    } else {
        values
    }
}

fn expiry_after(ttl: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DemoLogin;

    async fn server() -> OAuthServer {
        let config = Arc::new(Config::for_testing("https://tasks.example"));
        let store = AuthStore::connect(&config.database_url).await.unwrap();
        OAuthServer::new(config, store).unwrap()
    }

    fn register_request() -> RegisterRequest {
        RegisterRequest {
            client_name: Some("ChatGPT".into()),
            redirect_uris: Some(vec!["https://app.example/cb".into()]),
            ..RegisterRequest::default()
        }
    }

    #[tokio::test]
    async fn test_register_applies_defaults() {
        let server = server().await;
        let client = server.register(register_request()).await.unwrap();
        assert!(client.client_id.starts_with("client_"));
        assert_eq!(client.grant_types, GRANT_TYPES);
        assert_eq!(client.response_types, RESPONSE_TYPES);
        assert_eq!(client.scope, oauth::DEFAULT_SCOPE);
        assert_eq!(client.token_endpoint_auth_method, "none");
    }

    #[tokio::test]
    async fn test_register_requires_redirect_uris() {
        let server = server().await;
        let err = server.register(RegisterRequest::default()).await.unwrap_err();
        assert_eq!(err.code.as_str(), "invalid_request");

        let mut req = register_request();
        req.redirect_uris = Some(vec!["not a url".into()]);
        assert_eq!(server.register(req).await.unwrap_err().code.as_str(), "invalid_request");
    }

    #[tokio::test]
    async fn test_validate_authorization_order() {
        let server = server().await;
        let client = server.register(register_request()).await.unwrap();

        let base = AuthorizeQuery {
            response_type: Some("code".into()),
            client_id: Some(client.client_id.clone()),
            redirect_uri: Some("https://app.example/cb".into()),
            code_challenge: Some("challenge".into()),
            ..AuthorizeQuery::default()
        };

        let ok = server.validate_authorization(&base).await.unwrap();
        assert_eq!(ok.code_challenge_method, PkceMethod::S256);
        assert_eq!(ok.scope, oauth::DEFAULT_SCOPE);

        let token = AuthorizeQuery { response_type: Some("token".into()), ..base.clone() };
        assert_eq!(
            server.validate_authorization(&token).await.unwrap_err().code.as_str(),
            "unsupported_response_type"
        );

        let method = AuthorizeQuery { code_challenge_method: Some("S512".into()), ..base.clone() };
        assert_eq!(server.validate_authorization(&method).await.unwrap_err().code.as_str(), "invalid_request");

        let resource = AuthorizeQuery { resource: Some("https://other.example/mcp".into()), ..base.clone() };
        assert_eq!(server.validate_authorization(&resource).await.unwrap_err().code.as_str(), "invalid_target");

        let unknown = AuthorizeQuery { client_id: Some("client_nope".into()), ..base.clone() };
        let err = server.validate_authorization(&unknown).await.unwrap_err();
        assert_eq!(err.code.as_str(), "invalid_client");
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);

        let redirect = AuthorizeQuery { redirect_uri: Some("https://evil.example/cb".into()), ..base };
        let err = server.validate_authorization(&redirect).await.unwrap_err();
        assert_eq!(err.code.as_str(), "invalid_request");
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_approve_preserves_state() {
        let server = server().await;
        let client = server.register(register_request()).await.unwrap();
        let request = server
            .validate_authorization(&AuthorizeQuery {
                response_type: Some("code".into()),
                client_id: Some(client.client_id),
                redirect_uri: Some("https://app.example/cb".into()),
                code_challenge: Some("challenge".into()),
                state: Some("xyz &=?".into()),
                ..AuthorizeQuery::default()
            })
            .await
            .unwrap();

        let location = server.approve(&request, "alice").await.unwrap();
        let pairs: std::collections::HashMap<_, _> = location.query_pairs().into_owned().collect();
        assert_eq!(pairs["state"], "xyz &=?");
        assert!(pairs["code"].len() >= 43);
        assert_eq!(location.host_str(), Some("app.example"));
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let server = server().await;
        let req = TokenRequest { grant_type: Some("password".into()), ..TokenRequest::default() };
        assert_eq!(server.exchange(&req).await.unwrap_err().code.as_str(), "unsupported_grant_type");
    }

    #[tokio::test]
    async fn test_revoke_requires_token() {
        let server = server().await;
        assert!(server.revoke(&RevokeRequest::default()).await.is_err());
        let unknown = RevokeRequest { token: Some("nope".into()), token_type_hint: None };
        assert!(server.revoke(&unknown).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_session_round_trip() {
        let mut config = Config::for_testing("https://tasks.example");
        config.demo_login = Some(DemoLogin { username: "demo".into(), password: "pw".into() });
        let config = Arc::new(config);
        let store = AuthStore::connect(&config.database_url).await.unwrap();
        let server = OAuthServer::new(config, store).unwrap();

        assert!(server.verify_credentials("demo", "pw"));
        assert!(!server.verify_credentials("demo", "wrong"));
        assert!(!server.verify_credentials("other", "pw"));

        let session = server.start_login_session("demo").unwrap();
        assert_eq!(server.login_session_subject(&session.token).as_deref(), Some("demo"));
        // A session token is never an access token
        assert!(server.codec().verify(&session.token, TokenKind::AccessToken).is_err());
    }

    #[tokio::test]
    async fn test_metadata_documents() {
        let server = server().await;
        let meta = server.authorization_server_metadata();
        assert_eq!(meta["issuer"], "https://tasks.example");
        assert_eq!(meta["revocation_endpoint"], "https://tasks.example/revoke");
        assert!(meta.get("jwks_uri").is_none());

        let resource = server.protected_resource_metadata();
        assert_eq!(resource["resource"], "https://tasks.example/mcp");
        assert_eq!(resource["authorization_servers"][0], "https://tasks.example");
    }
}
