//! OAuth 2.0 endpoint handlers.
//!
//! Implements:
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7636: PKCE (S256, plain)
//! - RFC 6749: Authorization Code and Refresh Token grants
//! - RFC 7009: Token Revocation

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{Query, State, rejection::FormRejection, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, Uri, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use url::Url;

use super::login::{self, SESSION_COOKIE};
use super::types::{AuthorizeQuery, LoginForm, RegisterRequest, RevokeRequest, TokenRequest, TokenResponse};
use crate::error::OAuthError;
use crate::server::transport::HttpState;

// ─── RFC 9728: Protected Resource Metadata ───────────────────────────────────

/// `GET /.well-known/oauth-protected-resource`
///
/// Tells clients where to find the authorization server for this resource.
pub async fn handle_protected_resource(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(state.oauth.protected_resource_metadata())
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server` and `/.well-known/openid-configuration`
pub async fn handle_auth_server_metadata(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(state.oauth.authorization_server_metadata())
}

/// `GET /.well-known/jwks.json`
///
/// Only published when tokens are RSA-signed.
pub async fn handle_jwks(State(state): State<Arc<HttpState>>) -> Response {
    match state.oauth.codec().jwks() {
        Some(jwks) => Json(jwks).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "not_found",
                "error_description": "JWKS is only published for RSA signing keys"
            })),
        )
            .into_response(),
    }
}

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────────

/// `POST /register`
pub async fn handle_register(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return OAuthError::invalid_request(rejection.body_text()).into_response(),
    };

    match state.oauth.register(req).await {
        Ok(client) => Json(client).into_response(),
        Err(e) => e.into_response(),
    }
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

/// `GET /authorize`
///
/// Auto-approves for the configured default subject. With demo login
/// configured, a request without a valid session cookie gets the login page
/// instead and resumes here after `POST /login`.
pub async fn handle_authorize(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<AuthorizeQuery>,
    uri: Uri,
    jar: CookieJar,
) -> Response {
    let request = match state.oauth.validate_authorization(&query).await {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let subject = if state.config.login_enabled() {
        let session = jar
            .get(SESSION_COOKIE)
            .and_then(|cookie| state.oauth.login_session_subject(cookie.value()));
        let Some(subject) = session else {
            let return_to = format!("/authorize?{}", uri.query().unwrap_or_default());
            let client_name = request.client.client_name.as_deref().unwrap_or(&request.client.client_id);
            return Html(login::render_login_page(client_name, &return_to, None)).into_response();
        };
        subject
    } else {
        state.config.default_subject.clone()
    };

    match state.oauth.approve(&request, &subject).await {
        Ok(location) => (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /login`
///
/// Checks the demo credentials, sets the `demo_session` cookie and sends the
/// browser back to the original authorize URL.
pub async fn handle_login(
    State(state): State<Arc<HttpState>>,
    jar: CookieJar,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    if !state.config.login_enabled() {
        return OAuthError::access_denied("Interactive login is not enabled").into_response();
    }

    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => return OAuthError::invalid_request(rejection.body_text()).into_response(),
    };

    if !login::is_safe_return_to(&form.return_to) {
        return OAuthError::invalid_request("return_to must be an /authorize URL").into_response();
    }

    if !state.oauth.verify_credentials(&form.username, &form.password) {
        tracing::warn!(username = %form.username, "Failed login attempt");
        let client_name = client_display_name(&state, &form.return_to).await;
        let page = login::render_login_page(
            &client_name,
            &form.return_to,
            Some("Invalid username or password"),
        );
        return (StatusCode::UNAUTHORIZED, Html(page)).into_response();
    }

    let session = match state.oauth.start_login_session(&form.username) {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    let cookie = Cookie::build((SESSION_COOKIE, session.token))
        .http_only(true)
        .secure(state.config.public_base_url.starts_with("https://"))
        .same_site(SameSite::Lax)
        .path("/")
        .build();

    tracing::info!(username = %form.username, "Login succeeded");
    (jar.add(cookie), Redirect::to(&form.return_to)).into_response()
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

/// `POST /token`
///
/// Exchange an authorization code for tokens, or refresh an access token.
pub async fn handle_token(
    State(state): State<Arc<HttpState>>,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => return no_store(OAuthError::invalid_request(rejection.body_text()).into_response()),
    };

    match state.oauth.exchange(&form).await {
        Ok(tokens) => token_success(tokens),
        Err(e) => no_store(e.into_response()),
    }
}

// ─── RFC 7009: Token Revocation ──────────────────────────────────────────────

/// `POST /revoke`
///
/// Always 200 once a token is presented, whether or not it was known.
pub async fn handle_revoke(
    State(state): State<Arc<HttpState>>,
    form: Result<Form<RevokeRequest>, FormRejection>,
) -> Response {
    let Form(form) = match form {
        Ok(form) => form,
        Err(rejection) => return OAuthError::invalid_request(rejection.body_text()).into_response(),
    };

    match state.oauth.revoke(&form).await {
        Ok(()) => Json(serde_json::json!({})).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(tokens: TokenResponse) -> Response {
    no_store(Json(tokens).into_response())
}

fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Client name for the login page, looked up from the `client_id` in `return_to`.
async fn client_display_name(state: &HttpState, return_to: &str) -> String {
    const FALLBACK: &str = "An application";

    let Ok(url) = Url::parse(&state.config.endpoint(return_to)) else {
        return FALLBACK.to_string();
    };
    let Some(client_id) = url.query_pairs().find(|(k, _)| k == "client_id").map(|(_, v)| v.into_owned())
    else {
        return FALLBACK.to_string();
    };

    match state.oauth.store().find_client_by_id(&client_id).await {
        Ok(Some(client)) => client.client_name.unwrap_or(client.client_id),
        _ => FALLBACK.to_string(),
    }
}
