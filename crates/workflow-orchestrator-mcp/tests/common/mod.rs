//! Shared helpers for the HTTP integration tests.

#![allow(dead_code)]

use std::collections::HashMap;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use workflow_orchestrator_mcp::config::Config;
use workflow_orchestrator_mcp::server::McpServer;
use workflow_orchestrator_mcp::server::oauth::types::AuthorizeQuery;

pub const BASE_URL: &str = "https://tasks.example.com";
pub const REDIRECT_URI: &str = "https://app.example/cb";
/// RFC 7636 Appendix B verifier.
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

pub async fn build_server(config: Config) -> McpServer {
    McpServer::new(config).await.unwrap()
}

pub async fn build_app() -> Router {
    build_server(Config::for_testing(BASE_URL)).await.router()
}

pub fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    app.clone().oneshot(Request::get(uri).body(Body::empty()).unwrap()).await.unwrap()
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn post_form(app: &Router, uri: &str, params: &[(&str, &str)]) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(serde_urlencoded::to_string(params).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn call_mcp(app: &Router, bearer: Option<&str>) -> Response<Body> {
    let mut request = Request::post("/mcp").header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = json!({"jsonrpc": "2.0", "method": "tools/list", "id": 1});
    app.clone().oneshot(request.body(Body::from(body.to_string())).unwrap()).await.unwrap()
}

/// Register a public client with [`REDIRECT_URI`] and return its id.
pub async fn register_client(app: &Router) -> String {
    let response = post_json(
        app,
        "/register",
        json!({ "client_name": "Task Assistant", "redirect_uris": [REDIRECT_URI] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["client_id"].as_str().unwrap().to_string()
}

pub fn authorize_query(client_id: &str, challenge: &str, method: &str) -> AuthorizeQuery {
    AuthorizeQuery {
        response_type: Some("code".to_string()),
        client_id: Some(client_id.to_string()),
        redirect_uri: Some(REDIRECT_URI.to_string()),
        scope: Some("tasks.read".to_string()),
        state: Some("xyz 123/+=".to_string()),
        code_challenge: Some(challenge.to_string()),
        code_challenge_method: Some(method.to_string()),
        resource: None,
    }
}

pub fn authorize_uri(query: &AuthorizeQuery) -> String {
    format!("/authorize?{}", serde_urlencoded::to_string(query).unwrap())
}

pub fn redirect_params(response: &Response<Body>) -> HashMap<String, String> {
    let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
    let url = url::Url::parse(location).unwrap();
    url.query_pairs().into_owned().collect()
}

/// Run `/authorize` with an S256 challenge for [`VERIFIER`] and return the code.
pub async fn authorize(app: &Router, client_id: &str) -> String {
    let response = get(app, &authorize_uri(&authorize_query(client_id, &s256(VERIFIER), "S256"))).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    redirect_params(&response).remove("code").unwrap()
}

pub async fn exchange_code(app: &Router, client_id: &str, code: &str, verifier: &str) -> Response<Body> {
    post_form(
        app,
        "/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", verifier),
            ("client_id", client_id),
        ],
    )
    .await
}

/// Register, authorize and exchange; returns the token response JSON.
pub async fn obtain_tokens(app: &Router) -> serde_json::Value {
    let client_id = register_client(app).await;
    let code = authorize(app, &client_id).await;
    let response = exchange_code(app, &client_id, &code, VERIFIER).await;
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}
