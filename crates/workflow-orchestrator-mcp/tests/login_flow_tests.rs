//! Interactive login step in front of `/authorize`.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use common::*;
use workflow_orchestrator_mcp::config::{Config, DemoLogin};

async fn build_login_app() -> Router {
    let mut config = Config::for_testing(BASE_URL);
    config.demo_login = Some(DemoLogin { username: "demo".to_string(), password: "hunter2".to_string() });
    build_server(config).await.router()
}

async fn login(app: &Router, username: &str, password: &str, return_to: &str) -> axum::http::Response<Body> {
    post_form(app, "/login", &[("username", username), ("password", password), ("return_to", return_to)]).await
}

fn session_cookie(response: &axum::http::Response<Body>) -> String {
    let set_cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

#[tokio::test]
async fn test_authorize_without_session_shows_login_page() {
    let app = build_login_app().await;
    let client_id = register_client(&app).await;
    let uri = authorize_uri(&authorize_query(&client_id, &s256(VERIFIER), "S256"));

    let response = get(&app, &uri).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::LOCATION).is_none());

    let html = body_text(response).await;
    assert!(html.contains(r#"action="/login""#));
    assert!(html.contains("Task Assistant"));
    assert!(html.contains(r#"name="return_to" value="/authorize?"#));
}

#[tokio::test]
async fn test_invalid_authorize_request_fails_before_login() {
    let app = build_login_app().await;

    let response = get(&app, &authorize_uri(&authorize_query("client_unknown", &s256(VERIFIER), "S256"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_login_then_authorize_issues_code() {
    let app = build_login_app().await;
    let client_id = register_client(&app).await;
    let return_to = authorize_uri(&authorize_query(&client_id, &s256(VERIFIER), "S256"));

    let response = login(&app, "demo", "hunter2", &return_to).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers().get(header::LOCATION).unwrap(), return_to.as_str());

    let set_cookie = response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("demo_session="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Secure"));
    let cookie = session_cookie(&response);

    let response = app
        .clone()
        .oneshot(Request::get(&return_to).header(header::COOKIE, &cookie).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    let code = redirect_params(&response).remove("code").unwrap();

    let response = exchange_code(&app, &client_id, &code, VERIFIER).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_wrong_password_rerenders_page() {
    let app = build_login_app().await;
    let client_id = register_client(&app).await;
    let return_to = authorize_uri(&authorize_query(&client_id, &s256(VERIFIER), "S256"));

    let response = login(&app, "demo", "wrong", &return_to).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());

    let html = body_text(response).await;
    assert!(html.contains("Invalid username or password"));
    assert!(html.contains("Task Assistant"));
}

#[tokio::test]
async fn test_login_rejects_offsite_return_to() {
    let app = build_login_app().await;

    let response = login(&app, "demo", "hunter2", "https://evil.example/authorize?x=1").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_forged_session_cookie_is_ignored() {
    let app = build_login_app().await;
    let client_id = register_client(&app).await;
    let uri = authorize_uri(&authorize_query(&client_id, &s256(VERIFIER), "S256"));

    let response = app
        .clone()
        .oneshot(
            Request::get(&uri)
                .header(header::COOKIE, "demo_session=forged.session.value")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains(r#"action="/login""#));
}

#[tokio::test]
async fn test_login_disabled_by_default() {
    let app = build_app().await;

    let response = login(&app, "demo", "hunter2", "/authorize?client_id=x").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(body_json(response).await["error"], "access_denied");
}
