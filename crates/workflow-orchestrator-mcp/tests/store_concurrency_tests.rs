//! Concurrent use of one authorization code against a file-backed database.

mod common;

use std::sync::Arc;

use common::*;
use workflow_orchestrator_mcp::config::Config;
use workflow_orchestrator_mcp::server::oauth::types::{AuthorizeQuery, RegisterRequest, TokenRequest};
use workflow_orchestrator_mcp::server::oauth::{AuthStore, OAuthServer};

async fn file_backed_server(dir: &tempfile::TempDir) -> OAuthServer {
    let mut config = Config::for_testing(BASE_URL);
    config.database_url = format!("sqlite://{}", dir.path().join("auth.db").display());
    let store = AuthStore::connect(&config.database_url).await.unwrap();
    OAuthServer::new(Arc::new(config), store).unwrap()
}

async fn issue_code(server: &OAuthServer) -> (String, String) {
    let client = server
        .register(RegisterRequest {
            client_name: Some("Racer".to_string()),
            redirect_uris: Some(vec![REDIRECT_URI.to_string()]),
            ..RegisterRequest::default()
        })
        .await
        .unwrap();

    let query = AuthorizeQuery {
        response_type: Some("code".to_string()),
        client_id: Some(client.client_id.clone()),
        redirect_uri: Some(REDIRECT_URI.to_string()),
        code_challenge: Some(s256(VERIFIER)),
        ..AuthorizeQuery::default()
    };
    let request = server.validate_authorization(&query).await.unwrap();
    let location = server.approve(&request, "racer").await.unwrap();
    let code = location.query_pairs().find(|(k, _)| k == "code").unwrap().1.into_owned();
    (client.client_id, code)
}

fn token_request(client_id: &str, code: &str) -> TokenRequest {
    TokenRequest {
        grant_type: Some("authorization_code".to_string()),
        code: Some(code.to_string()),
        redirect_uri: Some(REDIRECT_URI.to_string()),
        code_verifier: Some(VERIFIER.to_string()),
        client_id: Some(client_id.to_string()),
        ..TokenRequest::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_exchanges_yield_one_success() {
    let dir = tempfile::tempdir().unwrap();
    let server = file_backed_server(&dir).await;
    let (client_id, code) = issue_code(&server).await;

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let server = server.clone();
            let request = token_request(&client_id, &code);
            tokio::spawn(async move { server.exchange(&request).await })
        })
        .collect();

    let mut successes = 0;
    let mut failures = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => failures.push(e),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].code.as_str(), "invalid_grant");

    let stored = server.store().find_authorization_code_by_value(&code).await.unwrap().unwrap();
    assert!(stored.used);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_exchanges_across_codes() {
    let dir = tempfile::tempdir().unwrap();
    let server = file_backed_server(&dir).await;

    let mut issued = Vec::new();
    for _ in 0..4 {
        issued.push(issue_code(&server).await);
    }

    // Every code raced by three exchanges.
    let mut handles = Vec::new();
    for (client_id, code) in &issued {
        for _ in 0..3 {
            let server = server.clone();
            let request = token_request(client_id, code);
            handles.push(tokio::spawn(async move { server.exchange(&request).await.is_ok() }));
        }
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, issued.len());
}

#[tokio::test]
async fn test_store_survives_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let (client_id, code) = {
        let server = file_backed_server(&dir).await;
        issue_code(&server).await
    };

    let server = file_backed_server(&dir).await;
    assert!(server.store().find_client_by_id(&client_id).await.unwrap().is_some());

    let response = server.exchange(&token_request(&client_id, &code)).await.unwrap();
    assert_eq!(response.token_type, "Bearer");
}
