//! Integration tests for the Portal Client against a mock HTTP server.
//!
//! Covers: token fetch and reuse, single-refresh on 401, and `Retry-After`
//! cooperation on 429.

use std::time::Duration;

use ocean_resync_engine::domain::ports::{PortalClient, UserAgentLabel};
use ocean_resync_engine::infrastructure::portal::client::{PortalClientConfig, ReqwestPortalClient};
use mockito::Server;

fn label() -> UserAgentLabel {
    UserAgentLabel {
        integration_type: "github".to_string(),
        integration_identifier: "github-prod".to_string(),
        version: "1.0.0".to_string(),
        feature: "issues".to_string(),
    }
}

fn client_for(server: &Server) -> ReqwestPortalClient {
    ReqwestPortalClient::new(PortalClientConfig {
        base_url: server.url(),
        client_id: "id".to_string(),
        client_secret: "secret".to_string(),
        timeout: Duration::from_secs(5),
    })
    .expect("client construction")
}

fn token_body() -> String {
    serde_json::json!({"accessToken": "tok-1", "expiresIn": 3600}).to_string()
}

#[tokio::test]
async fn fetches_a_token_then_reuses_it_for_a_second_call() {
    let mut server = Server::new_async().await;
    let token_mock = server
        .mock("POST", "/auth/access_token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body())
        .expect(1)
        .create_async()
        .await;
    let integration_mock = server
        .mock("GET", "/integrations/github-prod")
        .match_header("authorization", "Bearer tok-1")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .expect(2)
        .create_async()
        .await;

    let client = client_for(&server);
    client.get_integration(&label()).await.expect("first call");
    client.get_integration(&label()).await.expect("second call");

    token_mock.assert_async().await;
    integration_mock.assert_async().await;
}

#[tokio::test]
async fn refreshes_the_token_exactly_once_on_a_401() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/auth/access_token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body_from_request(|_| {
            serde_json::json!({"accessToken": "tok-new", "expiresIn": 3600}).to_string().into_bytes()
        })
        .expect(2)
        .create_async()
        .await;
    server
        .mock("GET", "/integrations/github-prod")
        .match_header("authorization", "Bearer tok-new")
        .with_status(401)
        .expect_at_least(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let result = client.get_integration(&label()).await;
    assert!(result.is_err(), "repeated 401 must surface as an auth error, not loop forever");
}

#[tokio::test]
async fn honors_retry_after_on_rate_limit_then_succeeds() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/auth/access_token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(token_body())
        .create_async()
        .await;
    let rate_limited = server
        .mock("GET", "/integrations/github-prod")
        .with_status(429)
        .with_header("retry-after", "0")
        .expect(1)
        .create_async()
        .await;
    let succeeds = server
        .mock("GET", "/integrations/github-prod")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body("{}")
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    client.get_integration(&label()).await.expect("succeeds after honoring Retry-After");

    rate_limited.assert_async().await;
    succeeds.assert_async().await;
}
