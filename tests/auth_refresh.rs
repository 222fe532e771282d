//! Integration tests for the bearer-auth refresh-and-retry protocol,
//! exercised against a mock portal backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use wiremock::matchers::{bearer_token, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chorister::{ApiClient, ApiError, Config, Credential, MemoryTokenStore, TokenStore};

const REFRESH_PATH: &str = "/api/auth/refresh";

#[derive(Debug, Deserialize)]
struct Member {
    name: String,
}

fn config_for(server: &MockServer) -> Config {
    Config {
        base_url: server.uri(),
        ..Config::default()
    }
}

fn client_for(server: &MockServer, store: Arc<MemoryTokenStore>) -> ApiClient {
    ApiClient::new(&config_for(server), store).expect("failed to build client")
}

async fn mount_refresh(server: &MockServer, template: ResponseTemplate, expected: u64) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(template)
        .expect(expected)
        .mount(server)
        .await;
}

#[tokio::test]
async fn attaches_current_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/members"))
        .and(bearer_token("current-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "Anna"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    store.set(Credential::new("current-token"));
    let client = client_for(&server, store);

    let member: Member = client.get("/api/members").await.expect("request failed");
    assert_eq!(member.name, "Anna");
}

#[tokio::test]
async fn expired_token_is_refreshed_and_request_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/members"))
        .and(bearer_token("stale-token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/members"))
        .and(bearer_token("fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "name": "Bruno"
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "fresh-token"
        })),
        1,
    )
    .await;

    let store = Arc::new(MemoryTokenStore::new());
    store.set(Credential::new("stale-token"));
    let client = client_for(&server, store.clone());

    let member: Member = client.get("/api/members").await.expect("retry should succeed");
    assert_eq!(member.name, "Bruno");

    // The store now holds the refreshed token for all future requests.
    assert_eq!(store.get().unwrap().access_token, "fresh-token");
}

#[tokio::test]
async fn failed_refresh_clears_session_and_fires_redirect_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/members"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(401), 1).await;

    let store = Arc::new(MemoryTokenStore::new());
    store.set(Credential::new("stale-token"));

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let client = client_for(&server, store.clone()).with_auth_failure_handler(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let result: Result<Member, ApiError> = client.get("/api/members").await;
    let err = result.expect_err("refresh failure must propagate");

    assert!(err.is_auth());
    assert_eq!(err.status().map(|s| s.as_u16()), Some(401));
    assert!(store.get().is_none(), "credential must be cleared");
    assert_eq!(fired.load(Ordering::SeqCst), 1, "redirect fires exactly once");
}

#[tokio::test]
async fn request_without_credential_is_sent_unauthenticated() {
    let server = MockServer::start().await;
    // Nothing in the store, so no authorization header may appear.
    Mock::given(method("GET"))
        .and(path("/api/members"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/members"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(401), 1).await;

    let store = Arc::new(MemoryTokenStore::new());
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let client = client_for(&server, store.clone()).with_auth_failure_handler(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let result: Result<Member, ApiError> = client.get("/api/members").await;
    let err = result.expect_err("caller receives the final 401");

    assert!(err.is_auth());
    assert_eq!(err.status().map(|s| s.as_u16()), Some(401));
    assert!(store.get().is_none());
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_that_still_401s_is_returned_without_second_refresh() {
    let server = MockServer::start().await;
    // The endpoint rejects both the old and the refreshed token: once the
    // single retry has run, the 401 comes back to the caller unchanged.
    Mock::given(method("GET"))
        .and(path("/api/private"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "fresh-token"
        })),
        1,
    )
    .await;

    let store = Arc::new(MemoryTokenStore::new());
    store.set(Credential::new("stale-token"));

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    let client = client_for(&server, store.clone()).with_auth_failure_handler(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let result: Result<Member, ApiError> = client.get("/api/private").await;
    let err = result.expect_err("second 401 is final");

    // A 401 surviving the retry is a plain HTTP failure, not an auth reset:
    // the refresh itself succeeded, so the session stays.
    assert!(!err.is_auth());
    assert_eq!(err.status().map(|s| s.as_u16()), Some(401));
    assert_eq!(store.get().unwrap().access_token, "fresh-token");
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_401_errors_pass_through_without_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/events"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database on fire"))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh(&server, ResponseTemplate::new(200), 0).await;

    let store = Arc::new(MemoryTokenStore::new());
    store.set(Credential::new("good-token"));
    let client = client_for(&server, store.clone());

    let result: Result<Member, ApiError> = client.get("/api/events").await;
    let err = result.expect_err("500 must surface");

    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
    match err {
        ApiError::Http { body, .. } => assert_eq!(body, "database on fire"),
        other => panic!("unexpected error: {other:?}"),
    }
    // No credential mutation on unrelated failures.
    assert_eq!(store.get().unwrap().access_token, "good-token");
}

#[tokio::test]
async fn concurrent_401s_each_trigger_their_own_refresh() {
    let server = MockServer::start().await;
    for route in ["/api/members", "/api/events"] {
        Mock::given(method("GET"))
            .and(path(route))
            .and(bearer_token("stale-token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(route))
            .and(bearer_token("fresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "Carla"
            })))
            .expect(1)
            .mount(&server)
            .await;
    }
    // No coalescing: each 401 issues its own refresh call.
    mount_refresh(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "fresh-token"
        })),
        2,
    )
    .await;

    let store = Arc::new(MemoryTokenStore::new());
    store.set(Credential::new("stale-token"));
    let client = client_for(&server, store.clone());

    let (a, b) = futures::join!(
        client.get::<Member>("/api/members"),
        client.get::<Member>("/api/events"),
    );
    a.expect("first concurrent request should succeed");
    b.expect("second concurrent request should succeed");

    assert_eq!(store.get().unwrap().access_token, "fresh-token");
}

#[tokio::test]
async fn logout_clears_store_even_if_server_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryTokenStore::new());
    let client = client_for(&server, store.clone());
    client.adopt_credential(Credential::new("session-token"));
    assert!(store.get().is_some());

    client.logout().await;
    assert!(store.get().is_none());
}
