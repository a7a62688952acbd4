//! End-to-end over real HTTP: `Client` → worker → pipeline → reqwest →
//! wiremock collector.

use std::sync::Arc;

use serde_json::{json, Value};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use flare_core::store::MemoryStore;
use flare_core::transport::HttpTransport;
use flare_core::{BreadcrumbLevel, Client, Options, User};

fn options(server: &MockServer) -> Options {
    Options {
        endpoint: format!("{}/api/errors", server.uri()),
        project_token: "project-token-123".into(),
        environment: "integration".into(),
        flush_timeout_ms: 5_000,
        ..Default::default()
    }
}

/* `Client::flush` blocks; keep it off the test runtime's threads. */
async fn flush(client: &Client) -> bool {
    let client = client.clone();
    tokio::task::spawn_blocking(move || client.flush())
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_delivers_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/errors"))
        .and(header("Authorization", "Bearer project-token-123"))
        .and(header("Content-Type", "application/json"))
        .and(header_exists("User-Agent"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(options(&server)).unwrap();
    client.set_user(Some(User {
        id: Some("u-1".into()),
        email: Some("dev@example.com".into()),
        name: None,
    }));
    client.set_custom("release", json!("2024.06"));
    client.add_breadcrumb("clicked pay", "ui", BreadcrumbLevel::Info, None);
    client.capture_message("payment failed");

    assert!(flush(&client).await);

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["message"], "payment failed");
    assert_eq!(body["exception_class"], "message");
    assert_eq!(body["environment"], "integration");
    assert_eq!(body["user_id"], "u-1");
    assert_eq!(body["user_email"], "dev@example.com");
    assert_eq!(body["custom_data"]["release"], "2024.06");
    assert_eq!(body["custom_data"]["breadcrumbs"][0]["message"], "clicked pay");
    assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_captures_error_with_stack() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::with_transport(
        options(&server),
        Arc::new(HttpTransport::new().unwrap()),
        Some(Arc::new(MemoryStore::new())),
    )
    .unwrap();

    let err = std::io::Error::new(std::io::ErrorKind::NotFound, "config.toml missing");
    client.capture_error(&err);
    assert!(flush(&client).await);

    let received = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["exception_class"], "io::Error");
    assert_eq!(body["message"], "config.toml missing");
    assert!(body["stack_trace"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_stops_after_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = Client::new(options(&server)).unwrap();
    client.capture_message("first");
    assert!(flush(&client).await);
    assert!(!client.is_enabled());

    client.capture_message("second");
    assert!(flush(&client).await);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_offline_then_online_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/errors"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let client = Client::new(options(&server)).unwrap();
    client.set_online(false);
    for name in ["one", "two", "three"] {
        client.capture_message(name);
    }
    assert!(flush(&client).await);
    assert!(server.received_requests().await.unwrap().is_empty());
    assert_eq!(client.health().metrics.queue_size, 3);

    client.set_online(true);
    assert!(flush(&client).await);

    let messages: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| serde_json::from_slice::<Value>(&r.body).unwrap()["message"].to_string())
        .collect();
    assert_eq!(messages, vec!["\"one\"", "\"two\"", "\"three\""]);
}
