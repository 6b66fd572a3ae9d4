//! Health and metrics endpoint tests for academy-service.

mod common;

use common::TestApp;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn health_check_returns_ok() {
    let Some(app) = TestApp::spawn().await else { return };

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .expect("Failed to reach health endpoint");

    assert!(response.status().is_success());
    let body: serde_json::Value = response.json().await.expect("Invalid health payload");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "academy-service");

    app.cleanup().await;
}

#[tokio::test]
#[serial]
async fn metrics_endpoint_serves_prometheus_text() {
    let Some(app) = TestApp::spawn().await else { return };

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/metrics", app.address))
        .send()
        .await
        .expect("Failed to reach metrics endpoint");

    assert!(response.status().is_success());

    app.cleanup().await;
}
