mod common;

use common::mock_backend::{MockBackend, MockResponse};
use common::{create_backend, start_proxy, test_config, wait_for_server};
use reqwest::Client;
use sigguard::config::Provider;
use std::time::Duration;

#[tokio::test]
async fn test_health_integration() {
    let proxy = start_proxy(test_config(create_backend(
        "test",
        Provider::Claude,
        "http://127.0.0.1:1",
    )))
    .await;

    let resp = Client::new().get(proxy.url("/health")).send().await.unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn test_request_forwarding() {
    let mock = MockBackend::start().await;
    mock.enqueue(MockResponse::json(r#"{"data": []}"#));
    let proxy = start_proxy(test_config(create_backend("test", Provider::Claude, &mock.base_url()))).await;

    let resp = Client::new()
        .get(proxy.url("/v1/models?limit=5"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), r#"{"data": []}"#);

    let captured = mock.captured_requests();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].method, "GET");
    assert_eq!(captured[0].path, "/v1/models?limit=5");
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let proxy = start_proxy(test_config(create_backend(
        "test",
        Provider::Claude,
        "http://127.0.0.1:1",
    )))
    .await;
    let addr = proxy.addr;

    proxy.handle.shutdown();

    let mut stopped = false;
    for _ in 0..50 {
        if !wait_for_server(addr, Duration::from_millis(20)).await {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(stopped, "proxy still accepting connections after shutdown");
}
