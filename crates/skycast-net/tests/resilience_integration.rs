//! Integration tests for ResilienceManager against a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use skycast_core::{ResilienceConfig, SystemClock};
use skycast_net::{ApiRequest, CircuitStatus, ExecuteOptions, NetworkError, ResilienceManager};
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Fast backoff so retries don't slow the suite down.
fn test_config() -> ResilienceConfig {
    ResilienceConfig {
        base_delay_ms: 10,
        max_delay_ms: 40,
        timeout_ms: 2_000,
        ..ResilienceConfig::default()
    }
}

fn manager(config: &ResilienceConfig) -> ResilienceManager {
    ResilienceManager::with_reqwest(config, Arc::new(SystemClock)).unwrap()
}

fn forecast_request(server: &MockServer) -> ApiRequest {
    let mut url = Url::parse(&format!("{}/v1/forecast", server.uri())).unwrap();
    url.query_pairs_mut()
        .append_pair("latitude", "52.52")
        .append_pair("longitude", "13.41");
    ApiRequest::get("forecast", url)
}

#[tokio::test]
async fn test_execute_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "52.52"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "current": { "temperature_2m": 18.4, "weather_code": 2 }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let manager = manager(&test_config());
    let response = manager
        .execute(forecast_request(&mock_server), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    let body = response.json_value().unwrap();
    assert_eq!(body["current"]["weather_code"], 2);
}

#[tokio::test]
async fn test_server_error_retried_until_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let manager = manager(&test_config());
    let response = manager
        .execute(forecast_request(&mock_server), ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(manager.breaker_status("forecast"), CircuitStatus::Closed);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let manager = manager(&test_config());
    let err = manager
        .execute(forecast_request(&mock_server), ExecuteOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, NetworkError::Client { status: 404, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let manager = manager(&test_config());
    let options = ExecuteOptions {
        timeout: Some(Duration::from_millis(50)),
        max_retries: Some(0),
        ..ExecuteOptions::default()
    };
    let err = manager
        .execute(forecast_request(&mock_server), options)
        .await
        .unwrap_err();

    assert!(matches!(err, NetworkError::Timeout { timeout_ms: 50, .. }));
}

#[tokio::test]
async fn test_open_circuit_sends_no_requests() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let config = ResilienceConfig {
        failure_threshold: 2,
        ..test_config()
    };
    let manager = manager(&config);
    let options = ExecuteOptions {
        max_retries: Some(0),
        ..ExecuteOptions::default()
    };

    for _ in 0..2 {
        let err = manager
            .execute(forecast_request(&mock_server), options)
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Server { status: 500, .. }));
    }

    let err = manager
        .execute(forecast_request(&mock_server), options)
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::CircuitOpen { .. }));
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let manager = manager(&ResilienceConfig {
        max_retries: 0,
        ..test_config()
    });
    // Grab a free port, then close it so nothing is listening.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let url = Url::parse(&format!("http://127.0.0.1:{}/v1/forecast", port)).unwrap();
    let request = ApiRequest::get("forecast", url);

    let err = manager
        .execute(request, ExecuteOptions::default())
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert!(err.counts_against_breaker());
}
