//! Integration tests for the forecasting client
//!
//! Tests HTTP client behavior using wiremock for request/response mocking.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use mcp_cascade_impact::config::RequestConfig;
use mcp_cascade_impact::error::ForecastError;
use mcp_cascade_impact::forecasting::{ForecastOptions, ForecastingProvider, HttpForecastingClient};

fn create_test_client(base_url: &str, api_key: Option<&str>, max_retries: u32) -> HttpForecastingClient {
    let request_config = RequestConfig {
        timeout_ms: 2000,
        max_retries,
        retry_delay_ms: 10,
    };
    HttpForecastingClient::new(base_url, api_key.map(String::from), request_config)
        .expect("Failed to create client")
}

fn options() -> ForecastOptions {
    ForecastOptions {
        horizon_minutes: 30,
        confidence_level: 0.95,
    }
}

#[tokio::test]
async fn test_successful_forecast() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/forecast"))
        .and(header("Content-Type", "application/json"))
        .and(body_partial_json(json!({
            "series": [0.9, 0.8, 0.7],
            "horizon_minutes": 30
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": 0.6,
            "confidence": 0.85
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), None, 0);
    let forecast = client.predict(&[0.9, 0.8, 0.7], &options()).await.unwrap();

    assert_eq!(forecast.value, 0.6);
    assert_eq!(forecast.confidence, 0.85);
}

#[tokio::test]
async fn test_api_key_sent_as_bearer() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/forecast"))
        .and(header("Authorization", "Bearer forecast-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": 0.9,
            "confidence": 0.5
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), Some("forecast-key"), 0);
    assert!(client.predict(&[1.0, 0.9], &options()).await.is_ok());
}

#[tokio::test]
async fn test_trailing_slash_is_trimmed() {
    let client = create_test_client("http://localhost:9000/", None, 0);
    assert_eq!(client.base_url(), "http://localhost:9000");
}

#[tokio::test]
async fn test_server_error_retries_then_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), None, 1);
    let err = client.predict(&[1.0], &options()).await.unwrap_err();

    match err {
        ForecastError::Unavailable { message, retries } => {
            assert_eq!(retries, 2);
            assert!(message.contains("503"));
        }
        other => panic!("expected Unavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn test_confidence_out_of_range_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": 0.5,
            "confidence": 1.7
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), None, 3);
    let err = client.predict(&[1.0], &options()).await.unwrap_err();

    assert!(matches!(err, ForecastError::InvalidResponse { .. }));
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&mock_server)
        .await;

    let client = create_test_client(&mock_server.uri(), None, 2);
    let err = client.predict(&[1.0], &options()).await.unwrap_err();

    assert!(matches!(err, ForecastError::InvalidResponse { .. }));
}
