// Long-running operation polling against a mock backend.
use std::time::Duration;

use genai_transport::{ApiClient, Error, HttpOptions, PollConfig, poll_operation};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ApiClient {
    ApiClient::gemini("test-key").with_http_options(HttpOptions {
        base_url: Some(server.uri()),
        ..Default::default()
    })
}

fn fast_config() -> PollConfig {
    PollConfig {
        timeout: Duration::from_secs(5),
        initial_delay: Duration::from_millis(5),
        multiplier: 1.5,
        max_delay: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn polls_until_done_and_returns_response_payload() {
    let server = MockServer::start().await;
    // The first three polls report a pending operation, then it completes.
    Mock::given(method("GET"))
        .and(path("/v1beta/operations/op-1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"name": "operations/op-1", "done": false})),
        )
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1beta/operations/op-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "operations/op-1",
            "done": true,
            "response": {"x": 1}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = poll_operation(&client, "operations/op-1", fast_config())
        .await
        .unwrap();

    assert_eq!(response, json!({"x": 1}));
    server.verify().await;
}

#[tokio::test]
async fn done_operation_without_response_yields_null() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/operations/op-2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "operations/op-2", "done": true})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = poll_operation(&client, "operations/op-2", fast_config())
        .await
        .unwrap();
    assert_eq!(response, serde_json::Value::Null);
}

#[tokio::test]
async fn error_payload_fails_the_poll() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/operations/op-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "operations/op-3",
            "done": true,
            "error": {"code": 13, "message": "internal"}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = poll_operation(&client, "operations/op-3", fast_config())
        .await
        .unwrap_err();

    match err {
        Error::Operation { name, payload } => {
            assert_eq!(name, "operations/op-3");
            assert_eq!(payload["code"], 13);
        }
        other => panic!("expected Operation error, got {other}"),
    }
}

#[tokio::test]
async fn exhausted_budget_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/operations/op-4"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"name": "operations/op-4", "done": false})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let config = PollConfig {
        timeout: Duration::from_millis(10),
        initial_delay: Duration::from_millis(5),
        multiplier: 2.0,
        max_delay: Duration::from_millis(20),
    };
    let err = poll_operation(&client, "operations/op-4", config)
        .await
        .unwrap_err();

    match err {
        Error::OperationTimeout { name, elapsed_secs } => {
            assert_eq!(name, "operations/op-4");
            assert!(elapsed_secs >= 0.01);
        }
        other => panic!("expected OperationTimeout error, got {other}"),
    }
}

#[tokio::test]
async fn transport_failure_aborts_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1beta/operations/op-5"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "denied"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = poll_operation(&client, "operations/op-5", fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api { status_code: 403, .. }));
    server.verify().await;
}
