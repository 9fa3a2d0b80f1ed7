// Chunked upload exchange against a mock upload endpoint.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use genai_transport::{ApiClient, Error, HttpOptions, TokenProvider, upload_stream};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Accumulates uploaded bytes and answers `active` until it sees the
/// finalize command.
struct ChunkSink {
    received: Arc<Mutex<Vec<u8>>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl Respond for ChunkSink {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let command = request
            .headers
            .get("x-goog-upload-command")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let offset: usize = request
            .headers
            .get("x-goog-upload-offset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let mut received = self.received.lock().unwrap();
        assert_eq!(offset, received.len(), "chunk offset must match bytes seen");
        received.extend_from_slice(&request.body);
        self.commands.lock().unwrap().push(command.clone());

        if command.contains("finalize") {
            ResponseTemplate::new(200)
                .insert_header("x-goog-upload-status", "final")
                .set_body_json(json!({"file": {"name": "files/uploaded"}}))
        } else {
            ResponseTemplate::new(200).insert_header("x-goog-upload-status", "active")
        }
    }
}

fn transport_for(server: &MockServer) -> ApiClient {
    ApiClient::gemini("test-key").with_http_options(HttpOptions {
        base_url: Some(server.uri()),
        ..Default::default()
    })
}

#[tokio::test]
async fn upload_reaches_final_and_returns_body() {
    let server = MockServer::start().await;
    let received = Arc::new(Mutex::new(Vec::new()));
    let commands = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ChunkSink {
            received: received.clone(),
            commands: commands.clone(),
        })
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let data = b"hello upload protocol".to_vec();
    let upload_url = format!("{}/upload", server.uri());

    let result = upload_stream(&transport, &upload_url, data.as_slice(), data.len() as u64)
        .await
        .unwrap();

    assert_eq!(result, Some(json!({"file": {"name": "files/uploaded"}})));
    assert_eq!(*received.lock().unwrap(), data);
    assert_eq!(*commands.lock().unwrap(), vec!["upload, finalize"]);
}

#[tokio::test]
async fn upload_chunks_carry_no_auth_headers() {
    // The upload URL itself is the credential; chunks must not pick up the
    // client's bearer token or API key.
    struct StaticToken;

    #[async_trait]
    impl TokenProvider for StaticToken {
        async fn access_token(&self) -> Result<String, Error> {
            Ok("iam-token".to_string())
        }
    }

    struct NoAuthSink;

    impl Respond for NoAuthSink {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            assert!(request.headers.get("authorization").is_none());
            assert!(request.headers.get("x-goog-api-key").is_none());
            ResponseTemplate::new(200)
                .insert_header("x-goog-upload-status", "final")
                .set_body_json(json!({"file": {"name": "files/noauth"}}))
        }
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(NoAuthSink)
        .expect(1)
        .mount(&server)
        .await;

    let transport = ApiClient::vertex("my-proj", "us-central1", Arc::new(StaticToken));
    let data = b"credential-free bytes".to_vec();
    let upload_url = format!("{}/upload", server.uri());

    let result = upload_stream(&transport, &upload_url, data.as_slice(), data.len() as u64)
        .await
        .unwrap();

    assert_eq!(result, Some(json!({"file": {"name": "files/noauth"}})));
    server.verify().await;
}

#[tokio::test]
async fn upload_interrupted_by_server_is_protocol_violation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-goog-upload-status", "cancelled")
                .set_body_json(json!({"error": "quota"})),
        )
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let data = b"some bytes".to_vec();
    let upload_url = format!("{}/upload", server.uri());

    let err = upload_stream(&transport, &upload_url, data.as_slice(), data.len() as u64)
        .await
        .unwrap_err();

    match err {
        Error::UploadProtocol {
            upload_status,
            body,
            ..
        } => {
            assert_eq!(upload_status.as_deref(), Some("cancelled"));
            assert!(body.contains("quota"));
        }
        other => panic!("expected UploadProtocol error, got {other}"),
    }
}

#[tokio::test]
async fn upload_http_failure_propagates_as_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend exploded"))
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    let data = b"bytes".to_vec();
    let upload_url = format!("{}/upload", server.uri());

    let err = upload_stream(&transport, &upload_url, data.as_slice(), data.len() as u64)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Api { status_code: 500, .. }));
}
