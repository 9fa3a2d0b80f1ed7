use std::collections::HashMap;

use reqwest::Response;
use thiserror::Error;

use crate::response::collect_headers;

/// Maximum characters of a response body quoted in error messages.
const ERROR_BODY_PREVIEW_LENGTH: usize = 200;

/// Google's request ID header. The value correlates a failed call with
/// server-side logs. See: <https://cloud.google.com/apis/docs/system-parameters>
const REQUEST_ID_HEADER: &str = "x-goog-request-id";

/// Errors produced by the transport layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Non-2xx HTTP status from the backend, raised before the caller ever
    /// sees a response object.
    #[error("API error (HTTP {status_code}): {message}")]
    Api {
        /// HTTP status code (e.g., 400, 429, 500)
        status_code: u16,
        /// Error message from the API response body (truncated)
        message: String,
        /// Request ID from `x-goog-request-id` header, if available
        request_id: Option<String>,
        /// Response headers of the failed call
        headers: HashMap<String, String>,
    },
    #[error("auth error: {0}")]
    Auth(String),
    /// The chunked upload exchange ended in a non-terminal state. Carries the
    /// last response's headers and body for diagnosis.
    #[error("upload protocol violation: {message} (upload status: {upload_status:?})")]
    UploadProtocol {
        message: String,
        upload_status: Option<String>,
        headers: HashMap<String, String>,
        body: String,
    },
    /// A replay fixture is missing, malformed, or its session id is invalid.
    #[error("replay fixture error: {0}")]
    Fixture(String),
    /// The live request does not match the next recorded interaction. Fails
    /// the driving test; not recoverable.
    #[error("replay mismatch on {field}: expected {expected}, actual {actual}")]
    ReplayMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },
    /// A polled long-running operation reported an error payload.
    #[error("operation {name} failed: {payload}")]
    Operation {
        name: String,
        payload: serde_json::Value,
    },
    #[error("operation {name} timed out after {elapsed_secs:.1}s")]
    OperationTimeout { name: String, elapsed_secs: f64 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Checks an HTTP response status, returning the response on success or a
/// structured [`Error::Api`] otherwise.
///
/// # Errors
///
/// Returns an error with status code, body preview, and request ID on any
/// non-success status.
pub(crate) async fn check_response(response: Response) -> Result<Response, Error> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status_code = response.status().as_u16();

    // Grab the request ID and headers before consuming the body.
    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let headers = collect_headers(response.headers());

    let error_body = response
        .text()
        .await
        .unwrap_or_else(|e| format!("failed to read error body: {e}"));

    Err(Error::Api {
        status_code,
        message: truncate_for_context(&error_body, ERROR_BODY_PREVIEW_LENGTH),
        request_id,
        headers,
    })
}

/// Truncates a string to `max_len` bytes, appending "..." if truncated.
/// Slices on character boundaries so multi-byte UTF-8 never panics.
fn truncate_for_context(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let truncate_at = s
            .char_indices()
            .take_while(|(i, c)| i + c.len_utf8() <= max_len)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &s[..truncate_at])
    }
}
