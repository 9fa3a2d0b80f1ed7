//! Transport layer for Google generative-AI backends.
//!
//! This crate covers the wire-level plumbing a generative-AI SDK sits on:
//!
//! - [`ApiClient`]: authenticated JSON/streaming requests against either the
//!   API-key consumer service or the IAM-authenticated cloud service.
//! - [`upload_stream`] / [`upload_file`]: the resumable chunked upload
//!   exchange.
//! - [`poll_operation`]: bounded polling of long-running operations.
//! - [`ReplayApiClient`]: a record/replay harness that captures network
//!   interactions into deterministic, redacted fixtures and serves them back
//!   in tests.
//!
//! Typed resource models, pagination, and higher-level API surfaces are out
//! of scope; bodies travel as `serde_json::Value` at this layer.
//!
//! # Example
//!
//! ```no_run
//! use genai_transport::{ApiClient, Method, RequestSpec, TransportExt};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), genai_transport::Error> {
//! let client = ApiClient::gemini("api-key");
//! let response = client
//!     .request(
//!         Method::POST,
//!         "models/gemini-pro:generateContent",
//!         RequestSpec::json(json!({"contents": [{"parts": [{"text": "hi"}]}]})),
//!         None,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod errors;
pub mod operations;
pub mod options;
pub mod replay;
pub mod request;
pub mod response;
pub mod streaming;
pub mod upload;

pub use auth::{API_KEY_HEADER, AuthStrategy, TokenProvider};
pub use client::{
    ApiClient, GEMINI_API_VERSION, GEMINI_BASE_URL, ResourceScope, Transport, TransportExt,
    VERTEX_API_VERSION, vertex_base_url,
};
pub use errors::Error;
pub use operations::{PollConfig, poll_operation};
pub use options::{HttpOptions, merge, sdk_identity};
pub use replay::{
    RecordedRequest, RecordedResponse, ReplayApiClient, ReplayFile, ReplayInteraction,
    ReplayMode, fixture_path,
};
pub use request::{HttpRequest, Method, Payload, RequestSpec};
pub use response::{ApiResponse, ResponseBody, ResponseCapture, ResponseMetadata};
pub use streaming::{decode_segment, json_line_stream};
pub use upload::{UPLOAD_CHUNK_SIZE, upload_file, upload_stream};
