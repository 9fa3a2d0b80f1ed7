//! The request-side data model.
//!
//! [`RequestSpec`] is the caller-facing tuple of (body, query parameters,
//! URL-template arguments); routing hints travel in their own fields, never
//! inside the body. The request builder turns a spec into a concrete
//! [`HttpRequest`] whose body is exactly `spec.body`.

use std::collections::HashMap;

pub use reqwest::Method;
use serde_json::Value;

/// Logical request input: a JSON body plus out-of-band routing hints.
#[derive(Debug, Clone, Default)]
pub struct RequestSpec {
    /// JSON body, serialized as-is onto the wire.
    pub body: Option<Value>,
    /// Query parameters appended to the final URL, values url-encoded.
    pub query: Vec<(String, String)>,
    /// Values substituted into `{placeholder}` slots in the path.
    pub url_args: HashMap<String, String>,
}

impl RequestSpec {
    /// A spec with no body and no parameters.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A spec carrying a JSON body.
    #[must_use]
    pub fn json(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::default()
        }
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Adds a URL-template argument.
    #[must_use]
    pub fn url_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.url_args.insert(key.into(), value.into());
        self
    }
}

/// Body of a concrete request.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Structured JSON body.
    Json(Value),
    /// Raw bytes; used by the chunked upload protocol.
    Bytes(Vec<u8>),
    /// No body.
    Empty,
}

/// A fully resolved request, ready for the transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub payload: Payload,
}
