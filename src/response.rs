//! The response-side data model.
//!
//! An [`ApiResponse`] wraps either an already-materialized list of raw
//! segments (replay and non-streaming calls) or a live connection. Consuming
//! it yields a lazy, forward-only, non-restartable sequence of decoded JSON
//! segments.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::Value;

use crate::errors::Error;
use crate::streaming::{decode_segment, json_line_stream};

/// Status and headers of a response, without the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub status: u16,
    pub headers: HashMap<String, String>,
}

/// Caller-supplied side-channel slot for response metadata.
///
/// Cloning shares the slot. The chunked upload protocol reads upload-status
/// headers through this channel.
#[derive(Debug, Clone, Default)]
pub struct ResponseCapture(Arc<Mutex<Option<ResponseMetadata>>>);

impl ResponseCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the captured metadata, if a response has arrived.
    #[must_use]
    pub fn get(&self) -> Option<ResponseMetadata> {
        self.0.lock().map(|slot| slot.clone()).unwrap_or(None)
    }

    pub(crate) fn set(&self, metadata: ResponseMetadata) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = Some(metadata);
        }
    }
}

/// Flattens a reqwest header map into owned strings, dropping values that
/// are not valid UTF-8.
pub(crate) fn collect_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// Where a response body comes from.
#[derive(Debug)]
pub enum ResponseBody {
    /// Ordered raw segments, already read off the wire or out of a fixture.
    Buffered(Vec<String>),
    /// An open connection, decoded line by line as it is consumed.
    Live(reqwest::Response),
}

/// A response as seen by callers of the transport.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// A response over pre-materialized segments.
    #[must_use]
    pub fn buffered(status: u16, headers: HashMap<String, String>, segments: Vec<String>) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Buffered(segments),
        }
    }

    /// Status and headers, for the capture side-channel.
    #[must_use]
    pub fn metadata(&self) -> ResponseMetadata {
        ResponseMetadata {
            status: self.status,
            headers: self.headers.clone(),
        }
    }

    /// Consumes the response into a lazy stream of decoded JSON segments.
    ///
    /// The stream is finite and cannot be restarted; a buffered empty body
    /// yields no segments.
    #[must_use]
    pub fn into_segments(self) -> BoxStream<'static, Result<Value, Error>> {
        match self.body {
            ResponseBody::Buffered(segments) => {
                stream::iter(segments.into_iter().map(|s| decode_segment(&s))).boxed()
            }
            ResponseBody::Live(response) => json_line_stream(response.bytes_stream()).boxed(),
        }
    }

    /// First raw segment of a buffered body, for diagnostics.
    #[must_use]
    pub(crate) fn buffered_text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Buffered(segments) => segments.first().map(String::as_str),
            ResponseBody::Live(_) => None,
        }
    }
}
