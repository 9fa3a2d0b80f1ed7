//! Per-client and per-call HTTP options with a pure merge operation.
//!
//! A client holds a base [`HttpOptions`]; callers may pass a per-call
//! override. [`merge`] combines the two into a new value without mutating
//! either input, deep-merging header maps and never letting an empty override
//! clobber a populated base field.

use std::collections::HashMap;

use crate::response::ResponseCapture;

/// SDK identity label, e.g. `genai-transport/0.1.0`.
pub const SDK_LABEL: &str = concat!("genai-transport/", env!("CARGO_PKG_VERSION"));

/// Language token carried in the identity string. Redacted out of replay
/// fixtures so they stay language-agnostic.
pub const LANGUAGE_LABEL: &str = "gl-rust";

/// Headers that carry the composite SDK identity string.
const IDENTITY_HEADERS: [&str; 2] = ["user-agent", "x-goog-api-client"];

/// Composite identity string appended to `user-agent` and
/// `x-goog-api-client`: `"<label> gl-<language>/<toolchain-floor>"`.
#[must_use]
pub fn sdk_identity() -> String {
    format!(
        "{SDK_LABEL} {LANGUAGE_LABEL}/{}",
        env!("CARGO_PKG_RUST_VERSION")
    )
}

/// Options controlling how a request is built and dispatched.
///
/// `None` fields fall back to the client's base configuration during
/// [`merge`].
#[derive(Debug, Clone, Default)]
pub struct HttpOptions {
    /// Base address of the backend, e.g. `https://generativelanguage.googleapis.com/`.
    pub base_url: Option<String>,
    /// API version path segment, e.g. `v1beta`.
    pub api_version: Option<String>,
    /// Extra headers; merged over the base header map, override wins per key.
    pub headers: Option<HashMap<String, String>>,
    /// Side-channel slot populated with response status and headers. For a
    /// streamed call the slot is filled only once the stream is drained.
    pub response_capture: Option<ResponseCapture>,
}

impl HttpOptions {
    /// Options carrying only a response-capture slot.
    #[must_use]
    pub fn with_capture(capture: ResponseCapture) -> Self {
        Self {
            response_capture: Some(capture),
            ..Self::default()
        }
    }
}

/// Merges a base configuration with a per-call override, producing a new
/// configuration.
///
/// Header maps are deep-copied and shallow-merged (override wins per leaf
/// key). Any other override field replaces the base only when non-empty.
/// The SDK identity headers are appended afterwards, idempotently.
#[must_use]
pub fn merge(base: &HttpOptions, overrides: &HttpOptions) -> HttpOptions {
    let mut merged = base.clone();

    if let Some(url) = &overrides.base_url
        && !url.is_empty()
    {
        merged.base_url = Some(url.clone());
    }
    if let Some(version) = &overrides.api_version
        && !version.is_empty()
    {
        merged.api_version = Some(version.clone());
    }
    if let Some(override_headers) = &overrides.headers
        && !override_headers.is_empty()
    {
        let mut headers = base.headers.clone().unwrap_or_default();
        for (key, value) in override_headers {
            headers.insert(key.clone(), value.clone());
        }
        merged.headers = Some(headers);
    }
    if overrides.response_capture.is_some() {
        merged.response_capture = overrides.response_capture.clone();
    }

    if let Some(headers) = &mut merged.headers {
        append_sdk_headers(headers);
    }

    merged
}

/// Appends the SDK identity string to `user-agent` and `x-goog-api-client`,
/// skipping any header that already carries it.
pub fn append_sdk_headers(headers: &mut HashMap<String, String>) {
    let identity = sdk_identity();
    for name in IDENTITY_HEADERS {
        match headers.get_mut(name) {
            Some(value) if value.contains(&identity) => {}
            Some(value) => {
                value.push(' ');
                value.push_str(&identity);
            }
            None => {
                headers.insert(name.to_string(), identity.clone());
            }
        }
    }
}
