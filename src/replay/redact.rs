//! Deterministic normalization of recorded interactions.
//!
//! Applied identically before persisting and before comparing, so both sides
//! of a replay match are normalized the same way. Every rewrite is
//! idempotent: redacting already-redacted text is a no-op, because no
//! placeholder re-matches its own pattern.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::auth::API_KEY_HEADER;
use crate::client::GEMINI_BASE_URL;
use crate::options::LANGUAGE_LABEL;

pub const VERSION_PLACEHOLDER: &str = "{VERSION_NUMBER}";
pub const LANGUAGE_PLACEHOLDER: &str = "{LANGUAGE_LABEL}";
pub const KEY_PLACEHOLDER: &str = "{REDACTED}";
pub const MLDEV_URL_PLACEHOLDER: &str = "{MLDEV_URL_PREFIX}";
pub const VERTEX_URL_PLACEHOLDER: &str = "{VERTEX_URL_PREFIX}";
pub const PROJECT_LOCATION_PLACEHOLDER: &str = "{PROJECT_AND_LOCATION_PATH}";

/// Headers carrying the SDK identity string.
const IDENTITY_HEADERS: [&str; 2] = ["user-agent", "x-goog-api-client"];

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\.\d+\.\d+").expect("valid version regex"))
}

fn vertex_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https://[^/]+-aiplatform\.googleapis\.com/[^/]+/projects/[^/]+/locations/[^/]+")
            .expect("valid vertex URL regex")
    })
}

fn project_location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"projects/[^/]+/locations/[^/]+").expect("valid project path regex")
    })
}

/// Replaces semantic-version triplets with a placeholder.
#[must_use]
pub fn redact_version_numbers(value: &str) -> String {
    version_re()
        .replace_all(value, VERSION_PLACEHOLDER)
        .into_owned()
}

/// Replaces the language token so fixtures are language-agnostic.
#[must_use]
pub fn redact_language_label(value: &str) -> String {
    value.replace(LANGUAGE_LABEL, LANGUAGE_PLACEHOLDER)
}

/// Redacts credentials and identity strings out of a request header map.
pub fn redact_headers(headers: &mut HashMap<String, String>) {
    if let Some(key) = headers.get_mut(API_KEY_HEADER) {
        *key = KEY_PLACEHOLDER.to_string();
    }
    for name in IDENTITY_HEADERS {
        if let Some(value) = headers.get_mut(name) {
            *value = redact_language_label(&redact_version_numbers(value));
        }
    }
}

/// Rewrites backend-specific URL prefixes so fixtures are portable across
/// projects and regions.
#[must_use]
pub fn redact_url(url: &str) -> String {
    let url = vertex_url_re().replace(url, VERTEX_URL_PLACEHOLDER);
    url.replace(
        GEMINI_BASE_URL.trim_end_matches('/'),
        MLDEV_URL_PLACEHOLDER,
    )
}

/// Shallowly redacts a body segment: only top-level string fields are
/// rewritten.
pub fn redact_body_segment(segment: &mut Value) {
    if let Value::Object(map) = segment {
        for value in map.values_mut() {
            if let Value::String(s) = value {
                *s = project_location_re()
                    .replace_all(s, PROJECT_LOCATION_PLACEHOLDER)
                    .into_owned();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_triplets_replaced() {
        assert_eq!(
            redact_version_numbers("genai-transport/0.1.0 gl-rust/1.88"),
            "genai-transport/{VERSION_NUMBER} gl-rust/1.88"
        );
    }

    #[test]
    fn language_token_replaced() {
        assert_eq!(
            redact_language_label("lib gl-rust/1.88"),
            "lib {LANGUAGE_LABEL}/1.88"
        );
    }

    #[test]
    fn api_key_header_fully_replaced() {
        let mut headers = HashMap::from([
            (API_KEY_HEADER.to_string(), "secret-key".to_string()),
            ("user-agent".to_string(), "lib/1.2.3 gl-rust/1.88".to_string()),
        ]);
        redact_headers(&mut headers);

        assert_eq!(headers[API_KEY_HEADER], "{REDACTED}");
        assert_eq!(
            headers["user-agent"],
            "lib/{VERSION_NUMBER} {LANGUAGE_LABEL}/1.88"
        );
    }

    #[test]
    fn gemini_url_prefix_rewritten() {
        assert_eq!(
            redact_url("https://generativelanguage.googleapis.com/v1beta/models"),
            "{MLDEV_URL_PREFIX}/v1beta/models"
        );
    }

    #[test]
    fn vertex_url_prefix_rewritten_through_location() {
        assert_eq!(
            redact_url(
                "https://us-central1-aiplatform.googleapis.com/v1beta1/projects/p1/locations/us-central1/models"
            ),
            "{VERTEX_URL_PREFIX}/models"
        );
    }

    #[test]
    fn body_redaction_is_shallow() {
        let mut body = json!({
            "cachedContent": "projects/p/locations/l/cachedContents/c",
            "nested": {"path": "projects/p/locations/l/x"},
            "count": 3
        });
        redact_body_segment(&mut body);

        assert_eq!(
            body["cachedContent"],
            "{PROJECT_AND_LOCATION_PATH}/cachedContents/c"
        );
        // Nested values are untouched.
        assert_eq!(body["nested"]["path"], "projects/p/locations/l/x");
        assert_eq!(body["count"], 3);
    }

    #[test]
    fn redaction_is_idempotent() {
        let url = "https://generativelanguage.googleapis.com/v1beta/models";
        let once = redact_url(url);
        assert_eq!(redact_url(&once), once);

        let agent = "lib/1.2.3 gl-rust/1.88";
        let once = redact_language_label(&redact_version_numbers(agent));
        assert_eq!(redact_language_label(&redact_version_numbers(&once)), once);

        let mut headers = HashMap::from([(API_KEY_HEADER.to_string(), "key".to_string())]);
        redact_headers(&mut headers);
        let after_first = headers.clone();
        redact_headers(&mut headers);
        assert_eq!(headers, after_first);
    }
}
