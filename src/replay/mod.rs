//! Record/replay harness wrapping the transport.
//!
//! [`ReplayApiClient`] implements [`Transport`], so anything written against
//! the client contract runs unmodified against recorded fixtures. In a
//! persisting mode it calls the live backend and captures each interaction;
//! in replay mode it asserts request equality against the next recorded
//! interaction and serves its response, never touching the network.
//!
//! All cursor state lives on the session object owned by one harness
//! instance; concurrent calls against a single instance must be serialized
//! by the caller.

pub mod redact;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::client::{ApiClient, Transport};
use crate::errors::Error;
use crate::options::HttpOptions;
use crate::request::{HttpRequest, Method, Payload, RequestSpec};
use crate::response::ApiResponse;

/// How the harness treats the live backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Always call live, persist every interaction.
    Record,
    /// Never call live; the fixture file must exist.
    Replay,
    /// Replay when a fixture exists, otherwise record.
    Auto,
    /// Always call live, never persist. One-off live smoke checks.
    Api,
}

/// Request snapshot inside a fixture, stored redacted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body_segments: Vec<Value>,
}

/// Response snapshot inside a fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body_segments: Vec<Value>,
    /// Serialized domain objects appended by [`ReplayApiClient::verify_response`].
    #[serde(default)]
    pub sdk_response_segments: Vec<Value>,
}

/// One request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayInteraction {
    pub request: RecordedRequest,
    pub response: RecordedResponse,
}

/// The persisted fixture document: one per session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayFile {
    pub replay_id: String,
    pub interactions: Vec<ReplayInteraction>,
}

#[derive(Debug)]
struct ReplaySession {
    path: PathBuf,
    file: ReplayFile,
    /// Index of the next unconsumed interaction (replay); advances only on
    /// a successful match.
    cursor: usize,
    /// Index into the current interaction's SDK-response list.
    sdk_cursor: usize,
    /// Whether this session calls the live backend.
    live: bool,
}

/// Maps a session id onto its fixture path under `replays_dir`.
///
/// A valid id has at least 3 slash-separated segments
/// (module / function / backend-tag), which become the on-disk directory
/// structure.
///
/// # Errors
///
/// [`Error::Fixture`] for an id with fewer than 3 segments or empty
/// segments.
pub fn fixture_path(replays_dir: &Path, replay_id: &str) -> Result<PathBuf, Error> {
    let segments: Vec<&str> = replay_id.split('/').collect();
    if segments.len() < 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(Error::Fixture(format!(
            "replay id {replay_id:?} must have at least 3 non-empty slash-separated segments"
        )));
    }
    Ok(replays_dir.join(format!("{replay_id}.json")))
}

/// Transport decorator that records or replays interactions.
pub struct ReplayApiClient {
    inner: ApiClient,
    mode: ReplayMode,
    replays_dir: PathBuf,
    session: Mutex<Option<ReplaySession>>,
}

impl ReplayApiClient {
    #[must_use]
    pub fn new(inner: ApiClient, mode: ReplayMode, replays_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            mode,
            replays_dir: replays_dir.into(),
            session: Mutex::new(None),
        }
    }

    /// Opens the session for `replay_id`, loading the fixture when the mode
    /// calls for it. Replaces any previous session without persisting it.
    ///
    /// # Errors
    ///
    /// [`Error::Fixture`] for an invalid id, a missing fixture in replay
    /// mode, or an unparseable fixture file.
    pub fn initialize_session(&self, replay_id: &str) -> Result<(), Error> {
        let path = fixture_path(&self.replays_dir, replay_id)?;

        let (file, live) = match self.mode {
            ReplayMode::Record | ReplayMode::Api => (empty_file(replay_id), true),
            ReplayMode::Replay => {
                if !path.exists() {
                    return Err(Error::Fixture(format!(
                        "no recorded fixture for replay id {replay_id:?} at {}",
                        path.display()
                    )));
                }
                (load_file(&path)?, false)
            }
            ReplayMode::Auto => {
                if path.exists() {
                    (load_file(&path)?, false)
                } else {
                    (empty_file(replay_id), true)
                }
            }
        };

        log::debug!(
            "replay session {replay_id:?} opened (mode {:?}, live {live})",
            self.mode
        );
        *self.lock_session() = Some(ReplaySession {
            path,
            file,
            cursor: 0,
            sdk_cursor: 0,
            live,
        });
        Ok(())
    }

    /// Checks a decoded domain object against the recorded SDK responses.
    ///
    /// In a persisting mode the serialized object is appended to the current
    /// interaction; in replay mode it is compared against the next recorded
    /// entry, catching SDK-level decoding regressions independent of
    /// wire-format drift. No-op in `Api` mode.
    ///
    /// # Errors
    ///
    /// [`Error::ReplayMismatch`] when the object differs from the recording,
    /// [`Error::Fixture`] when no entry remains or no session is open.
    pub fn verify_response(&self, response: &Value) -> Result<(), Error> {
        if self.mode == ReplayMode::Api {
            return Ok(());
        }

        let mut guard = self.lock_session();
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Fixture("replay session not initialized".to_string()))?;

        if session.live {
            let interaction = session.file.interactions.last_mut().ok_or_else(|| {
                Error::Fixture("verify_response called before any interaction".to_string())
            })?;
            interaction
                .response
                .sdk_response_segments
                .push(response.clone());
            return Ok(());
        }

        let index = session.cursor.checked_sub(1).ok_or_else(|| {
            Error::Fixture("verify_response called before any interaction".to_string())
        })?;
        let interaction = &session.file.interactions[index];
        let expected = interaction
            .response
            .sdk_response_segments
            .get(session.sdk_cursor)
            .ok_or_else(|| {
                Error::Fixture(format!(
                    "no recorded SDK response at index {}",
                    session.sdk_cursor
                ))
            })?;

        if expected != response {
            return Err(Error::ReplayMismatch {
                field: "sdk_response",
                expected: expected.to_string(),
                actual: response.to_string(),
            });
        }
        session.sdk_cursor += 1;
        Ok(())
    }

    /// Persists the session if the mode records, then clears it. A no-op
    /// when no session is open or the mode does not persist; a session
    /// persists exactly once.
    ///
    /// # Errors
    ///
    /// I/O and serialization failures while writing the fixture.
    pub fn close(&self) -> Result<(), Error> {
        let Some(session) = self.lock_session().take() else {
            return Ok(());
        };
        if !self.persists(&session) {
            return Ok(());
        }

        if let Some(parent) = session.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let document = serde_json::to_string_pretty(&session.file)?;
        std::fs::write(&session.path, document)?;
        log::debug!(
            "replay session {:?} persisted to {}",
            session.file.replay_id,
            session.path.display()
        );
        Ok(())
    }

    fn persists(&self, session: &ReplaySession) -> bool {
        match self.mode {
            ReplayMode::Record => true,
            ReplayMode::Auto => session.live,
            ReplayMode::Replay | ReplayMode::Api => false,
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<ReplaySession>> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn session_is_live(&self) -> Result<bool, Error> {
        self.lock_session()
            .as_ref()
            .map(|s| s.live)
            .ok_or_else(|| Error::Fixture("replay session not initialized".to_string()))
    }

    fn record_interaction(&self, interaction: ReplayInteraction) {
        if self.mode == ReplayMode::Api {
            return;
        }
        let mut guard = self.lock_session();
        if let Some(session) = guard.as_mut() {
            session.file.interactions.push(interaction);
            session.sdk_cursor = 0;
        }
    }

    async fn send_live(
        &self,
        request: HttpRequest,
        streaming: bool,
    ) -> Result<ApiResponse, Error> {
        let recorded_request = snapshot_request(&request);

        match self.inner.send(request, streaming).await {
            Ok(response) => {
                let status = response.status;
                let headers = response.headers.clone();

                // Fully drain a live stream so the fixture holds the complete
                // segment sequence; callers get the re-materialized copy.
                let mut segments = Vec::new();
                let mut stream = response.into_segments();
                while let Some(segment) = stream.next().await {
                    segments.push(segment?);
                }

                self.record_interaction(ReplayInteraction {
                    request: recorded_request,
                    response: RecordedResponse {
                        status_code: status,
                        headers: headers.clone(),
                        body_segments: segments.clone(),
                        sdk_response_segments: Vec::new(),
                    },
                });

                Ok(ApiResponse::buffered(
                    status,
                    headers,
                    segments.iter().map(Value::to_string).collect(),
                ))
            }
            Err(Error::Api {
                status_code,
                message,
                request_id,
                headers,
            }) => {
                // Record the failure too, then re-raise it.
                let body = serde_json::from_str(&message)
                    .unwrap_or_else(|_| json!({"error": {"message": message.clone()}}));
                self.record_interaction(ReplayInteraction {
                    request: recorded_request,
                    response: RecordedResponse {
                        status_code,
                        headers: headers.clone(),
                        body_segments: vec![body],
                        sdk_response_segments: Vec::new(),
                    },
                });
                Err(Error::Api {
                    status_code,
                    message,
                    request_id,
                    headers,
                })
            }
            Err(other) => Err(other),
        }
    }

    fn serve_recorded(&self, request: &HttpRequest) -> Result<ApiResponse, Error> {
        let actual = snapshot_request(request);

        let mut guard = self.lock_session();
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::Fixture("replay session not initialized".to_string()))?;
        let expected = session
            .file
            .interactions
            .get(session.cursor)
            .ok_or_else(|| {
                Error::Fixture(format!(
                    "no recorded interaction left at index {} of {:?}",
                    session.cursor, session.file.replay_id
                ))
            })?;

        match_request(&actual, &expected.request)?;
        session.cursor += 1;
        session.sdk_cursor = 0;

        let recorded = &expected.response;
        if recorded.status_code >= 400 {
            return Err(Error::Api {
                status_code: recorded.status_code,
                message: recorded
                    .body_segments
                    .first()
                    .map(Value::to_string)
                    .unwrap_or_default(),
                request_id: None,
                headers: recorded.headers.clone(),
            });
        }

        Ok(ApiResponse::buffered(
            recorded.status_code,
            recorded.headers.clone(),
            recorded.body_segments.iter().map(Value::to_string).collect(),
        ))
    }
}

impl std::fmt::Debug for ReplayApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayApiClient")
            .field("mode", &self.mode)
            .field("replays_dir", &self.replays_dir)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for ReplayApiClient {
    fn build_request(
        &self,
        method: Method,
        path: &str,
        spec: &RequestSpec,
        options: Option<&HttpOptions>,
    ) -> Result<HttpRequest, Error> {
        self.inner.build_request(method, path, spec, options)
    }

    async fn send(&self, request: HttpRequest, streaming: bool) -> Result<ApiResponse, Error> {
        if self.session_is_live()? {
            self.send_live(request, streaming).await
        } else {
            self.serve_recorded(&request)
        }
    }
}

/// Builds the redacted fixture snapshot of an outgoing request.
fn snapshot_request(request: &HttpRequest) -> RecordedRequest {
    let mut headers = request.headers.clone();
    redact::redact_headers(&mut headers);

    let mut body_segments = match &request.payload {
        Payload::Json(body) => vec![body.clone()],
        Payload::Bytes(bytes) => vec![json!({
            "bytes_b64": BASE64.encode(bytes),
            "length": bytes.len(),
        })],
        Payload::Empty => Vec::new(),
    };
    for segment in &mut body_segments {
        redact::redact_body_segment(segment);
    }

    RecordedRequest {
        method: request.method.as_str().to_string(),
        url: redact::redact_url(&request.url),
        headers,
        body_segments,
    }
}

/// Asserts field-by-field equality, in order: URL, headers, method, body.
fn match_request(actual: &RecordedRequest, expected: &RecordedRequest) -> Result<(), Error> {
    if actual.url != expected.url {
        return Err(Error::ReplayMismatch {
            field: "url",
            expected: expected.url.clone(),
            actual: actual.url.clone(),
        });
    }
    if actual.headers != expected.headers {
        return Err(Error::ReplayMismatch {
            field: "headers",
            expected: format!("{:?}", sorted(&expected.headers)),
            actual: format!("{:?}", sorted(&actual.headers)),
        });
    }
    if actual.method != expected.method {
        return Err(Error::ReplayMismatch {
            field: "method",
            expected: expected.method.clone(),
            actual: actual.method.clone(),
        });
    }
    if actual.body_segments != expected.body_segments {
        return Err(Error::ReplayMismatch {
            field: "body",
            expected: Value::Array(expected.body_segments.clone()).to_string(),
            actual: Value::Array(actual.body_segments.clone()).to_string(),
        });
    }
    Ok(())
}

fn sorted(headers: &HashMap<String, String>) -> Vec<(&String, &String)> {
    let mut pairs: Vec<_> = headers.iter().collect();
    pairs.sort();
    pairs
}

fn empty_file(replay_id: &str) -> ReplayFile {
    ReplayFile {
        replay_id: replay_id.to_string(),
        interactions: Vec::new(),
    }
}

fn load_file(path: &Path) -> Result<ReplayFile, Error> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        Error::Fixture(format!("malformed fixture at {}: {e}", path.display()))
    })
}
