//! The transport: request building and dispatch over two backends.
//!
//! [`ApiClient`] targets either the key-authenticated consumer service or the
//! IAM-authenticated cloud service, chosen at construction. The
//! [`Transport`] trait is the seam the record/replay harness wraps: anything
//! implementing it gets the full `request` / `request_streamed` surface
//! through [`TransportExt`].

use std::collections::HashMap;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde_json::Value;

use crate::auth::{API_KEY_HEADER, AuthStrategy, TokenProvider};
use crate::errors::{Error, check_response};
use crate::options::{HttpOptions, append_sdk_headers, merge};
use crate::request::{HttpRequest, Method, Payload, RequestSpec};
use crate::response::{ApiResponse, ResponseBody, collect_headers};

/// Base address of the key-authenticated consumer backend.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/";
/// API version on the consumer backend.
pub const GEMINI_API_VERSION: &str = "v1beta";
/// API version on the IAM-authenticated backend.
pub const VERTEX_API_VERSION: &str = "v1beta1";

/// Base address of the IAM-authenticated backend for a location.
#[must_use]
pub fn vertex_base_url(location: &str) -> String {
    format!("https://{location}-aiplatform.googleapis.com/")
}

/// Project/location scope prefixed onto relative paths on the IAM backend.
#[derive(Debug, Clone)]
pub struct ResourceScope {
    pub project: String,
    pub location: String,
}

/// Executes requests against one of the two backends.
#[derive(Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    auth: AuthStrategy,
    scope: Option<ResourceScope>,
    options: HttpOptions,
}

impl ApiClient {
    /// Client for the consumer backend, authenticated with an API key.
    ///
    /// The key is installed as a static `x-goog-api-key` header; no
    /// credential exchange happens at call time.
    #[must_use]
    pub fn gemini(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let mut headers = base_headers();
        headers.insert(API_KEY_HEADER.to_string(), api_key.clone());

        Self {
            http: reqwest::Client::new(),
            auth: AuthStrategy::ApiKey(api_key),
            scope: None,
            options: HttpOptions {
                base_url: Some(GEMINI_BASE_URL.to_string()),
                api_version: Some(GEMINI_API_VERSION.to_string()),
                headers: Some(headers),
                response_capture: None,
            },
        }
    }

    /// Client for the IAM-authenticated backend.
    ///
    /// Tokens are fetched from `provider` lazily on first use and cached for
    /// the client's lifetime. Relative paths are scoped to
    /// `projects/{project}/locations/{location}/`.
    #[must_use]
    pub fn vertex(
        project: impl Into<String>,
        location: impl Into<String>,
        provider: std::sync::Arc<dyn TokenProvider>,
    ) -> Self {
        let location = location.into();

        Self {
            http: reqwest::Client::new(),
            auth: AuthStrategy::iam(provider),
            scope: Some(ResourceScope {
                project: project.into(),
                location: location.clone(),
            }),
            options: HttpOptions {
                base_url: Some(vertex_base_url(&location)),
                api_version: Some(VERTEX_API_VERSION.to_string()),
                headers: Some(base_headers()),
                response_capture: None,
            },
        }
    }

    /// Overrides parts of the base configuration.
    #[must_use]
    pub fn with_http_options(mut self, overrides: HttpOptions) -> Self {
        self.options = merge(&self.options, &overrides);
        self
    }

    fn resolve_request(
        &self,
        method: Method,
        path: &str,
        spec: &RequestSpec,
        options: Option<&HttpOptions>,
    ) -> Result<HttpRequest, Error> {
        let options = match options {
            Some(overrides) => merge(&self.options, overrides),
            None => self.options.clone(),
        };

        let mut path = expand_path(path, &spec.url_args)?;
        if let Some(scope) = &self.scope
            && !path.starts_with("projects/")
        {
            path = format!(
                "projects/{}/locations/{}/{path}",
                scope.project, scope.location
            );
        }

        let base_url = options
            .base_url
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("missing base URL".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let api_version = options
            .api_version
            .as_deref()
            .ok_or_else(|| Error::InvalidInput("missing API version".to_string()))?
            .trim_matches('/')
            .to_string();

        let mut url = format!("{base_url}/{api_version}/{path}");
        if !spec.query.is_empty() {
            let query = spec
                .query
                .iter()
                .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }

        Ok(HttpRequest {
            method,
            url,
            headers: options.headers.unwrap_or_default(),
            payload: spec
                .body
                .clone()
                .map_or(Payload::Empty, Payload::Json),
        })
    }

    async fn dispatch(&self, request: HttpRequest, streaming: bool) -> Result<ApiResponse, Error> {
        log::debug!("{} {}", request.method, request.url);

        let mut builder = self.http.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        // Upload chunks authenticate through the upload URL itself and carry
        // only the protocol headers.
        if !matches!(request.payload, Payload::Bytes(_))
            && let Some(token) = self.auth.bearer_token().await?
        {
            builder = builder.bearer_auth(token);
        }
        builder = match request.payload {
            Payload::Json(body) => builder.json(&body),
            Payload::Bytes(bytes) => builder.body(bytes),
            Payload::Empty => builder,
        };

        let response = check_response(builder.send().await?).await?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());

        if streaming {
            Ok(ApiResponse {
                status,
                headers,
                body: ResponseBody::Live(response),
            })
        } else {
            let text = response.text().await?;
            let segments = if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![text]
            };
            Ok(ApiResponse::buffered(status, headers, segments))
        }
    }
}

/// The contract the record/replay harness decorates: build a request, send
/// it. Implementors are interchangeable from the caller's perspective.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves a logical (method, path, spec) tuple into a concrete
    /// request, merging per-call options over the base configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for unresolved path placeholders or a
    /// configuration with no base address.
    fn build_request(
        &self,
        method: Method,
        path: &str,
        spec: &RequestSpec,
        options: Option<&HttpOptions>,
    ) -> Result<HttpRequest, Error>;

    /// Executes a request, returning a buffered or live response.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] for any non-2xx status, before the caller sees
    /// a response.
    async fn send(&self, request: HttpRequest, streaming: bool) -> Result<ApiResponse, Error>;
}

#[async_trait]
impl Transport for ApiClient {
    fn build_request(
        &self,
        method: Method,
        path: &str,
        spec: &RequestSpec,
        options: Option<&HttpOptions>,
    ) -> Result<HttpRequest, Error> {
        self.resolve_request(method, path, spec, options)
    }

    async fn send(&self, request: HttpRequest, streaming: bool) -> Result<ApiResponse, Error> {
        self.dispatch(request, streaming).await
    }
}

/// High-level calls provided for every [`Transport`].
#[async_trait]
pub trait TransportExt: Transport {
    /// Builds and sends a non-streaming request, returning the decoded body
    /// segment, or `None` when the body was empty.
    ///
    /// If the options carry a response-capture slot it is filled with the
    /// response status and headers.
    ///
    /// # Errors
    ///
    /// Propagates build, transport, and decode failures.
    async fn request(
        &self,
        method: Method,
        path: &str,
        spec: RequestSpec,
        options: Option<HttpOptions>,
    ) -> Result<Option<Value>, Error> {
        let http_request = self.build_request(method, path, &spec, options.as_ref())?;
        let response = self.send(http_request, false).await?;

        if let Some(capture) = options.as_ref().and_then(|o| o.response_capture.as_ref()) {
            capture.set(response.metadata());
        }

        let mut segments = response.into_segments();
        match segments.next().await {
            None => Ok(None),
            Some(segment) => Ok(Some(segment?)),
        }
    }

    /// Builds and sends a streaming request, returning a lazy sequence of
    /// decoded segments.
    ///
    /// A response-capture slot, if present, is populated only after the
    /// final segment; consumers must exhaust the stream before inspecting
    /// it.
    fn request_streamed<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        spec: RequestSpec,
        options: Option<HttpOptions>,
    ) -> BoxStream<'a, Result<Value, Error>>
    where
        Self: Sized,
    {
        let stream = try_stream! {
            let http_request = self.build_request(method, path, &spec, options.as_ref())?;
            let response = self.send(http_request, true).await?;
            let metadata = response.metadata();

            let mut segments = response.into_segments();
            while let Some(segment) = segments.next().await {
                yield segment?;
            }

            if let Some(capture) = options.as_ref().and_then(|o| o.response_capture.as_ref()) {
                capture.set(metadata);
            }
        };
        stream.boxed()
    }
}

impl<T: Transport + ?Sized> TransportExt for T {}

/// Substitutes `{placeholder}` slots in a path from `url_args`.
fn expand_path(path: &str, url_args: &HashMap<String, String>) -> Result<String, Error> {
    let mut expanded = path.to_string();
    for (key, value) in url_args {
        expanded = expanded.replace(&format!("{{{key}}}"), value);
    }
    if expanded.contains('{') {
        return Err(Error::InvalidInput(format!(
            "unresolved placeholder in path: {expanded}"
        )));
    }
    Ok(expanded)
}

fn base_headers() -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    append_sdk_headers(&mut headers);
    headers
}
