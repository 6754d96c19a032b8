use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Serialize;
use thiserror::Error;

/// Backend-native transport failure, fed into classification by each adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established or was reset.
    #[error("connection failed: {message}")]
    Connect { message: String },
    /// The request exceeded its deadline.
    #[error("request timed out: {message}")]
    Timeout { message: String },
    /// Reading or decoding the response body failed.
    #[error("failed to read response body: {message}")]
    Body { message: String },
    /// The request could not be built (headers, serialization).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Enumerates HTTP methods understood by the lightweight transport abstraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Post,
}

/// Minimal HTTP request representation shared across providers.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Builds a POST request with a JSON request body.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_connectivity::http::{HttpMethod, HttpRequest};
    ///
    /// let request = HttpRequest::post_json("https://example.com", br"{}".to_vec());
    /// assert_eq!(request.method, HttpMethod::Post);
    /// assert_eq!(request.headers.get("Content-Type"), Some(&"application/json".to_string()));
    /// ```
    pub fn post_json(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: HashMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(body),
            timeout: None,
        }
    }

    /// Merges extra headers into the request; later values win.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Sets the request timeout. Plain requests must complete within it; streaming
    /// requests must deliver response headers, and then each body chunk, within it.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Minimal HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Converts the body into a UTF-8 string.
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_connectivity::http::HttpResponse;
    ///
    /// let response = HttpResponse { status: 200, headers: Default::default(), body: b"ok".to_vec() };
    /// assert_eq!(response.into_string().unwrap(), "ok");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Body`] when the body cannot be interpreted as UTF-8.
    pub fn into_string(self) -> Result<String, TransportError> {
        String::from_utf8(self.body).map_err(|err| TransportError::Body {
            message: err.to_string(),
        })
    }
}

/// HTTP response that carries a streaming body.
pub struct HttpStreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: HttpBodyStream,
}

/// Alias for the body stream returned by [`HttpTransport::send_stream`].
///
/// Dropping the stream releases the underlying connection.
pub type HttpBodyStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

/// Transport abstraction used to decouple providers from the concrete HTTP client.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends a request and resolves when the full response is available.
    ///
    /// # Errors
    ///
    /// Implementations report connection, timeout and body failures as
    /// [`TransportError`]; non-2xx statuses are *not* errors at this layer.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Sends a request and returns a streaming body.
    ///
    /// `request.timeout` bounds the wait for headers and the gap between chunks, never
    /// the total length of the stream.
    async fn send_stream(&self, request: HttpRequest)
    -> Result<HttpStreamResponse, TransportError>;
}

/// Thread-safe handle to a transport implementation.
pub type DynHttpTransport = Arc<dyn HttpTransport>;

fn encode_json<T: Serialize>(body: &T) -> Result<Vec<u8>, TransportError> {
    serde_json::to_vec(body).map_err(|err| TransportError::InvalidRequest {
        message: format!("failed to serialize request: {err}"),
    })
}

/// Serializes a body to JSON, attaches headers, and issues a POST request.
///
/// # Examples
///
/// ```
/// # use std::collections::HashMap;
/// # use llm_connectivity::http::{post_json_with_headers, HttpResponse};
/// # use llm_connectivity::http::memory::{MemoryTransport, ScriptedResponse};
/// # use serde_json::json;
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let transport = MemoryTransport::new();
/// transport.push(ScriptedResponse::json(200, r#"{"ok":true}"#));
///
/// let mut headers = HashMap::new();
/// headers.insert("X-Test".to_string(), "ok".to_string());
/// let response = post_json_with_headers(&transport, "https://example.com", headers, &json!({"ping": "pong"}), None)
///     .await
///     .unwrap();
/// assert_eq!(response.status, 200);
/// assert_eq!(transport.requests()[0].headers.get("X-Test"), Some(&"ok".to_string()));
/// # });
/// ```
///
/// # Errors
///
/// Returns [`TransportError::InvalidRequest`] if serialization fails or forwards the
/// error raised by [`HttpTransport::send`].
pub async fn post_json_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<HttpResponse, TransportError> {
    let payload = encode_json(body)?;
    let request = HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_timeout(timeout);
    transport.send(request).await
}

/// Issues a JSON POST request and returns the streaming response.
///
/// # Errors
///
/// Returns [`TransportError::InvalidRequest`] when serialization fails or propagates any
/// error from [`HttpTransport::send_stream`].
pub async fn post_json_stream_with_headers<T: Serialize>(
    transport: &dyn HttpTransport,
    url: impl Into<String>,
    headers: HashMap<String, String>,
    body: &T,
    timeout: Option<Duration>,
) -> Result<HttpStreamResponse, TransportError> {
    let payload = encode_json(body)?;
    let request = HttpRequest::post_json(url, payload)
        .with_headers(headers)
        .with_timeout(timeout);
    transport.send_stream(request).await
}

pub mod memory;
pub mod reqwest;
