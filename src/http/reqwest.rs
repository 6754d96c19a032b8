use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use reqwest::{Client, Method};

use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport, TransportError,
};

/// Default [`HttpTransport`] backed by reqwest.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wraps a caller-configured `reqwest::Client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a transport with a default client.
    pub fn default_client() -> Result<Self, TransportError> {
        Client::builder()
            .build()
            .map(Self::new)
            .map_err(|err| TransportError::InvalidRequest {
                message: format!("failed to create reqwest client: {err}"),
            })
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Post => Method::POST,
        }
    }

    /// Builds the reqwest request; `request.timeout` is applied by the caller.
    fn build_request(
        &self,
        mut request: HttpRequest,
    ) -> Result<reqwest::RequestBuilder, TransportError> {
        let method = Self::method(request.method);
        let mut builder = self.client.request(method, &request.url);

        for (name, value) in request.headers.drain() {
            let header_name =
                reqwest::header::HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                    TransportError::InvalidRequest {
                        message: format!("invalid header name: {err}"),
                    }
                })?;
            let header_value = reqwest::header::HeaderValue::from_str(&value).map_err(|err| {
                TransportError::InvalidRequest {
                    message: format!("invalid header value for {header_name}: {err}"),
                }
            })?;
            builder = builder.header(header_name, header_value);
        }

        if let Some(body) = request.body.take() {
            builder = builder.body(body);
        }

        Ok(builder)
    }

    fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

/// Awaits `future` for at most `limit`.
async fn within<T>(
    limit: Option<Duration>,
    future: impl Future<Output = Result<T, TransportError>>,
    phase: &str,
) -> Result<T, TransportError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| TransportError::Timeout {
                message: format!("no {phase} within {limit:?}"),
            })?,
        None => future.await,
    }
}

/// Applies `idle` to each read of the body instead of to the whole transfer, so a
/// long generation keeps streaming as long as chunks keep arriving.
fn idle_limited(body: HttpBodyStream, idle: Option<Duration>) -> HttpBodyStream {
    let Some(idle) = idle else {
        return body;
    };
    Box::pin(stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(body))),
            Ok(None) => None,
            Err(_) => Some((
                Err(TransportError::Timeout {
                    message: format!("no data received for {idle:?}"),
                }),
                None,
            )),
        }
    }))
}

/// Maps a reqwest failure onto [`TransportError`].
fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    let message = err.to_string();
    if err.is_timeout() {
        TransportError::Timeout { message }
    } else if err.is_body() || err.is_decode() {
        TransportError::Body { message }
    } else if err.is_builder() {
        TransportError::InvalidRequest { message }
    } else {
        TransportError::Connect { message }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self.build_request(request)?;
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body = response.bytes().await.map_err(map_reqwest_error)?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(
        &self,
        request: HttpRequest,
    ) -> Result<HttpStreamResponse, TransportError> {
        let timeout = request.timeout;
        let pending = self.build_request(request)?.send();
        let response = within(
            timeout,
            async { pending.await.map_err(map_reqwest_error) },
            "response headers",
        )
        .await?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(map_reqwest_error));
        let body = idle_limited(Box::pin(stream), timeout);

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Default transport behind an `Arc`.
pub fn default_dyn_transport() -> Result<DynHttpTransport, TransportError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
