//! In-memory transport that replays scripted responses.
//!
//! Useful for offline tests: every request is recorded, and responses are served in
//! the order they were pushed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream;

use super::{
    HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport, TransportError,
};

/// One scripted reply.
#[derive(Debug)]
pub enum ScriptedResponse {
    /// A complete response body.
    Body {
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    },
    /// A body delivered in chunks; a chunk may be a transport failure.
    Chunks {
        status: u16,
        headers: HashMap<String, String>,
        chunks: Vec<Result<Vec<u8>, TransportError>>,
    },
    /// The request fails before any response arrives.
    Fail(TransportError),
}

impl ScriptedResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self::Body {
            status,
            headers: HashMap::new(),
            body: body.into().into_bytes(),
        }
    }

    /// SSE body split into the given chunks.
    pub fn sse<I, S>(status: u16, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Chunks {
            status,
            headers: HashMap::from([(
                "content-type".to_string(),
                "text/event-stream".to_string(),
            )]),
            chunks: chunks
                .into_iter()
                .map(|chunk| Ok(chunk.into().into_bytes()))
                .collect(),
        }
    }

    pub fn fail(error: TransportError) -> Self {
        Self::Fail(error)
    }

    /// Adds a response header; ignored for [`ScriptedResponse::Fail`].
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self {
            Self::Body { headers, .. } | Self::Chunks { headers, .. } => {
                headers.insert(name.into(), value.into());
            }
            Self::Fail(_) => {}
        }
        self
    }
}

/// Transport backed by a queue of [`ScriptedResponse`] values.
#[derive(Default)]
pub struct MemoryTransport {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response for a future request.
    pub fn push(&self, response: ScriptedResponse) {
        lock(&self.responses).push_back(response);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Number of scripted responses not yet consumed.
    pub fn remaining(&self) -> usize {
        lock(&self.responses).len()
    }

    fn next(&self, request: HttpRequest) -> Result<ScriptedResponse, TransportError> {
        let url = request.url.clone();
        lock(&self.requests).push(request);
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| TransportError::Connect {
                message: format!("no scripted response left for {url}"),
            })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl HttpTransport for MemoryTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        match self.next(request)? {
            ScriptedResponse::Body {
                status,
                headers,
                body,
            } => Ok(HttpResponse {
                status,
                headers,
                body,
            }),
            ScriptedResponse::Chunks {
                status,
                headers,
                chunks,
            } => {
                let mut body = Vec::new();
                for chunk in chunks {
                    body.extend_from_slice(&chunk?);
                }
                Ok(HttpResponse {
                    status,
                    headers,
                    body,
                })
            }
            ScriptedResponse::Fail(err) => Err(err),
        }
    }

    async fn send_stream(
        &self,
        request: HttpRequest,
    ) -> Result<HttpStreamResponse, TransportError> {
        match self.next(request)? {
            ScriptedResponse::Body {
                status,
                headers,
                body,
            } => {
                let body: HttpBodyStream = Box::pin(stream::iter(vec![Ok(body)]));
                Ok(HttpStreamResponse {
                    status,
                    headers,
                    body,
                })
            }
            ScriptedResponse::Chunks {
                status,
                headers,
                chunks,
            } => {
                let body: HttpBodyStream = Box::pin(stream::iter(chunks));
                Ok(HttpStreamResponse {
                    status,
                    headers,
                    body,
                })
            }
            ScriptedResponse::Fail(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_and_records_requests() {
        let transport = MemoryTransport::new();
        transport.push(ScriptedResponse::json(429, "{}").with_header("retry-after", "3"));
        transport.push(ScriptedResponse::json(200, "ok"));

        let first = transport
            .send(HttpRequest::post_json("https://a.test/1", Vec::new()))
            .await
            .expect("first");
        assert_eq!(first.status, 429);
        assert_eq!(first.headers.get("retry-after"), Some(&"3".to_string()));

        let second = transport
            .send(HttpRequest::post_json("https://a.test/2", Vec::new()))
            .await
            .expect("second");
        assert_eq!(second.into_string().expect("utf8"), "ok");

        let urls: Vec<_> = transport.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["https://a.test/1", "https://a.test/2"]);
        assert_eq!(transport.remaining(), 0);
    }

    #[tokio::test]
    async fn empty_queue_is_a_connection_failure() {
        let transport = MemoryTransport::new();
        let err = transport
            .send(HttpRequest::post_json("https://a.test", Vec::new()))
            .await
            .expect_err("no responses queued");
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
