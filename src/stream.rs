//! Server-sent-event plumbing shared by the streaming adapters.
//!
//! [`SseDecoder`] turns a raw HTTP body into `data:` payloads, [`event_stream`] lets an
//! adapter map those payloads onto [`StreamEvent`] values, and [`TerminalGuard`]
//! enforces the stream protocol: a stream ends right after its finish-reason event or
//! its first error, and a body that closes without a finish reason surfaces as a
//! network error.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::{StreamExt, stream};
use tracing::trace;

use crate::classify::{RawBackendError, classify};
use crate::error::{ClassifiedError, ErrorKind};
use crate::http::{HttpBodyStream, TransportError};
use crate::provider::ChatStream;
use crate::types::StreamEvent;

/// One decoded SSE payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Raw `data:` payload emitted by the backend.
    Data(String),
    /// Terminal marker reported via `[DONE]`.
    Done,
}

/// Normalizes backend SSE feeds into [`SseEvent`] values.
pub struct SseDecoder {
    body: HttpBodyStream,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    pending: VecDeque<Result<SseEvent, TransportError>>,
    stream_closed: bool,
    done_received: bool,
}

impl SseDecoder {
    pub fn new(body: HttpBodyStream) -> Self {
        Self {
            body,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            pending: VecDeque::new(),
            stream_closed: false,
            done_received: false,
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if let Some(rest) = line.strip_prefix(b"data:") {
            let data = rest.strip_prefix(b" ").unwrap_or(rest);
            self.data_lines.push(data.to_vec());
        }
    }

    fn flush_event(&mut self) -> Result<(), TransportError> {
        if self.data_lines.is_empty() {
            return Ok(());
        }

        let joined = self.data_lines.drain(..).collect::<Vec<_>>().join(&b'\n');
        if joined.is_empty() {
            return Ok(());
        }

        let data = String::from_utf8(joined).map_err(|err| TransportError::Body {
            message: format!("invalid UTF-8 in stream chunk: {err}"),
        })?;

        if data.trim() == "[DONE]" {
            if !self.done_received {
                self.done_received = true;
                self.pending.push_back(Ok(SseEvent::Done));
            }
        } else {
            self.pending.push_back(Ok(SseEvent::Data(data)));
        }

        Ok(())
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

impl Stream for SseDecoder {
    type Item = Result<SseEvent, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(event) = this.pending.pop_front() {
            return Poll::Ready(Some(event));
        }

        if this.done_received {
            return Poll::Ready(None);
        }

        loop {
            if this.stream_closed {
                if !this.buffer.is_empty() {
                    let line = std::mem::take(&mut this.buffer);
                    this.handle_line(line);
                }
                if let Err(err) = this.flush_event() {
                    return Poll::Ready(Some(Err(err)));
                }
                return Poll::Ready(this.pending.pop_front());
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                    while let Some(line) = Self::drain_line(&mut this.buffer) {
                        if line.is_empty() {
                            if let Err(err) = this.flush_event() {
                                return Poll::Ready(Some(Err(err)));
                            }
                        } else {
                            this.handle_line(line);
                        }
                    }
                    if let Some(event) = this.pending.pop_front() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.stream_closed = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Reads a whole body, used for error payloads on failed stream requests.
pub(crate) async fn collect_stream_text(mut body: HttpBodyStream) -> Result<String, TransportError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| TransportError::Body {
        message: format!("failed to decode stream error body: {err}"),
    })
}

/// Builds a guarded [`ChatStream`] from an SSE body.
///
/// `convert` sees every SSE payload in order and may emit any number of events;
/// transport failures are classified under `provider`.
pub(crate) fn event_stream<F>(body: HttpBodyStream, provider: &'static str, mut convert: F) -> ChatStream
where
    F: FnMut(SseEvent) -> Result<Vec<StreamEvent>, ClassifiedError> + Send + 'static,
{
    let events = SseDecoder::new(body).flat_map(move |item| {
        let batch: Vec<Result<StreamEvent, ClassifiedError>> = match item {
            Ok(event) => {
                trace!(provider, ?event, "stream chunk");
                match convert(event) {
                    Ok(events) => events.into_iter().map(Ok).collect(),
                    Err(err) => vec![Err(err)],
                }
            }
            Err(err) => vec![Err(classify(provider, &RawBackendError::from_transport(err)))],
        };
        stream::iter(batch)
    });
    guard_stream(Box::pin(events), provider)
}

/// Wraps `inner` in a [`TerminalGuard`].
pub fn guard_stream(inner: ChatStream, provider: &'static str) -> ChatStream {
    Box::pin(TerminalGuard::new(inner, provider))
}

/// Enforces the finish-reason protocol on an adapter stream.
///
/// The inner stream is dropped as soon as the terminal event or an error has been
/// yielded, releasing its transport.
pub struct TerminalGuard {
    inner: Option<ChatStream>,
    provider: &'static str,
}

impl TerminalGuard {
    pub fn new(inner: ChatStream, provider: &'static str) -> Self {
        Self {
            inner: Some(inner),
            provider,
        }
    }

    fn premature_end(&self) -> ClassifiedError {
        ClassifiedError::new(
            ErrorKind::Network,
            self.provider,
            "stream closed before a finish reason was received",
        )
    }
}

impl Stream for TerminalGuard {
    type Item = Result<StreamEvent, ClassifiedError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(event))) => {
                if event.is_terminal() {
                    this.inner = None;
                }
                Poll::Ready(Some(Ok(event)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.inner = None;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.inner = None;
                Poll::Ready(Some(Err(this.premature_end())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn build_body(chunks: Vec<Result<Vec<u8>, TransportError>>) -> HttpBodyStream {
        Box::pin(stream::iter(chunks))
    }

    fn events(items: Vec<Result<StreamEvent, ClassifiedError>>) -> ChatStream {
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn decoder_emits_data_and_done_events() {
        let chunks = vec![
            Ok(b"data: {\"text\":\"hi\"}\n\n".to_vec()),
            Ok(b"data: [DONE]\n\n".to_vec()),
        ];
        let mut decoder = SseDecoder::new(build_body(chunks));

        let first = decoder.next().await.expect("event").expect("ok");
        assert_eq!(first, SseEvent::Data("{\"text\":\"hi\"}".to_string()));

        let second = decoder.next().await.expect("event").expect("ok");
        assert_eq!(second, SseEvent::Done);

        assert!(decoder.next().await.is_none());
    }

    #[tokio::test]
    async fn decoder_handles_split_and_batched_chunks() {
        let chunks = vec![
            Ok(b"event: ping\r\ndata: one\r\n\r\ndata: tw".to_vec()),
            Ok(b"o\n\ndata: three".to_vec()),
        ];
        let collected: Vec<_> = SseDecoder::new(build_body(chunks))
            .map(|event| event.expect("ok"))
            .collect()
            .await;
        assert_eq!(
            collected,
            vec![
                SseEvent::Data("one".to_string()),
                SseEvent::Data("two".to_string()),
                SseEvent::Data("three".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn decoder_combines_multiline_payloads() {
        let chunks = vec![
            Ok(b"data: line one\n".to_vec()),
            Ok(b"data: line two\n\n".to_vec()),
        ];
        let mut decoder = SseDecoder::new(build_body(chunks));
        let event = decoder.next().await.expect("event").expect("ok");
        assert_eq!(event, SseEvent::Data("line one\nline two".to_string()));
        assert!(decoder.next().await.is_none());
    }

    #[tokio::test]
    async fn decoder_reports_utf8_errors() {
        let chunks = vec![Ok(b"data: \xff\n\n".to_vec())];
        let mut decoder = SseDecoder::new(build_body(chunks));
        let err = decoder.next().await.expect("event").unwrap_err();
        assert!(matches!(err, TransportError::Body { .. }));
    }

    #[tokio::test]
    async fn guard_stops_after_terminal_event() {
        let inner = events(vec![
            Ok(StreamEvent::delta("Hi", None)),
            Ok(StreamEvent::finish("stop", None)),
            Ok(StreamEvent::delta("late", None)),
        ]);
        let collected: Vec<_> = guard_stream(inner, "openai").collect().await;
        assert_eq!(collected.len(), 2);
        assert_eq!(
            collected[1].as_ref().expect("terminal").finish_reason.as_deref(),
            Some("stop")
        );
    }

    #[tokio::test]
    async fn guard_reports_missing_finish_reason() {
        let inner = events(vec![Ok(StreamEvent::delta("partial", None))]);
        let collected: Vec<_> = guard_stream(inner, "anthropic").collect().await;
        assert_eq!(collected.len(), 2);
        let err = collected[1].as_ref().expect_err("premature end");
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.provider(), "anthropic");
    }

    #[tokio::test]
    async fn guard_ends_after_error() {
        let inner = events(vec![
            Err(ClassifiedError::new(ErrorKind::RateLimit, "openai", "slow down")),
            Ok(StreamEvent::finish("stop", None)),
        ]);
        let collected: Vec<_> = guard_stream(inner, "openai").collect().await;
        assert_eq!(collected.len(), 1);
        assert!(collected[0].is_err());
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn abandoning_stream_releases_body() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(released.clone());
        let body: HttpBodyStream = Box::pin(stream::iter(vec![
            Ok(b"data: {\"n\":1}\n\n".to_vec()),
            Ok(b"data: {\"n\":2}\n\n".to_vec()),
        ]).map(move |chunk| {
            let _keep = &flag;
            chunk
        }));

        let mut stream = event_stream(body, "openai", |_| Ok(vec![StreamEvent::delta("x", None)]));
        assert!(stream.next().await.is_some());
        assert!(!released.load(Ordering::SeqCst));
        drop(stream);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn transport_failure_mid_stream_is_classified() {
        let body = build_body(vec![
            Ok(b"data: {}\n\n".to_vec()),
            Err(TransportError::Connect {
                message: "reset by peer".to_string(),
            }),
        ]);
        let collected: Vec<_> = event_stream(body, "openai", |_| Ok(vec![StreamEvent::delta("a", None)]))
            .collect()
            .await;
        assert_eq!(collected.len(), 2);
        assert_eq!(
            collected[1].as_ref().expect_err("network").kind(),
            ErrorKind::Network
        );
    }
}
