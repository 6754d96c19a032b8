use serde_json::Value;

use crate::error::ClassifiedError;
use crate::provider::decode_body;
use crate::stream::SseEvent;
use crate::types::StreamEvent;

use super::error::{ANTHROPIC_RULES, stream_error};
use super::types::AnthropicStreamEvent;

/// Finish reason used when `message_stop` arrives without a prior stop reason.
const FALLBACK_STOP_REASON: &str = "end_turn";

/// Stateful converter: text deltas pass through, the stop reason from
/// `message_delta` is held until `message_stop` closes the stream.
#[derive(Debug, Default)]
pub(crate) struct AnthropicStreamState {
    stop_reason: Option<String>,
}

impl AnthropicStreamState {
    pub(crate) fn convert(&mut self, event: SseEvent) -> Result<Vec<StreamEvent>, ClassifiedError> {
        let data = match event {
            SseEvent::Data(data) => data,
            SseEvent::Done => return Ok(vec![self.finish(None)]),
        };

        let raw: Option<Value> = serde_json::from_str(&data).ok();
        let event: AnthropicStreamEvent = decode_body("anthropic", &data)?;
        let events = match event {
            AnthropicStreamEvent::ContentBlockDelta { delta } => match delta.text {
                Some(text) if !text.is_empty() => vec![StreamEvent::delta(text, raw)],
                _ => Vec::new(),
            },
            AnthropicStreamEvent::MessageDelta { delta } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                Vec::new()
            }
            AnthropicStreamEvent::MessageStop => vec![self.finish(raw)],
            AnthropicStreamEvent::Error { error } => {
                return Err(ANTHROPIC_RULES.classify(&stream_error(error)));
            }
            AnthropicStreamEvent::MessageStart
            | AnthropicStreamEvent::ContentBlockStart
            | AnthropicStreamEvent::ContentBlockStop
            | AnthropicStreamEvent::Ping
            | AnthropicStreamEvent::Unknown => Vec::new(),
        };
        Ok(events)
    }

    fn finish(&mut self, raw: Option<Value>) -> StreamEvent {
        let reason = self
            .stop_reason
            .take()
            .unwrap_or_else(|| FALLBACK_STOP_REASON.to_string());
        StreamEvent::finish(reason, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn data(json: &str) -> SseEvent {
        SseEvent::Data(json.to_string())
    }

    #[test]
    fn full_event_sequence() {
        let mut state = AnthropicStreamState::default();
        let inputs = [
            r#"{"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":12,"output_tokens":1}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"max_tokens","stop_sequence":null},"usage":{"output_tokens":2}}"#,
            r#"{"type":"message_stop"}"#,
        ];

        let events: Vec<StreamEvent> = inputs
            .into_iter()
            .flat_map(|input| state.convert(data(input)).expect("event"))
            .collect();

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].delta, "Hi");
        assert_eq!(events[1].delta, " there");
        assert_eq!(events[2].finish_reason.as_deref(), Some("max_tokens"));
    }

    #[test]
    fn message_stop_without_reason_uses_end_turn() {
        let mut state = AnthropicStreamState::default();
        let events = state.convert(data(r#"{"type":"message_stop"}"#)).expect("ok");
        assert_eq!(events[0].finish_reason.as_deref(), Some("end_turn"));
    }

    #[test]
    fn error_event_is_classified() {
        let mut state = AnthropicStreamState::default();
        let err = state
            .convert(data(
                r#"{"type":"error","error":{"type":"rate_limit_error","message":"slow down"}}"#,
            ))
            .expect_err("error");
        assert_eq!(err.kind(), ErrorKind::RateLimit);
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let mut state = AnthropicStreamState::default();
        let events = state
            .convert(data(r#"{"type":"content_block_delta_v2","delta":{}}"#))
            .expect("ok");
        assert!(events.is_empty());
    }
}
