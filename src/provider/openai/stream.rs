use crate::error::ClassifiedError;
use crate::provider::decode_body;
use crate::stream::SseEvent;
use crate::types::StreamEvent;

use super::error::{OPENAI_RULES, stream_error};
use super::types::OpenAiStreamChunk;

/// Maps one SSE payload onto zero or one [`StreamEvent`].
///
/// A chunk carrying a `finish_reason` becomes the terminal event (with whatever text
/// it also carried); `[DONE]` without a prior finish reason ends the stream as `stop`.
pub(crate) fn convert_sse_event(event: SseEvent) -> Result<Vec<StreamEvent>, ClassifiedError> {
    let data = match event {
        SseEvent::Done => return Ok(vec![StreamEvent::finish("stop", None)]),
        SseEvent::Data(data) => data,
    };

    let raw = serde_json::from_str(&data).ok();
    let chunk: OpenAiStreamChunk = decode_body("openai", &data)?;
    if let Some(error) = chunk.error {
        return Err(OPENAI_RULES.classify(&stream_error(error)));
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(Vec::new());
    };
    let text = choice
        .delta
        .and_then(|delta| delta.content)
        .unwrap_or_default();

    let event = match choice.finish_reason {
        Some(reason) => StreamEvent {
            delta: text,
            finish_reason: Some(reason),
            raw,
        },
        None if text.is_empty() => return Ok(Vec::new()),
        None => StreamEvent::delta(text, raw),
    };
    Ok(vec![event])
}
