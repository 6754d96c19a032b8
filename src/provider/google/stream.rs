use crate::error::ClassifiedError;
use crate::provider::decode_body;
use crate::stream::SseEvent;
use crate::types::StreamEvent;

use super::error::{GOOGLE_RULES, stream_error};
use super::types::GoogleGenerateResponse;

/// Maps one `streamGenerateContent` chunk onto zero or one [`StreamEvent`].
///
/// Gemini sends no `[DONE]` marker; the chunk whose candidate carries a
/// `finishReason` closes the stream. A prompt blocked outright closes it with the
/// block reason.
pub(crate) fn convert_sse_event(event: SseEvent) -> Result<Vec<StreamEvent>, ClassifiedError> {
    let data = match event {
        SseEvent::Done => return Ok(vec![StreamEvent::finish("stop", None)]),
        SseEvent::Data(data) => data,
    };

    let raw = serde_json::from_str(&data).ok();
    let chunk: GoogleGenerateResponse = decode_body("google", &data)?;
    if let Some(error) = chunk.error.clone() {
        return Err(GOOGLE_RULES.classify(&stream_error(error)));
    }

    let text = chunk.text().unwrap_or_default();
    let finish_reason = match chunk.finish_reason() {
        Some(reason) => Some(reason.to_ascii_lowercase()),
        None if chunk.candidates.is_empty() => chunk
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
            .map(str::to_ascii_lowercase),
        None => None,
    };

    let event = match finish_reason {
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
