use std::time::Duration;

use serde_json::Value;

use crate::classify::{NativeErrorClass, RawBackendError, RuleSet, TYPED_SDK_RULES};

use super::types::{OpenAiErrorBody, OpenAiErrorEnvelope};

/// Classification table for OpenAI failures.
pub static OPENAI_RULES: RuleSet = RuleSet {
    provider: "openai",
    display_name: "OpenAI",
    rules: TYPED_SDK_RULES,
};

/// Parses a non-2xx response from the OpenAI API.
pub(crate) fn parse_openai_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> RawBackendError {
    let parsed = serde_json::from_str::<OpenAiErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);

    match parsed {
        Some(error) => {
            let code = error_code(&error);
            let message = error
                .message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| fallback_message(status, body));
            RawBackendError::from_status(status, message)
                .with_code(code)
                .with_retry_after(retry_after)
        }
        None => RawBackendError::from_status(status, fallback_message(status, body))
            .with_retry_after(retry_after),
    }
}

/// Error object delivered inside a stream chunk.
pub(crate) fn stream_error(error: OpenAiErrorBody) -> RawBackendError {
    let class = error
        .kind
        .as_deref()
        .map(NativeErrorClass::from_type_hint)
        .unwrap_or(NativeErrorClass::Unknown);
    let code = error_code(&error);
    RawBackendError::new(class, error.message.unwrap_or_default()).with_code(code)
}

fn error_code(error: &OpenAiErrorBody) -> Option<String> {
    match &error.code {
        Some(Value::String(code)) => Some(code.clone()),
        Some(Value::Number(code)) => Some(code.to_string()),
        _ => error.kind.clone(),
    }
}

fn fallback_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("status {status} with empty body")
    } else {
        format!("status {status}: {body}")
    }
}
