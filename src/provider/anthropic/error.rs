use std::time::Duration;

use crate::classify::{NativeErrorClass, RawBackendError, RuleSet, TYPED_SDK_RULES};

use super::types::{AnthropicErrorBody, AnthropicErrorEnvelope};

/// Classification table for Anthropic failures.
pub static ANTHROPIC_RULES: RuleSet = RuleSet {
    provider: "anthropic",
    display_name: "Anthropic",
    rules: TYPED_SDK_RULES,
};

/// Parses error responses returned by the Anthropic Messages API.
///
/// The vendor error `type` (e.g. `overloaded_error`) is kept as the code.
pub(crate) fn parse_anthropic_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> RawBackendError {
    let parsed = serde_json::from_str::<AnthropicErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);

    let (message, code) = match parsed {
        Some(error) => (
            error
                .message
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| fallback_message(status, body)),
            error.kind,
        ),
        None => (fallback_message(status, body), None),
    };

    RawBackendError::from_status(status, message)
        .with_code(code)
        .with_retry_after(retry_after)
}

/// `error` event delivered mid-stream.
pub(crate) fn stream_error(error: AnthropicErrorBody) -> RawBackendError {
    let class = error
        .kind
        .as_deref()
        .map(NativeErrorClass::from_type_hint)
        .unwrap_or(NativeErrorClass::Unknown);
    RawBackendError::new(class, error.message.unwrap_or_default()).with_code(error.kind)
}

fn fallback_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("status {status} with empty body")
    } else {
        format!("status {status}: {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn classify(status: u16, kind: &str, message: &str) -> crate::error::ClassifiedError {
        let body = format!(
            r#"{{"type":"error","error":{{"type":"{kind}","message":"{message}"}}}}"#
        );
        ANTHROPIC_RULES.classify(&parse_anthropic_error(status, &body, None))
    }

    #[test]
    fn typed_errors() {
        assert_eq!(
            classify(401, "authentication_error", "invalid x-api-key").kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            classify(403, "permission_error", "no access").kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            classify(429, "rate_limit_error", "Number of requests exceeded").kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(
            classify(404, "not_found_error", "model: claude-bogus").kind(),
            ErrorKind::ModelNotFound
        );
        assert_eq!(
            classify(529, "overloaded_error", "Overloaded").kind(),
            ErrorKind::ProviderSpecific
        );
    }

    #[test]
    fn bad_request_split_by_message() {
        let err = classify(400, "invalid_request_error", "prompt is too long: 250000 tokens > 200000 maximum");
        assert_eq!(err.kind(), ErrorKind::ContextWindowExceeded);
        assert_eq!(
            err.message(),
            "Anthropic context window exceeded: prompt is too long: 250000 tokens > 200000 maximum"
        );

        let err = classify(400, "invalid_request_error", "temperature: range [0, 1]");
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = classify(400, "invalid_request_error", "Your credit balance is too low to access the Anthropic API");
        assert_eq!(err.kind(), ErrorKind::InsufficientCredits);
    }

    #[test]
    fn overloaded_stream_error() {
        let err = ANTHROPIC_RULES.classify(&stream_error(AnthropicErrorBody {
            kind: Some("overloaded_error".to_string()),
            message: Some("Overloaded".to_string()),
        }));
        assert_eq!(err.kind(), ErrorKind::ProviderSpecific);
        assert_eq!(err.message(), "Anthropic error (InternalServerError): Overloaded");
    }
}
