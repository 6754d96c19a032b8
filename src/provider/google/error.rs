use std::time::Duration;

use crate::classify::{
    ClassificationRule, NativeErrorClass, RawBackendError, RuleSet, is_auth_class,
    is_network_class, is_not_found_class, is_rate_limit_class, mentions_authentication,
    mentions_context_overflow, mentions_invalid_request, mentions_missing_model,
    mentions_network, mentions_rate_limit,
};
use crate::error::ErrorKind;

use super::types::{GoogleErrorBody, GoogleErrorEnvelope};

/// Google errors carry little structure, so after the class checks the table falls
/// back to message heuristics. Those only apply to untyped (bad request or unknown)
/// errors, which keeps server failures out of the keyword matches.
static GOOGLE_RULE_LIST: &[ClassificationRule] = &[
    ClassificationRule::new(
        "auth_class",
        ErrorKind::Authentication,
        "authentication failed",
        is_auth_class,
    ),
    ClassificationRule::new(
        "rate_limit_class",
        ErrorKind::RateLimit,
        "rate limit exceeded",
        is_rate_limit_class,
    ),
    ClassificationRule::new(
        "network_class",
        ErrorKind::Network,
        "connection error",
        is_network_class,
    ),
    ClassificationRule::new(
        "not_found_class",
        ErrorKind::ModelNotFound,
        "model not found",
        is_not_found_class,
    ),
    ClassificationRule::new(
        "mentions_authentication",
        ErrorKind::Authentication,
        "authentication failed",
        mentions_authentication,
    ),
    ClassificationRule::new(
        "mentions_rate_limit",
        ErrorKind::RateLimit,
        "rate limit exceeded",
        mentions_rate_limit,
    ),
    ClassificationRule::new(
        "mentions_missing_model",
        ErrorKind::ModelNotFound,
        "model not found",
        mentions_missing_model,
    ),
    ClassificationRule::new(
        "mentions_context_overflow",
        ErrorKind::ContextWindowExceeded,
        "context window exceeded",
        mentions_context_overflow,
    ),
    ClassificationRule::new(
        "mentions_invalid_request",
        ErrorKind::Validation,
        "validation error",
        mentions_invalid_request,
    ),
    ClassificationRule::new(
        "mentions_network",
        ErrorKind::Network,
        "connection error",
        mentions_network,
    ),
];

/// Classification table for Google AI failures.
pub static GOOGLE_RULES: RuleSet = RuleSet {
    provider: "google",
    display_name: "Google AI",
    rules: GOOGLE_RULE_LIST,
};

/// Maps a canonical RPC status name (`RESOURCE_EXHAUSTED`, ...) to a class.
fn class_from_rpc_status(status: &str) -> NativeErrorClass {
    match status {
        "UNAUTHENTICATED" => NativeErrorClass::Authentication,
        "PERMISSION_DENIED" => NativeErrorClass::PermissionDenied,
        "RESOURCE_EXHAUSTED" => NativeErrorClass::RateLimit,
        "NOT_FOUND" => NativeErrorClass::NotFound,
        "INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "OUT_OF_RANGE" => {
            NativeErrorClass::BadRequest
        }
        "DEADLINE_EXCEEDED" => NativeErrorClass::Timeout,
        "UNAVAILABLE" | "INTERNAL" => NativeErrorClass::Server,
        _ => NativeErrorClass::Unknown,
    }
}

/// Parses a non-2xx Gemini API response.
///
/// The native message is prefixed with the HTTP status (`"400 API key not valid"`),
/// the same shape the vendor SDK reports.
pub(crate) fn parse_google_error(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> RawBackendError {
    let parsed = serde_json::from_str::<GoogleErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);

    let (message, code) = match parsed {
        Some(error) => {
            let message = match error.message.as_deref().map(str::trim) {
                Some(message) if !message.is_empty() => format!("{status} {message}"),
                _ => fallback_message(status, body),
            };
            (message, error.status)
        }
        None => (fallback_message(status, body), None),
    };

    RawBackendError::from_status(status, message)
        .with_code(code)
        .with_retry_after(retry_after)
}

/// Error object delivered inside a stream chunk.
pub(crate) fn stream_error(error: GoogleErrorBody) -> RawBackendError {
    let class = match (error.code, error.status.as_deref()) {
        (Some(code), _) => NativeErrorClass::from_status(code),
        (None, Some(status)) => class_from_rpc_status(status),
        (None, None) => NativeErrorClass::Unknown,
    };
    let message = match (error.code, error.message) {
        (Some(code), Some(message)) => format!("{code} {message}"),
        (None, Some(message)) => message,
        (_, None) => String::new(),
    };
    let mut raw = RawBackendError::new(class, message).with_code(error.status);
    raw.status = error.code;
    raw
}

fn fallback_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("{status} empty response body")
    } else {
        format!("{status} {body}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::error::ClassifiedError;
    use crate::http::TransportError;

    fn classify_body(status: u16, rpc: &str, message: &str) -> ClassifiedError {
        let body = format!(
            r#"{{"error":{{"code":{status},"message":"{message}","status":"{rpc}"}}}}"#
        );
        GOOGLE_RULES.classify(&parse_google_error(status, &body, None))
    }

    #[test]
    fn invalid_key_reported_as_bad_request_is_authentication() {
        let err = classify_body(
            400,
            "INVALID_ARGUMENT",
            "API key not valid. Please pass a valid API key.",
        );
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(
            err.message(),
            "Google AI authentication failed: 400 API key not valid. Please pass a valid API key."
        );
        assert_eq!(
            err.details().get("code"),
            Some(&serde_json::Value::from("INVALID_ARGUMENT"))
        );
    }

    #[test]
    fn status_classes_come_first() {
        assert_eq!(
            classify_body(429, "RESOURCE_EXHAUSTED", "Resource has been exhausted").kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(
            classify_body(404, "NOT_FOUND", "models/gemini-9 is not found for API version v1beta").kind(),
            ErrorKind::ModelNotFound
        );
        assert_eq!(
            classify_body(403, "PERMISSION_DENIED", "Permission denied").kind(),
            ErrorKind::Authentication
        );
    }

    #[test]
    fn bad_request_heuristics() {
        assert_eq!(
            classify_body(
                400,
                "INVALID_ARGUMENT",
                "The input token count exceeds the maximum number of tokens allowed"
            )
            .kind(),
            ErrorKind::ContextWindowExceeded
        );
        assert_eq!(
            classify_body(400, "INVALID_ARGUMENT", "Request contains an invalid argument.").kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn server_errors_skip_heuristics() {
        let err = classify_body(500, "INTERNAL", "An internal error has occurred. Invalid state.");
        assert_eq!(err.kind(), ErrorKind::ProviderSpecific);
        assert!(err.message().starts_with("Google AI error (InternalServerError): 500"));
    }

    #[test]
    fn transport_failure_is_network() {
        let raw = RawBackendError::from_transport(TransportError::Timeout {
            message: "deadline elapsed".to_string(),
        });
        assert_eq!(classify("google", &raw).kind(), ErrorKind::Network);
    }

    #[test]
    fn stream_error_uses_rpc_status_without_code() {
        let raw = stream_error(GoogleErrorBody {
            code: None,
            message: Some("Quota exceeded".to_string()),
            status: Some("RESOURCE_EXHAUSTED".to_string()),
        });
        assert_eq!(GOOGLE_RULES.classify(&raw).kind(), ErrorKind::RateLimit);
    }
}
