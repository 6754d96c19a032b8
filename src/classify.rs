//! Maps backend-native failures onto [`ErrorKind`].
//!
//! Each backend contributes an ordered [`RuleSet`]. Rules are evaluated top to
//! bottom and the first match wins; structured checks (native error class) come
//! before message heuristics. Anything unmatched becomes
//! [`ErrorKind::ProviderSpecific`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{
    ClassifiedError, ErrorKind, ErrorSource, extract_model_identifier,
    looks_like_token_limit_error,
};
use crate::http::TransportError;
use crate::provider::{anthropic, google, openai};

/// Coarse native error category, mirroring the exception families vendor SDKs expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeErrorClass {
    Authentication,
    PermissionDenied,
    RateLimit,
    Connection,
    Timeout,
    NotFound,
    BadRequest,
    Server,
    Unknown,
}

impl NativeErrorClass {
    /// Derives the class from an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 413 | 422 => NativeErrorClass::BadRequest,
            401 => NativeErrorClass::Authentication,
            403 => NativeErrorClass::PermissionDenied,
            404 => NativeErrorClass::NotFound,
            408 => NativeErrorClass::Timeout,
            429 => NativeErrorClass::RateLimit,
            500..=599 => NativeErrorClass::Server,
            _ => NativeErrorClass::Unknown,
        }
    }

    /// Derives the class from a vendor error type such as `rate_limit_error` or
    /// `invalid_request_error`, used for errors delivered inside a stream.
    pub fn from_type_hint(hint: &str) -> Self {
        let hint = hint.to_ascii_lowercase();
        if hint.contains("authentication") || hint.contains("invalid_api_key") {
            NativeErrorClass::Authentication
        } else if hint.contains("permission") {
            NativeErrorClass::PermissionDenied
        } else if hint.contains("rate_limit") {
            NativeErrorClass::RateLimit
        } else if hint.contains("not_found") {
            NativeErrorClass::NotFound
        } else if hint.contains("invalid_request") {
            NativeErrorClass::BadRequest
        } else if hint.contains("timeout") {
            NativeErrorClass::Timeout
        } else if hint.contains("overloaded") || hint.contains("server") || hint == "api_error" {
            NativeErrorClass::Server
        } else {
            NativeErrorClass::Unknown
        }
    }

    /// SDK-style exception name used when the backend supplies none.
    pub fn type_name(self) -> &'static str {
        match self {
            NativeErrorClass::Authentication => "AuthenticationError",
            NativeErrorClass::PermissionDenied => "PermissionDeniedError",
            NativeErrorClass::RateLimit => "RateLimitError",
            NativeErrorClass::Connection => "APIConnectionError",
            NativeErrorClass::Timeout => "APITimeoutError",
            NativeErrorClass::NotFound => "NotFoundError",
            NativeErrorClass::BadRequest => "BadRequestError",
            NativeErrorClass::Server => "InternalServerError",
            NativeErrorClass::Unknown => "APIError",
        }
    }
}

/// Backend-native view of a failure before classification.
#[derive(Debug, Clone)]
pub struct RawBackendError {
    pub class: NativeErrorClass,
    pub type_name: String,
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub source: Option<ErrorSource>,
}

impl RawBackendError {
    pub fn new(class: NativeErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            type_name: class.type_name().to_string(),
            status: None,
            code: None,
            message: message.into(),
            retry_after: None,
            source: None,
        }
    }

    /// Error for a non-2xx HTTP response.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let mut raw = Self::new(NativeErrorClass::from_status(status), message);
        raw.status = Some(status);
        raw
    }

    /// Error for a failure below HTTP (connect, timeout, body read).
    pub fn from_transport(error: TransportError) -> Self {
        let class = match &error {
            TransportError::Timeout { .. } => NativeErrorClass::Timeout,
            TransportError::Connect { .. } | TransportError::Body { .. } => {
                NativeErrorClass::Connection
            }
            TransportError::InvalidRequest { .. } => NativeErrorClass::Unknown,
        };
        let message = error.to_string();
        Self::new(class, message).with_source(Arc::new(error))
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn with_code(mut self, code: Option<String>) -> Self {
        self.code = code;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_source(mut self, source: ErrorSource) -> Self {
        self.source = Some(source);
        self
    }

    fn mentions_any(&self, needles: &[&str]) -> bool {
        let lower = self.message.to_lowercase();
        needles.iter().any(|needle| lower.contains(needle))
    }

    fn is_untyped(&self) -> bool {
        matches!(
            self.class,
            NativeErrorClass::BadRequest | NativeErrorClass::Unknown
        )
    }
}

/// Predicate over a raw error.
pub type RulePredicate = fn(&RawBackendError) -> bool;

/// One `(predicate, kind)` entry of a [`RuleSet`].
#[derive(Clone, Copy)]
pub struct ClassificationRule {
    /// Stable identifier, handy in tests and logs.
    pub name: &'static str,
    pub kind: ErrorKind,
    /// Message prefix phrase, e.g. `"rate limit exceeded"`.
    pub phrase: &'static str,
    pub matches: RulePredicate,
}

impl ClassificationRule {
    pub const fn new(
        name: &'static str,
        kind: ErrorKind,
        phrase: &'static str,
        matches: RulePredicate,
    ) -> Self {
        Self {
            name,
            kind,
            phrase,
            matches,
        }
    }
}

/// Ordered classification table for one backend.
pub struct RuleSet {
    /// Backend identifier, e.g. `openai`.
    pub provider: &'static str,
    /// Human-facing name used in messages, e.g. `OpenAI`.
    pub display_name: &'static str,
    pub rules: &'static [ClassificationRule],
}

impl RuleSet {
    /// First rule matching `raw`, if any.
    pub fn matching_rule(&self, raw: &RawBackendError) -> Option<&ClassificationRule> {
        self.rules.iter().find(|rule| (rule.matches)(raw))
    }

    /// Classifies under this table's own provider name.
    pub fn classify(&self, raw: &RawBackendError) -> ClassifiedError {
        self.classify_as(self.provider, self.display_name, raw)
    }

    fn classify_as(
        &self,
        provider: &str,
        display_name: &str,
        raw: &RawBackendError,
    ) -> ClassifiedError {
        let native = raw.message.trim();
        let (kind, message) = if native.is_empty() {
            (
                ErrorKind::ProviderSpecific,
                format!(
                    "{display_name} error ({}): no error message returned",
                    raw.type_name
                ),
            )
        } else {
            match self.matching_rule(raw) {
                Some(rule) => (rule.kind, format!("{display_name} {}: {native}", rule.phrase)),
                None => (
                    ErrorKind::ProviderSpecific,
                    format!("{display_name} error ({}): {native}", raw.type_name),
                ),
            }
        };

        let mut error = ClassifiedError::new(kind, provider, message)
            .with_detail("type", raw.type_name.clone());
        if let Some(status) = raw.status {
            error = error.with_detail("status", status);
        }
        if let Some(code) = &raw.code {
            error = error.with_detail("code", code.clone());
        }
        if let Some(retry_after) = raw.retry_after {
            error = error.with_detail("retry_after_secs", Value::from(retry_after.as_secs_f64()));
        }
        if kind == ErrorKind::ModelNotFound {
            if let Some(model) = extract_model_identifier(native) {
                error = error.with_detail("model", model);
            }
        }
        if let Some(source) = &raw.source {
            error = error.with_source(Arc::clone(source));
        }
        error
    }
}

/// Rules for backends with SDK-style typed errors (OpenAI, Anthropic, and any backend
/// without a table of its own): billing hints first, then the error class, then
/// context-window detection inside bad requests.
pub(crate) static TYPED_SDK_RULES: &[ClassificationRule] = &[
    ClassificationRule::new(
        "insufficient_credits",
        ErrorKind::InsufficientCredits,
        "insufficient credits",
        mentions_credit_exhaustion,
    ),
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
        "bad_request_context",
        ErrorKind::ContextWindowExceeded,
        "context window exceeded",
        is_bad_request_about_context,
    ),
    ClassificationRule::new(
        "bad_request",
        ErrorKind::Validation,
        "validation error",
        is_bad_request_class,
    ),
];

static GENERIC: RuleSet = RuleSet {
    provider: "generic",
    display_name: "Provider",
    rules: TYPED_SDK_RULES,
};

/// Rule table registered for a backend name.
pub fn rule_set_for(backend: &str) -> Option<&'static RuleSet> {
    match backend {
        "openai" => Some(&openai::OPENAI_RULES),
        "anthropic" => Some(&anthropic::ANTHROPIC_RULES),
        "google" => Some(&google::GOOGLE_RULES),
        _ => None,
    }
}

/// Classifies a raw failure reported by `backend`.
///
/// Pure: the same inputs always yield an equal [`ClassifiedError`]. Unknown backends
/// fall back to the typed-error rules and keep their own name.
///
/// # Examples
///
/// ```
/// use llm_connectivity::classify::{classify, RawBackendError};
/// use llm_connectivity::ErrorKind;
///
/// let raw = RawBackendError::from_status(429, "Too many requests");
/// let err = classify("openai", &raw);
/// assert_eq!(err.kind(), ErrorKind::RateLimit);
/// assert_eq!(err.message(), "OpenAI rate limit exceeded: Too many requests");
/// ```
pub fn classify(backend: &str, raw: &RawBackendError) -> ClassifiedError {
    match rule_set_for(backend) {
        Some(rules) => rules.classify(raw),
        None => GENERIC.classify_as(backend, backend, raw),
    }
}

pub(crate) fn is_auth_class(raw: &RawBackendError) -> bool {
    matches!(
        raw.class,
        NativeErrorClass::Authentication | NativeErrorClass::PermissionDenied
    )
}

pub(crate) fn is_rate_limit_class(raw: &RawBackendError) -> bool {
    raw.class == NativeErrorClass::RateLimit
}

pub(crate) fn is_network_class(raw: &RawBackendError) -> bool {
    matches!(
        raw.class,
        NativeErrorClass::Connection | NativeErrorClass::Timeout
    )
}

pub(crate) fn is_not_found_class(raw: &RawBackendError) -> bool {
    raw.class == NativeErrorClass::NotFound
}

pub(crate) fn is_bad_request_class(raw: &RawBackendError) -> bool {
    raw.class == NativeErrorClass::BadRequest
}

pub(crate) fn is_bad_request_about_context(raw: &RawBackendError) -> bool {
    is_bad_request_class(raw)
        && (looks_like_token_limit_error(raw.code.as_deref(), &raw.message)
            || raw.mentions_any(&["context", "token"]))
}

pub(crate) fn mentions_credit_exhaustion(raw: &RawBackendError) -> bool {
    raw.code.as_deref() == Some("insufficient_quota")
        || raw.mentions_any(&[
            "insufficient_quota",
            "credit balance is too low",
            "insufficient credits",
        ])
}

pub(crate) fn mentions_authentication(raw: &RawBackendError) -> bool {
    raw.is_untyped() && raw.mentions_any(&["401", "authentication", "api key"])
}

pub(crate) fn mentions_rate_limit(raw: &RawBackendError) -> bool {
    raw.is_untyped() && raw.mentions_any(&["429", "rate limit", "quota"])
}

pub(crate) fn mentions_missing_model(raw: &RawBackendError) -> bool {
    raw.is_untyped() && raw.mentions_any(&["404", "not found", "model"])
}

pub(crate) fn mentions_context_overflow(raw: &RawBackendError) -> bool {
    raw.is_untyped() && raw.mentions_any(&["context", "too long", "maximum"])
}

pub(crate) fn mentions_invalid_request(raw: &RawBackendError) -> bool {
    raw.is_untyped() && raw.mentions_any(&["400", "invalid", "bad request"])
}

pub(crate) fn mentions_network(raw: &RawBackendError) -> bool {
    raw.is_untyped() && raw.mentions_any(&["timeout", "connection"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_idempotent() {
        let raw = RawBackendError::from_status(400, "This model's maximum context length is 8k")
            .with_code(Some("context_length_exceeded".to_string()));
        let first = classify("openai", &raw);
        let second = classify("openai", &raw);
        assert_eq!(first, second);
        assert_eq!(first.kind(), ErrorKind::ContextWindowExceeded);
    }

    #[test]
    fn empty_message_is_provider_specific() {
        let raw = RawBackendError::from_status(401, "   ");
        let err = classify("anthropic", &raw);
        assert_eq!(err.kind(), ErrorKind::ProviderSpecific);
        assert!(!err.message().is_empty());
        assert_eq!(err.provider(), "anthropic");
    }

    #[test]
    fn unmatched_error_keeps_type_name() {
        let raw = RawBackendError::from_status(503, "upstream overloaded");
        let err = classify("openai", &raw);
        assert_eq!(err.kind(), ErrorKind::ProviderSpecific);
        assert_eq!(
            err.message(),
            "OpenAI error (InternalServerError): upstream overloaded"
        );
        assert_eq!(err.details().get("status"), Some(&Value::from(503)));
    }

    #[test]
    fn transport_failures_are_network() {
        let raw = RawBackendError::from_transport(TransportError::Timeout {
            message: "deadline elapsed".to_string(),
        });
        let err = classify("anthropic", &raw);
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.original().is_some());
    }

    #[test]
    fn unknown_backend_uses_typed_rules() {
        let raw = RawBackendError::from_status(401, "bad key");
        let err = classify("mistral", &raw);
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert_eq!(err.provider(), "mistral");
        assert_eq!(err.message(), "mistral authentication failed: bad key");

        let raw = RawBackendError::from_status(429, "Your credit balance is too low");
        let err = classify("mistral", &raw);
        assert_eq!(err.kind(), ErrorKind::InsufficientCredits);
    }

    #[test]
    fn retry_after_and_model_land_in_details() {
        let raw = RawBackendError::from_status(429, "slow down")
            .with_retry_after(Some(Duration::from_secs(12)));
        let err = classify("openai", &raw);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));

        let raw = RawBackendError::from_status(404, "The model `gpt-9` does not exist");
        let err = classify("openai", &raw);
        assert_eq!(err.kind(), ErrorKind::ModelNotFound);
        assert_eq!(err.details().get("model"), Some(&Value::from("gpt-9")));
    }

    #[test]
    fn message_heuristics_skip_typed_errors() {
        let raw = RawBackendError::from_status(503, "The model is overloaded");
        assert!(!mentions_missing_model(&raw));

        let raw = RawBackendError::new(NativeErrorClass::Unknown, "model xyz unavailable");
        assert!(mentions_missing_model(&raw));
    }

    #[test]
    fn vendor_type_hints() {
        assert_eq!(
            NativeErrorClass::from_type_hint("rate_limit_error"),
            NativeErrorClass::RateLimit
        );
        assert_eq!(
            NativeErrorClass::from_type_hint("overloaded_error"),
            NativeErrorClass::Server
        );
        assert_eq!(
            NativeErrorClass::from_type_hint("invalid_request_error"),
            NativeErrorClass::BadRequest
        );
        assert_eq!(
            NativeErrorClass::from_type_hint("something_else"),
            NativeErrorClass::Unknown
        );
    }

    #[test]
    fn credit_exhaustion_matches_code_or_message() {
        let raw = RawBackendError::from_status(429, "You exceeded your current quota")
            .with_code(Some("insufficient_quota".to_string()));
        assert!(mentions_credit_exhaustion(&raw));

        let raw = RawBackendError::from_status(400, "Your credit balance is too low");
        assert!(mentions_credit_exhaustion(&raw));

        let raw = RawBackendError::from_status(429, "Too many requests");
        assert!(!mentions_credit_exhaustion(&raw));
    }
}
