use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Backend-independent classification shared by diagnostics and the retry engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid or missing credentials.
    Authentication,
    /// Quota or request rate exceeded.
    RateLimit,
    /// The request does not fit in the model's context window.
    ContextWindowExceeded,
    /// Malformed request rejected by the provider.
    Validation,
    /// Timeouts and connection failures.
    Network,
    /// Unknown or inaccessible model.
    ModelNotFound,
    /// Billing or credit balance exhausted.
    InsufficientCredits,
    /// Anything no mapping rule recognized.
    ProviderSpecific,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::Authentication,
        ErrorKind::RateLimit,
        ErrorKind::ContextWindowExceeded,
        ErrorKind::Validation,
        ErrorKind::Network,
        ErrorKind::ModelNotFound,
        ErrorKind::InsufficientCredits,
        ErrorKind::ProviderSpecific,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ContextWindowExceeded => "context_window_exceeded",
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::ModelNotFound => "model_not_found",
            ErrorKind::InsufficientCredits => "insufficient_credits",
            ErrorKind::ProviderSpecific => "provider_specific",
        }
    }

    /// Whether the default strategy table retries this kind.
    ///
    /// Kinds that need the caller to change something (credentials, prompt size,
    /// model name, billing) are never retried.
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            ErrorKind::Authentication
                | ErrorKind::ContextWindowExceeded
                | ErrorKind::ModelNotFound
                | ErrorKind::InsufficientCredits
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Original backend-native error kept alongside a [`ClassifiedError`].
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// A backend failure tagged with exactly one [`ErrorKind`].
///
/// Adapters never surface raw transport or vendor errors; everything is funneled
/// through [`crate::classify`] into this shape so callers and the retry engine can
/// branch on [`ClassifiedError::kind`] alone.
///
/// # Examples
///
/// ```
/// use llm_connectivity::error::{ClassifiedError, ErrorKind};
///
/// let err = ClassifiedError::new(ErrorKind::RateLimit, "openai", "OpenAI rate limit exceeded: slow down")
///     .with_detail("status", 429);
/// assert_eq!(err.kind(), ErrorKind::RateLimit);
/// assert_eq!(err.provider(), "openai");
/// assert_eq!(err.details().get("status"), Some(&serde_json::json!(429)));
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message} [provider: {provider}]")]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    provider: String,
    #[source]
    source: Option<ErrorSource>,
    details: HashMap<String, Value>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            provider: provider.into(),
            source: None,
            details: HashMap::new(),
        }
    }

    /// Attaches the backend-native error that caused this failure.
    pub fn with_source(mut self, source: ErrorSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Adds one structured detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn details(&self) -> &HashMap<String, Value> {
        &self.details
    }

    /// The wrapped backend-native error, if one was available.
    pub fn original(&self) -> Option<&ErrorSource> {
        self.source.as_ref()
    }

    /// Wait duration suggested by the provider via `Retry-After`.
    ///
    /// Informational only: the retry engine follows its strategy table.
    pub fn retry_after(&self) -> Option<Duration> {
        self.details
            .get("retry_after_secs")
            .and_then(Value::as_f64)
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

/// Equality ignores the wrapped source, which has no meaningful identity.
impl PartialEq for ClassifiedError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.message == other.message
            && self.provider == other.provider
            && self.details == other.details
    }
}

/// Aggregates every failure mode exposed by the unified client.
///
/// Only [`LLMError::Classified`] comes from a backend; the other variants are local
/// mistakes and are never retried.
#[derive(Debug, Error)]
pub enum LLMError {
    /// A backend failure mapped into the taxonomy.
    #[error(transparent)]
    Classified(#[from] ClassifiedError),
    /// The selected provider lacks the requested capability (for example embeddings).
    #[error("provider {provider} does not support {capability}")]
    UnsupportedCapability {
        provider: &'static str,
        capability: &'static str,
    },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig {
        /// Name of the configuration field that failed validation.
        field: String,
        /// Additional context explaining why the field is invalid.
        reason: String,
    },
}

impl LLMError {
    /// Creates an [`LLMError::InvalidConfig`].
    ///
    /// # Examples
    ///
    /// ```
    /// use llm_connectivity::error::LLMError;
    ///
    /// let err = LLMError::invalid_config("selector", "missing '/'");
    /// assert_eq!(err.to_string(), "invalid configuration for selector: missing '/'");
    /// ```
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Taxonomy kind for backend failures, `None` for local errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            LLMError::Classified(err) => Some(err.kind()),
            _ => None,
        }
    }
}

/// Returns `true` when an error code or message suggests a context/window overflow.
pub(crate) fn looks_like_token_limit_error(code_hint: Option<&str>, message: &str) -> bool {
    if let Some(code) = code_hint {
        let lower = code.to_ascii_lowercase();
        if matches!(
            lower.as_str(),
            "context_length_exceeded"
                | "max_context_length_exceeded"
                | "prompt_tokens_exceeded"
                | "context_window_exceeded"
        ) {
            return true;
        }
    }

    let lower_message = message.to_ascii_lowercase();
    const HINTS: [&str; 6] = [
        "context length",
        "context window",
        "token limit",
        "maximum output tokens",
        "max output tokens",
        "prompt is too long",
    ];
    HINTS.iter().any(|needle| lower_message.contains(needle))
}

/// Attempts to extract a model identifier from an error payload.
pub(crate) fn extract_model_identifier(message: &str) -> Option<String> {
    for delimiter in ['`', '"', '\''] {
        if let Some(value) = between_delimiters(message, delimiter) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn between_delimiters(message: &str, delimiter: char) -> Option<String> {
    let start = message.find(delimiter)? + delimiter.len_utf8();
    let rel_end = message[start..].find(delimiter)?;
    Some(message[start..start + rel_end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_provider() {
        let err = ClassifiedError::new(
            ErrorKind::Network,
            "anthropic",
            "Anthropic connection error: reset by peer",
        );
        assert_eq!(
            err.to_string(),
            "Anthropic connection error: reset by peer [provider: anthropic]"
        );
    }

    #[test]
    fn non_retryable_kinds_match_policy() {
        let blocked: Vec<_> = ErrorKind::ALL
            .into_iter()
            .filter(|kind| !kind.is_retryable())
            .collect();
        assert_eq!(
            blocked,
            vec![
                ErrorKind::Authentication,
                ErrorKind::ContextWindowExceeded,
                ErrorKind::ModelNotFound,
                ErrorKind::InsufficientCredits,
            ]
        );
    }

    #[test]
    fn retry_after_reads_detail() {
        let err = ClassifiedError::new(ErrorKind::RateLimit, "openai", "slow down")
            .with_detail("retry_after_secs", 7);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        let err = ClassifiedError::new(ErrorKind::RateLimit, "openai", "slow down");
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn source_is_exposed_through_std_error() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline elapsed");
        let err = ClassifiedError::new(ErrorKind::Network, "google", "Google AI connection error")
            .with_source(Arc::new(io));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "deadline elapsed");
    }

    #[test]
    fn llm_error_kind_only_for_backend_failures() {
        let classified: LLMError =
            ClassifiedError::new(ErrorKind::Validation, "openai", "bad").into();
        assert_eq!(classified.kind(), Some(ErrorKind::Validation));

        let local = LLMError::UnsupportedCapability {
            provider: "anthropic",
            capability: "embeddings",
        };
        assert_eq!(local.kind(), None);
    }

    #[test]
    fn token_limit_hints() {
        assert!(looks_like_token_limit_error(
            Some("context_length_exceeded"),
            ""
        ));
        assert!(looks_like_token_limit_error(
            None,
            "This model's maximum context length is 8192 tokens; Context window full"
        ));
        assert!(!looks_like_token_limit_error(None, "invalid temperature"));
    }

    #[test]
    fn model_identifier_between_quotes() {
        assert_eq!(
            extract_model_identifier("The model `gpt-5-ultra` does not exist"),
            Some("gpt-5-ultra".to_string())
        );
        assert_eq!(
            extract_model_identifier("model: \"claude-bogus\" not found"),
            Some("claude-bogus".to_string())
        );
        assert_eq!(extract_model_identifier("no quotes here"), None);
    }
}
