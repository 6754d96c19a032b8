//! Shared data structures for chat, streaming and embedding calls.
//!
//! Every adapter converts its wire format into these types, so callers see the same
//! shape regardless of the backend that served the request. Results are created once
//! per call and owned by the caller.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backend-specific request parameters forwarded verbatim.
pub type Extra = HashMap<String, Value>;

/// Chat role string compatible with provider-specific semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl Role {
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn user() -> Self {
        Self("user".to_string())
    }

    pub fn assistant() -> Self {
        Self("assistant".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_system(&self) -> bool {
        self.0 == "system"
    }
}

/// One chat turn.
///
/// # Examples
///
/// ```
/// use llm_connectivity::types::{Message, Role};
///
/// let msg = Message::user("Hello");
/// assert_eq!(msg.role, Role::user());
/// assert_eq!(msg.content, "Hello");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::system(), content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::user(), content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::assistant(), content)
    }
}

/// Per-call chat knobs accepted by [`crate::client::LLMClient`].
///
/// `model` overrides the client's configured model for this call only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    /// Sampling temperature, defaults to `1.0`.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub extra: Extra,
}

fn default_temperature() -> f64 {
    1.0
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: None,
            temperature: default_temperature(),
            extra: Extra::new(),
        }
    }
}

impl ChatOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Adds one backend-specific parameter.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Per-call embedding knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingOptions {
    pub model: Option<String>,
    #[serde(default)]
    pub extra: Extra,
}

impl EmbeddingOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Fully resolved chat request handed to an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: f64,
    #[serde(default)]
    pub extra: Extra,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            max_tokens: None,
            temperature: default_temperature(),
            extra: Extra::new(),
        }
    }

    /// Applies per-call options on top of an already resolved model.
    pub fn from_options(messages: Vec<Message>, model: impl Into<String>, options: &ChatOptions) -> Self {
        Self {
            messages,
            model: model.into(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            extra: options.extra.clone(),
        }
    }
}

/// Fully resolved embedding request handed to an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    pub model: String,
    #[serde(default)]
    pub extra: Extra,
}

impl EmbeddingRequest {
    pub fn new(texts: Vec<String>, model: impl Into<String>) -> Self {
        Self {
            texts,
            model: model.into(),
            extra: Extra::new(),
        }
    }
}

/// Token accounting for one call.
///
/// `total_tokens` always equals `prompt_tokens + completion_tokens`. When the backend
/// reported no counts the adapter fills in a heuristic estimate and sets `estimated`;
/// such numbers (and any cost derived from them) are approximations only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub estimated: bool,
}

impl Usage {
    /// Backend-reported counts.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
            estimated: false,
        }
    }

    /// Heuristic counts, see [`TokenEstimator`].
    pub fn estimated(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            estimated: true,
            ..Self::new(prompt_tokens, completion_tokens)
        }
    }
}

/// Normalized non-streaming chat response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResult {
    pub content: String,
    /// Model identifier reported by the backend (or the requested one when it reports none).
    pub model: String,
    pub usage: Usage,
    /// Cost in USD; `None` when the model has no pricing entry.
    pub cost: Option<f64>,
    pub provider: String,
    /// Original backend payload, for debugging.
    pub raw: Option<Value>,
}

/// One increment of a streamed chat response.
///
/// Only the final event of a stream carries a `finish_reason`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub delta: String,
    pub finish_reason: Option<String>,
    pub raw: Option<Value>,
}

impl StreamEvent {
    pub fn delta(text: impl Into<String>, raw: Option<Value>) -> Self {
        Self {
            delta: text.into(),
            finish_reason: None,
            raw,
        }
    }

    pub fn finish(reason: impl Into<String>, raw: Option<Value>) -> Self {
        Self {
            delta: String::new(),
            finish_reason: Some(reason.into()),
            raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Normalized embedding response; `embeddings[i]` belongs to input text `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    /// `completion_tokens` is always zero.
    pub usage: Usage,
    pub cost: Option<f64>,
    pub provider: String,
    pub raw: Option<Value>,
}

/// What an adapter can do beyond plain chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub supports_stream: bool,
    pub supports_embeddings: bool,
}

/// Character-count token heuristic for backends that report no usage.
///
/// Roughly four characters per token plus a fixed framing overhead per message.
/// Deterministic, but not reconciled against any real tokenizer.
///
/// # Examples
///
/// ```
/// use llm_connectivity::types::{Message, TokenEstimator};
///
/// assert_eq!(TokenEstimator::estimate_text("abcdefgh"), 2);
/// let messages = vec![Message::user("abcd"), Message::assistant("efgh")];
/// // "abcd efgh" is 9 chars -> 2 tokens, plus 10 per message
/// assert_eq!(TokenEstimator::estimate_messages(&messages), 22);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator;

impl TokenEstimator {
    pub const CHARS_PER_TOKEN: u64 = 4;
    pub const OVERHEAD_PER_MESSAGE: u64 = 10;

    pub fn estimate_text(text: &str) -> u64 {
        text.chars().count() as u64 / Self::CHARS_PER_TOKEN
    }

    /// Estimates prompt tokens for a message list joined by single spaces.
    pub fn estimate_messages(messages: &[Message]) -> u64 {
        let chars: usize = messages
            .iter()
            .map(|message| message.content.chars().count())
            .sum::<usize>()
            + messages.len().saturating_sub(1);
        chars as u64 / Self::CHARS_PER_TOKEN
            + messages.len() as u64 * Self::OVERHEAD_PER_MESSAGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_is_sum() {
        let usage = Usage::new(12, 30);
        assert_eq!(usage.total_tokens, 42);
        assert!(!usage.estimated);

        let usage = Usage::estimated(8, 0);
        assert_eq!(usage.total_tokens, 8);
        assert!(usage.estimated);
    }

    #[test]
    fn chat_options_default_temperature() {
        let options: ChatOptions = serde_json::from_str(r#"{"model": null, "max_tokens": 64}"#)
            .expect("options");
        assert_eq!(options.temperature, 1.0);
        assert_eq!(options.max_tokens, Some(64));
        assert_eq!(ChatOptions::default().temperature, 1.0);
    }

    #[test]
    fn request_copies_options() {
        let options = ChatOptions::default()
            .with_max_tokens(50)
            .with_temperature(0.2)
            .with_extra("top_p", 0.9);
        let request = ChatRequest::from_options(vec![Message::user("hi")], "gpt-4o", &options);
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.max_tokens, Some(50));
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.extra.get("top_p"), Some(&Value::from(0.9)));
    }

    #[test]
    fn stream_event_terminal_flag() {
        assert!(!StreamEvent::delta("Hel", None).is_terminal());
        let last = StreamEvent::finish("stop", None);
        assert!(last.is_terminal());
        assert!(last.delta.is_empty());
    }

    #[test]
    fn estimator_counts_chars_not_bytes() {
        assert_eq!(TokenEstimator::estimate_text("héllo wörld!"), 3);
        assert_eq!(TokenEstimator::estimate_text(""), 0);
        assert_eq!(TokenEstimator::estimate_messages(&[]), 0);
    }
}
