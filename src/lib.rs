//! Unified chat, streaming and embedding calls across LLM backends.
//!
//! One request/response contract for chat, streaming chat, and embeddings across
//! OpenAI, Anthropic, and Google Gemini, with retries driven by a per-error-kind
//! strategy table.

pub mod classify;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod pricing;
pub mod provider;
pub mod retry;
pub mod stream;
pub mod types;

pub use client::{LLMClient, LLMClientBuilder};
pub use error::{ClassifiedError, ErrorKind, LLMError};
pub use provider::{ChatStream, DynProvider, EmbeddingProvider, LLMProvider};
pub use retry::{RetryEngine, RetryStrategy, StrategyTable};
pub use types::*;
