//! Adapter contract every backend implements, plus the bundled HTTP adapters.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::classify::{RawBackendError, classify};
use crate::error::{ClassifiedError, ErrorKind};
use crate::http::TransportError;
use crate::types::{
    CapabilityDescriptor, ChatRequest, ChatResult, EmbeddingRequest, EmbeddingResult, Extra,
    StreamEvent,
};

pub mod anthropic;
pub mod google;
pub mod openai;

/// Lazy, finite, single-consumer event stream. The last item is either an event with
/// a finish reason or an error.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ClassifiedError>> + Send>>;

/// Uniform chat surface over one backend.
///
/// Implementations report every failure as a [`ClassifiedError`]; raw transport or
/// vendor errors never cross this boundary.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Sends the request and waits for the full response.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResult, ClassifiedError>;

    /// Starts a streamed response.
    ///
    /// # Errors
    ///
    /// Failures before the first event (connection, non-2xx status) are returned here;
    /// later ones arrive as the stream's final item.
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ClassifiedError>;

    /// Embedding capability, when the backend has one.
    fn embeddings(&self) -> Option<&dyn EmbeddingProvider> {
        None
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_stream: true,
            supports_embeddings: self.embeddings().is_some(),
        }
    }

    /// Backend identifier, e.g. `openai`.
    fn name(&self) -> &'static str;

    /// Chat model used when neither the caller nor the client names one.
    fn default_model(&self) -> &str;
}

/// Optional embedding capability of an adapter.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds `request.texts`; the result preserves input order.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResult, ClassifiedError>;

    fn default_embedding_model(&self) -> &str;
}

/// Thread-safe adapter handle.
pub type DynProvider = Arc<dyn LLMProvider>;

/// Copies caller-supplied parameters into a JSON request body; extra keys win.
pub(crate) fn merge_extra(body: &mut Map<String, Value>, extra: &Extra) {
    for (key, value) in extra {
        body.insert(key.clone(), value.clone());
    }
}

pub(crate) fn transport_failure(provider: &str, error: TransportError) -> ClassifiedError {
    classify(provider, &RawBackendError::from_transport(error))
}

/// Parses a successful response body.
pub(crate) fn decode_body<T: DeserializeOwned>(
    provider: &str,
    text: &str,
) -> Result<T, ClassifiedError> {
    serde_json::from_str(text).map_err(|err| {
        ClassifiedError::new(
            ErrorKind::ProviderSpecific,
            provider,
            format!("failed to parse {provider} response: {err}"),
        )
        .with_source(Arc::new(err))
    })
}

/// Raw JSON copy of a response for [`ChatResult::raw`].
pub(crate) fn raw_payload(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}
