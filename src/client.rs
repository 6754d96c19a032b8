use std::fmt;

use crate::config::{ClientConfig, ProviderSettings, Selector, build_provider};
use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::http::reqwest::default_dyn_transport;
use crate::provider::{ChatStream, DynProvider};
use crate::retry::{DynSleeper, RetryEngine, StrategyTable};
use crate::types::{
    CapabilityDescriptor, ChatOptions, ChatRequest, ChatResult, EmbeddingOptions,
    EmbeddingRequest, EmbeddingResult, Message,
};

/// Entry point for LLM calls: one adapter plus the retry engine.
///
/// Non-streaming calls (`chat`, `embed`) run through the [`RetryEngine`]; streams
/// are handed back untouched. The client holds only immutable configuration, so
/// it can be shared across tasks.
pub struct LLMClient {
    provider: DynProvider,
    model: Option<String>,
    embedding_model: Option<String>,
    engine: RetryEngine,
}

impl LLMClient {
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder::default()
    }

    /// Client for a `"<backend>/<model>"` selector with settings from the environment.
    pub fn from_selector(selector: &str) -> Result<Self, LLMError> {
        Self::builder().selector(selector).build()
    }

    /// Client over a pre-built adapter; the adapter's default model applies.
    pub fn from_provider(provider: DynProvider) -> Self {
        Self {
            provider,
            model: None,
            embedding_model: None,
            engine: RetryEngine::default(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, LLMError> {
        let mut table = StrategyTable::default();
        if let Some(max_retries) = config.retry.max_retries {
            table = table.with_max_retries(max_retries);
        }
        let mut builder = Self::builder()
            .selector(config.selector.to_string())
            .settings(config.settings.clone())
            .strategy_table(table);
        if let Some(model) = &config.embedding_model {
            builder = builder.embedding_model(model.clone());
        }
        builder.build()
    }

    /// Sends a chat request, retrying per the strategy table.
    ///
    /// The model is `options.model`, else the client's model, else the adapter
    /// default.
    pub async fn chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatResult, LLMError> {
        let model = self.resolve_model(options.model.as_deref());
        let request = ChatRequest::from_options(messages, model, &options);
        let result = self
            .engine
            .run(|| self.provider.chat(request.clone()))
            .await?;
        Ok(result)
    }

    /// Opens a stream. Never retried: partial output may already have reached the
    /// caller when a failure surfaces.
    pub async fn stream_chat(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<ChatStream, LLMError> {
        let model = self.resolve_model(options.model.as_deref());
        let request = ChatRequest::from_options(messages, model, &options);
        Ok(self.provider.stream_chat(request).await?)
    }

    /// Embeds `texts`; `embeddings[i]` belongs to `texts[i]`.
    ///
    /// # Errors
    ///
    /// [`LLMError::UnsupportedCapability`] when the adapter has no embedding
    /// support; that error is never retried.
    pub async fn embed(
        &self,
        texts: Vec<String>,
        options: EmbeddingOptions,
    ) -> Result<EmbeddingResult, LLMError> {
        let Some(embedder) = self.provider.embeddings() else {
            return Err(LLMError::UnsupportedCapability {
                provider: self.provider.name(),
                capability: "embeddings",
            });
        };

        let model = options
            .model
            .as_deref()
            .map(|model| self.strip_backend_prefix(model).to_string())
            .or_else(|| self.embedding_model.clone())
            .or_else(|| self.model.clone())
            .unwrap_or_else(|| embedder.default_embedding_model().to_string());

        if texts.is_empty() {
            return Ok(EmbeddingResult {
                embeddings: Vec::new(),
                model,
                usage: Default::default(),
                cost: None,
                provider: self.provider.name().to_string(),
                raw: None,
            });
        }

        let mut request = EmbeddingRequest::new(texts, model);
        request.extra = options.extra;
        let result = self.engine.run(|| embedder.embed(request.clone())).await?;
        Ok(result)
    }

    pub fn provider(&self) -> &DynProvider {
        &self.provider
    }

    /// Configured chat model, if any.
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn capabilities(&self) -> CapabilityDescriptor {
        self.provider.capabilities()
    }

    pub fn retry_engine(&self) -> &RetryEngine {
        &self.engine
    }

    fn resolve_model(&self, requested: Option<&str>) -> String {
        match requested {
            Some(model) => self.strip_backend_prefix(model).to_string(),
            None => self
                .model
                .clone()
                .unwrap_or_else(|| self.provider.default_model().to_string()),
        }
    }

    /// Accepts `"openai/gpt-4o"` as well as `"gpt-4o"` for an OpenAI client.
    fn strip_backend_prefix<'a>(&self, model: &'a str) -> &'a str {
        model
            .strip_prefix(self.provider.name())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
            .unwrap_or(model)
    }
}

impl fmt::Debug for LLMClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LLMClient")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .finish()
    }
}

/// Builder for [`LLMClient`]. Exactly one of `selector` or `provider` must be set.
#[derive(Default)]
pub struct LLMClientBuilder {
    selector: Option<String>,
    provider: Option<DynProvider>,
    default_model: Option<String>,
    embedding_model: Option<String>,
    settings: Option<ProviderSettings>,
    transport: Option<DynHttpTransport>,
    strategy_table: Option<StrategyTable>,
    sleeper: Option<DynSleeper>,
}

impl LLMClientBuilder {
    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn provider(mut self, provider: DynProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Chat model used when a call names none; overrides the selector's model.
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Connection settings for selector-built adapters.
    pub fn settings(mut self, settings: ProviderSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// HTTP transport for selector-built adapters; defaults to reqwest.
    pub fn transport(mut self, transport: DynHttpTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn strategy_table(mut self, table: StrategyTable) -> Self {
        self.strategy_table = Some(table);
        self
    }

    pub fn sleeper(mut self, sleeper: DynSleeper) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    pub fn build(self) -> Result<LLMClient, LLMError> {
        let (provider, selector_model) = match (self.selector, self.provider) {
            (Some(_), Some(_)) => {
                return Err(LLMError::invalid_config(
                    "selector",
                    "set either a selector or a provider, not both",
                ));
            }
            (None, None) => {
                return Err(LLMError::invalid_config(
                    "selector",
                    "a selector or a provider is required",
                ));
            }
            (None, Some(provider)) => (provider, None),
            (Some(selector), None) => {
                let selector = Selector::parse(&selector)?;
                let settings = self.settings.unwrap_or_default();
                let transport = match self.transport {
                    Some(transport) => transport,
                    None => default_dyn_transport()
                        .map_err(|err| LLMError::invalid_config("transport", err.to_string()))?,
                };
                let default_model = self.default_model.as_deref().unwrap_or(&selector.model);
                let provider =
                    build_provider(selector.backend, &settings, transport, Some(default_model))?;
                (provider, Some(selector.model))
            }
        };

        let mut engine = RetryEngine::new(self.strategy_table.unwrap_or_default());
        if let Some(sleeper) = self.sleeper {
            engine = engine.with_sleeper(sleeper);
        }

        Ok(LLMClient {
            provider,
            model: self.default_model.or(selector_model),
            embedding_model: self.embedding_model,
            engine,
        })
    }
}
