//! OpenAI Chat Completions and Embeddings adapter.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::classify::RawBackendError;
use crate::error::{ClassifiedError, ErrorKind};
use crate::http::{
    DynHttpTransport, HttpResponse, post_json_stream_with_headers, post_json_with_headers,
};
use crate::pricing::{ModelPrice, PricingTable};
use crate::provider::{
    ChatStream, EmbeddingProvider, LLMProvider, decode_body, merge_extra, raw_payload,
    transport_failure,
};
use crate::retry::retry_after_from_headers;
use crate::stream::{collect_stream_text, event_stream};
use crate::types::{
    ChatRequest, ChatResult, EmbeddingRequest, EmbeddingResult, TokenEstimator, Usage,
};

mod error;
mod stream;
mod types;

pub use error::OPENAI_RULES;

use error::parse_openai_error;
use stream::convert_sse_event;
use types::{OpenAiChatResponse, OpenAiEmbeddingResponse};

const PROVIDER: &str = "openai";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Maximum inputs the embeddings endpoint accepts per request.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 2048;

/// Chat prices per 1K tokens.
pub fn default_chat_pricing() -> PricingTable {
    PricingTable::per_thousand([
        ("gpt-4", ModelPrice::new(0.03, 0.06)),
        ("gpt-4-turbo", ModelPrice::new(0.01, 0.03)),
        ("gpt-4o", ModelPrice::new(0.005, 0.015)),
        ("gpt-3.5-turbo", ModelPrice::new(0.0005, 0.0015)),
    ])
}

/// Embedding prices per 1M tokens.
pub fn default_embedding_pricing() -> PricingTable {
    PricingTable::per_million([
        ("text-embedding-3-small", ModelPrice::input_only(0.02)),
        ("text-embedding-3-large", ModelPrice::input_only(0.13)),
        ("text-embedding-ada-002", ModelPrice::input_only(0.10)),
    ])
}

/// OpenAI adapter with chat, streaming and embeddings.
pub struct OpenAiProvider {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    organization: Option<String>,
    project: Option<String>,
    default_model: String,
    embedding_model: String,
    embedding_batch_size: usize,
    timeout: Option<Duration>,
    chat_pricing: PricingTable,
    embedding_pricing: PricingTable,
}

impl OpenAiProvider {
    /// Creates a provider against the default base URL.
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            organization: None,
            project: None,
            default_model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            timeout: None,
            chat_pricing: default_chat_pricing(),
            embedding_pricing: default_embedding_pricing(),
        }
    }

    /// Overrides the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the `OpenAI-Organization` header.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Sets the `OpenAI-Project` header.
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Sets the chat model used when the request names none.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_default_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Inputs per embeddings request; values below 1 are treated as 1.
    pub fn with_embedding_batch_size(mut self, batch_size: usize) -> Self {
        self.embedding_batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_chat_pricing(mut self, pricing: PricingTable) -> Self {
        self.chat_pricing = pricing;
        self
    }

    pub fn with_embedding_pricing(mut self, pricing: PricingTable) -> Self {
        self.embedding_pricing = pricing;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/{path}")
        } else {
            format!("{base}/v1/{path}")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key),
        );
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        if let Some(org) = &self.organization {
            headers.insert("OpenAI-Organization".to_string(), org.clone());
        }
        if let Some(project) = &self.project {
            headers.insert("OpenAI-Project".to_string(), project.clone());
        }
        headers
    }

    fn build_chat_body(request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|message| json!({"role": message.role.as_str(), "content": message.content}))
            .collect();

        let mut body = Map::new();
        body.insert("model".to_string(), Value::from(request.model.clone()));
        body.insert("messages".to_string(), Value::Array(messages));
        body.insert("temperature".to_string(), Value::from(request.temperature));
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".to_string(), Value::from(max_tokens));
        }
        if stream {
            body.insert("stream".to_string(), Value::Bool(true));
        }
        merge_extra(&mut body, &request.extra);
        Value::Object(body)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<String, ClassifiedError> {
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(path),
            self.build_headers(),
            body,
            self.timeout,
        )
        .await
        .map_err(|err| transport_failure(PROVIDER, err))?;
        ensure_success(response)
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        request: &EmbeddingRequest,
    ) -> Result<(Vec<Vec<f32>>, Option<String>, Usage, Option<Value>), ClassifiedError> {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::from(request.model.clone()));
        body.insert("input".to_string(), json!(texts));
        merge_extra(&mut body, &request.extra);

        let text = self.post("embeddings", &Value::Object(body)).await?;
        let parsed: OpenAiEmbeddingResponse = decode_body(PROVIDER, &text)?;
        let usage = parsed
            .usage
            .map(|usage| Usage::new(usage.prompt_tokens, 0))
            .unwrap_or_else(|| {
                Usage::estimated(
                    texts.iter().map(|text| TokenEstimator::estimate_text(text)).sum(),
                    0,
                )
            });

        let mut data = parsed.data;
        data.sort_by_key(|item| item.index);
        if data.len() != texts.len() {
            return Err(ClassifiedError::new(
                ErrorKind::ProviderSpecific,
                PROVIDER,
                format!(
                    "OpenAI returned {} embeddings for {} inputs",
                    data.len(),
                    texts.len()
                ),
            ));
        }
        let vectors = data.into_iter().map(|item| item.embedding).collect();
        Ok((vectors, parsed.model, usage, raw_payload(&text)))
    }
}

fn ensure_success(response: HttpResponse) -> Result<String, ClassifiedError> {
    let HttpResponse {
        status,
        headers,
        body,
    } = response;
    let text = String::from_utf8_lossy(&body).into_owned();
    if (200..300).contains(&status) {
        Ok(text)
    } else {
        let raw: RawBackendError =
            parse_openai_error(status, &text, retry_after_from_headers(&headers));
        Err(OPENAI_RULES.classify(&raw))
    }
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResult, ClassifiedError> {
        let estimated = TokenEstimator::estimate_messages(&request.messages);
        debug!(provider = PROVIDER, model = %request.model, estimated_prompt_tokens = estimated, "sending chat request");

        let body = Self::build_chat_body(&request, false);
        let text = self.post("chat/completions", &body).await?;
        let parsed: OpenAiChatResponse = decode_body(PROVIDER, &text)?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .unwrap_or_default();
        let usage = match parsed.usage {
            Some(usage) => Usage::new(usage.prompt_tokens, usage.completion_tokens),
            None => Usage::estimated(estimated, TokenEstimator::estimate_text(&content)),
        };
        let cost = self.chat_pricing.cost(&request.model, &usage);

        Ok(ChatResult {
            content,
            model: parsed.model.unwrap_or(request.model),
            usage,
            cost,
            provider: PROVIDER.to_string(),
            raw: raw_payload(&text),
        })
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ClassifiedError> {
        debug!(
            provider = PROVIDER,
            model = %request.model,
            estimated_prompt_tokens = TokenEstimator::estimate_messages(&request.messages),
            "opening chat stream"
        );

        let body = Self::build_chat_body(&request, true);
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint("chat/completions"),
            self.build_headers(),
            &body,
            self.timeout,
        )
        .await
        .map_err(|err| transport_failure(PROVIDER, err))?;

        if !(200..300).contains(&response.status) {
            let retry_after = retry_after_from_headers(&response.headers);
            let text = collect_stream_text(response.body)
                .await
                .map_err(|err| transport_failure(PROVIDER, err))?;
            return Err(OPENAI_RULES.classify(&parse_openai_error(
                response.status,
                &text,
                retry_after,
            )));
        }

        Ok(event_stream(response.body, PROVIDER, convert_sse_event))
    }

    fn embeddings(&self) -> Option<&dyn EmbeddingProvider> {
        Some(self)
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    /// Splits the inputs into batches of at most `embedding_batch_size`, issues the
    /// batches in order and concatenates the vectors, so output order equals input
    /// order. An empty input returns an empty result without a request.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResult, ClassifiedError> {
        debug!(
            provider = PROVIDER,
            model = %request.model,
            inputs = request.texts.len(),
            "sending embedding request"
        );

        let mut embeddings = Vec::with_capacity(request.texts.len());
        let mut prompt_tokens = 0u64;
        let mut estimated = false;
        let mut model = None;
        let mut raw_batches = Vec::new();

        for batch in request.texts.chunks(self.embedding_batch_size) {
            let (vectors, reported_model, usage, raw) = self.embed_batch(batch, &request).await?;
            embeddings.extend(vectors);
            prompt_tokens += usage.prompt_tokens;
            estimated |= usage.estimated;
            model = model.or(reported_model);
            raw_batches.extend(raw);
        }

        let usage = if estimated {
            Usage::estimated(prompt_tokens, 0)
        } else {
            Usage::new(prompt_tokens, 0)
        };
        let cost = self.embedding_pricing.cost(&request.model, &usage);
        let raw = match raw_batches.len() {
            0 => None,
            1 => raw_batches.pop(),
            _ => Some(Value::Array(raw_batches)),
        };

        Ok(EmbeddingResult {
            embeddings,
            model: model.unwrap_or(request.model),
            usage,
            cost,
            provider: PROVIDER.to_string(),
            raw,
        })
    }

    fn default_embedding_model(&self) -> &str {
        &self.embedding_model
    }
}
