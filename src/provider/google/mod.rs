//! Google AI (Gemini) adapter: chat, streaming and batch embeddings.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

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
    ChatRequest, ChatResult, EmbeddingRequest, EmbeddingResult, Message, TokenEstimator, Usage,
};

mod error;
mod stream;
mod types;

pub use error::GOOGLE_RULES;

use error::parse_google_error;
use stream::convert_sse_event;
use types::{GoogleBatchEmbedResponse, GoogleGenerateResponse};

const PROVIDER: &str = "google";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "models/gemini-2.5-pro";
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/text-embedding-004";
/// `batchEmbedContents` accepts at most 100 requests per call.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 100;

/// Chat prices per 1M tokens.
pub fn default_chat_pricing() -> PricingTable {
    PricingTable::per_million([
        ("gemini-2.5-pro", ModelPrice::new(1.25, 5.00)),
        ("gemini-2.5-flash", ModelPrice::new(0.075, 0.30)),
        ("gemini-2.0-flash", ModelPrice::new(0.075, 0.30)),
        ("gemini-pro-latest", ModelPrice::new(0.50, 1.50)),
    ])
}

/// Embedding prices per 1M tokens.
pub fn default_embedding_pricing() -> PricingTable {
    PricingTable::per_million([
        ("text-embedding-004", ModelPrice::input_only(0.00001)),
        ("embedding-001", ModelPrice::input_only(0.00001)),
    ])
}

/// Gemini adapter.
///
/// Gemini has no role-tagged chat history in this adapter: messages are flattened
/// into one prompt, see [`flatten_messages`].
pub struct GoogleProvider {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    default_model: String,
    embedding_model: String,
    embedding_batch_size: usize,
    timeout: Option<Duration>,
    chat_pricing: PricingTable,
    embedding_pricing: PricingTable,
}

impl GoogleProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            default_model: DEFAULT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            timeout: None,
            chat_pricing: default_chat_pricing(),
            embedding_pricing: default_embedding_pricing(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_default_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    /// Values below 1 are treated as 1.
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

    /// `{base}/v1beta/models/{model}:{method}`; the model may carry `models/` already.
    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/{}:{method}",
            self.base_url.trim_end_matches('/'),
            model_path(model)
        )
    }

    fn build_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            ("x-goog-api-key".to_string(), self.api_key.clone()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ])
    }

    fn build_generate_body(request: &ChatRequest, prompt: &str) -> Value {
        let mut generation_config = Map::new();
        generation_config.insert("temperature".to_string(), Value::from(request.temperature));
        if let Some(max_tokens) = request.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), Value::from(max_tokens));
        }

        let mut body = Map::new();
        body.insert(
            "contents".to_string(),
            json!([{"role": "user", "parts": [{"text": prompt}]}]),
        );
        body.insert(
            "generationConfig".to_string(),
            Value::Object(generation_config),
        );
        merge_extra(&mut body, &request.extra);
        Value::Object(body)
    }

    async fn post(&self, url: String, body: &Value) -> Result<String, ClassifiedError> {
        let response = post_json_with_headers(
            self.transport.as_ref(),
            url,
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
    ) -> Result<(Vec<Vec<f32>>, Option<Value>), ClassifiedError> {
        let model = model_path(&request.model);
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                let mut entry = Map::new();
                entry.insert("model".to_string(), Value::from(model.clone()));
                entry.insert("content".to_string(), json!({"parts": [{"text": text}]}));
                merge_extra(&mut entry, &request.extra);
                Value::Object(entry)
            })
            .collect();

        let url = self.endpoint(&request.model, "batchEmbedContents");
        let text = self.post(url, &json!({ "requests": requests })).await?;
        let parsed: GoogleBatchEmbedResponse = decode_body(PROVIDER, &text)?;
        if parsed.embeddings.len() != texts.len() {
            return Err(ClassifiedError::new(
                ErrorKind::ProviderSpecific,
                PROVIDER,
                format!(
                    "Google AI returned {} embeddings for {} inputs",
                    parsed.embeddings.len(),
                    texts.len()
                ),
            ));
        }
        let vectors = parsed
            .embeddings
            .into_iter()
            .map(|embedding| embedding.values)
            .collect();
        Ok((vectors, raw_payload(&text)))
    }
}

/// Normalizes a model id to the `models/<id>` resource path.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") || model.starts_with("tunedModels/") {
        model.to_string()
    } else {
        format!("models/{model}")
    }
}

/// Flattens a conversation into one prompt: system text verbatim, other turns
/// prefixed with `User: ` or `Assistant: `, joined by blank lines.
pub fn flatten_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| match message.role.as_str() {
            "system" => message.content.clone(),
            "assistant" => format!("Assistant: {}", message.content),
            _ => format!("User: {}", message.content),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
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
        Err(GOOGLE_RULES.classify(&parse_google_error(
            status,
            &text,
            retry_after_from_headers(&headers),
        )))
    }
}

/// Text of a response, or the safety placeholder when the candidate was blocked.
fn response_text(parsed: &GoogleGenerateResponse) -> Result<String, ClassifiedError> {
    if let Some(text) = parsed.text() {
        return Ok(text);
    }
    let reason = match parsed.candidates.first() {
        Some(candidate) => candidate.finish_reason.clone(),
        None => parsed
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.clone()),
    };
    match reason {
        Some(reason) => Ok(format!(
            "[Response blocked by Google safety filters: finish_reason={reason}]"
        )),
        None => Err(ClassifiedError::new(
            ErrorKind::ProviderSpecific,
            PROVIDER,
            "Google AI returned empty response: no candidates",
        )),
    }
}

#[async_trait]
impl LLMProvider for GoogleProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResult, ClassifiedError> {
        let prompt = flatten_messages(&request.messages);
        let estimated = TokenEstimator::estimate_text(&prompt);
        debug!(provider = PROVIDER, model = %request.model, estimated_prompt_tokens = estimated, "sending chat request");

        let body = Self::build_generate_body(&request, &prompt);
        let text = self
            .post(self.endpoint(&request.model, "generateContent"), &body)
            .await?;
        let parsed: GoogleGenerateResponse = decode_body(PROVIDER, &text)?;

        let content = response_text(&parsed)?;
        let usage = match parsed.usage_metadata {
            Some(meta) => Usage::new(meta.prompt_token_count, meta.candidates_token_count),
            None => Usage::estimated(estimated, TokenEstimator::estimate_text(&content)),
        };
        let cost = self.chat_pricing.cost(&request.model, &usage);

        Ok(ChatResult {
            content,
            model: request.model,
            usage,
            cost,
            provider: PROVIDER.to_string(),
            raw: raw_payload(&text),
        })
    }

    async fn stream_chat(&self, request: ChatRequest) -> Result<ChatStream, ClassifiedError> {
        let prompt = flatten_messages(&request.messages);
        debug!(
            provider = PROVIDER,
            model = %request.model,
            estimated_prompt_tokens = TokenEstimator::estimate_text(&prompt),
            "opening chat stream"
        );

        let body = Self::build_generate_body(&request, &prompt);
        let url = format!(
            "{}?alt=sse",
            self.endpoint(&request.model, "streamGenerateContent")
        );
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            url,
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
            return Err(GOOGLE_RULES.classify(&parse_google_error(
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
impl EmbeddingProvider for GoogleProvider {
    /// Usage is always estimated; the endpoint reports no token counts.
    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResult, ClassifiedError> {
        let prompt_tokens: u64 = request
            .texts
            .iter()
            .map(|text| TokenEstimator::estimate_text(text))
            .sum();
        debug!(
            provider = PROVIDER,
            model = %request.model,
            inputs = request.texts.len(),
            estimated_prompt_tokens = prompt_tokens,
            "sending embedding request"
        );

        let mut embeddings = Vec::with_capacity(request.texts.len());
        let mut raw_batches = Vec::new();
        for batch in request.texts.chunks(self.embedding_batch_size) {
            let (vectors, raw) = self.embed_batch(batch, &request).await?;
            embeddings.extend(vectors);
            raw_batches.extend(raw);
        }

        let usage = Usage::estimated(prompt_tokens, 0);
        let cost = self.embedding_pricing.cost(&request.model, &usage);
        let raw = match raw_batches.len() {
            0 => None,
            1 => raw_batches.pop(),
            _ => Some(Value::Array(raw_batches)),
        };

        Ok(EmbeddingResult {
            embeddings,
            model: request.model,
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::StreamExt;

    use super::*;
    use crate::http::memory::{MemoryTransport, ScriptedResponse};

    fn provider(transport: &Arc<MemoryTransport>) -> GoogleProvider {
        GoogleProvider::new(transport.clone(), "AIza-test")
    }

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("You are terse."),
            Message::user("Hi"),
            Message::assistant("Hello."),
            Message::user("Bye"),
        ]
    }

    fn sent_body(transport: &MemoryTransport, index: usize) -> Value {
        let request = &transport.requests()[index];
        serde_json::from_slice(request.body.as_deref().expect("body")).expect("json")
    }

    #[test]
    fn flattens_roles_into_one_prompt() {
        assert_eq!(
            flatten_messages(&conversation()),
            "You are terse.\n\nUser: Hi\n\nAssistant: Hello.\n\nUser: Bye"
        );
    }

    #[test]
    fn model_path_accepts_both_forms() {
        assert_eq!(model_path("gemini-2.5-flash"), "models/gemini-2.5-flash");
        assert_eq!(model_path("models/gemini-2.5-flash"), "models/gemini-2.5-flash");
    }

    #[tokio::test]
    async fn chat_uses_usage_metadata_and_pricing() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::json(
            200,
            r#"{"candidates":[{"content":{"parts":[{"text":"See you."}],"role":"model"},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":1000000,"candidatesTokenCount":1000000,"totalTokenCount":2000000}}"#,
        ));
        let mut request = ChatRequest::new(conversation(), "models/gemini-2.5-flash");
        request.temperature = 0.7;
        let result = provider(&transport).chat(request).await.expect("chat");

        assert_eq!(result.content, "See you.");
        assert_eq!(result.model, "models/gemini-2.5-flash");
        assert!(!result.usage.estimated);
        let cost = result.cost.expect("priced");
        assert!((cost - 0.375).abs() < 1e-9);

        let sent = &transport.requests()[0];
        assert_eq!(
            sent.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(sent.headers.get("x-goog-api-key"), Some(&"AIza-test".to_string()));
        let body = sent_body(&transport, 0);
        assert_eq!(
            body["contents"][0]["parts"][0]["text"],
            "You are terse.\n\nUser: Hi\n\nAssistant: Hello.\n\nUser: Bye"
        );
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
        assert_eq!(body["generationConfig"]["temperature"], Value::from(0.7));
    }

    #[tokio::test]
    async fn missing_usage_is_estimated() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::json(
            200,
            r#"{"candidates":[{"content":{"parts":[{"text":"12345678"}]},"finishReason":"STOP"}]}"#,
        ));
        let request = ChatRequest::new(vec![Message::user("abcd")], "gemini-2.5-pro");
        let result = provider(&transport).chat(request).await.expect("chat");
        // "User: abcd" is 10 chars, the reply 8.
        assert_eq!(result.usage, Usage::estimated(2, 2));
    }

    #[tokio::test]
    async fn safety_block_yields_placeholder() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::json(
            200,
            r#"{"candidates":[{"finishReason":"SAFETY","safetyRatings":[]}]}"#,
        ));
        let request = ChatRequest::new(vec![Message::user("...")], "gemini-2.5-pro");
        let result = provider(&transport).chat(request).await.expect("chat");
        assert_eq!(
            result.content,
            "[Response blocked by Google safety filters: finish_reason=SAFETY]"
        );
    }

    #[tokio::test]
    async fn no_candidates_is_an_error() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::json(200, r#"{"candidates":[]}"#));
        let request = ChatRequest::new(vec![Message::user("...")], "gemini-2.5-pro");
        let err = provider(&transport).chat(request).await.expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::ProviderSpecific);
    }

    #[tokio::test]
    async fn stream_closes_on_finish_reason() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::sse(
            200,
            [
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Good\"}],\"role\":\"model\"}}]}\r\n\r\n",
                "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"bye\"}],\"role\":\"model\"},\"finishReason\":\"STOP\"}]}\r\n\r\n",
            ],
        ));
        let request = ChatRequest::new(vec![Message::user("Bye")], "gemini-2.5-flash");
        let stream = provider(&transport).stream_chat(request).await.expect("stream");
        let events: Vec<_> = stream.map(|event| event.expect("event")).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].delta, "bye");
        assert_eq!(events[1].finish_reason.as_deref(), Some("stop"));
        assert!(transport.requests()[0].url.ends_with(":streamGenerateContent?alt=sse"));
    }

    #[tokio::test]
    async fn embeddings_are_estimated_and_batched() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::json(
            200,
            r#"{"embeddings":[{"values":[0.1,0.2]},{"values":[0.3,0.4]}]}"#,
        ));
        transport.push(ScriptedResponse::json(200, r#"{"embeddings":[{"values":[0.5,0.6]}]}"#));

        let provider = provider(&transport).with_embedding_batch_size(2);
        let request = EmbeddingRequest::new(
            vec!["aaaa".to_string(), "bbbbbbbb".to_string(), "cc".to_string()],
            "text-embedding-004",
        );
        let result = provider.embed(request).await.expect("embed");

        assert_eq!(result.embeddings.len(), 3);
        assert_eq!(result.embeddings[2], vec![0.5, 0.6]);
        assert_eq!(result.usage, Usage::estimated(3, 0));
        assert!(result.cost.is_some());

        let first = sent_body(&transport, 0);
        assert_eq!(first["requests"][0]["model"], "models/text-embedding-004");
        assert_eq!(first["requests"][1]["content"]["parts"][0]["text"], "bbbbbbbb");
        assert!(transport.requests()[0].url.ends_with(":batchEmbedContents"));
    }

    #[tokio::test]
    async fn error_status_is_classified() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::json(
            400,
            r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#,
        ));
        let request = ChatRequest::new(vec![Message::user("Hi")], DEFAULT_MODEL);
        let err = provider(&transport).chat(request).await.expect_err("400");
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }
}
