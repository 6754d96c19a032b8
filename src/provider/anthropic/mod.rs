//! Anthropic Messages API adapter (chat and streaming; no embeddings).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::ClassifiedError;
use crate::http::{
    DynHttpTransport, HttpResponse, post_json_stream_with_headers, post_json_with_headers,
};
use crate::pricing::{ModelPrice, PricingTable};
use crate::provider::{
    ChatStream, LLMProvider, decode_body, merge_extra, raw_payload, transport_failure,
};
use crate::retry::retry_after_from_headers;
use crate::stream::{collect_stream_text, event_stream};
use crate::types::{ChatRequest, ChatResult, TokenEstimator, Usage};

mod error;
mod stream;
mod types;

pub use error::ANTHROPIC_RULES;

use error::parse_anthropic_error;
use stream::AnthropicStreamState;
use types::AnthropicMessageResponse;

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-opus-20240229";
/// The Messages API rejects requests without `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Prices per 1M tokens. Family keys cover undated aliases.
pub fn default_pricing() -> PricingTable {
    PricingTable::per_million([
        ("claude-3-opus-20240229", ModelPrice::new(15.0, 75.0)),
        ("claude-3-sonnet-20240229", ModelPrice::new(3.0, 15.0)),
        ("claude-3-haiku-20240307", ModelPrice::new(0.25, 1.25)),
        ("claude-3-5-sonnet-20240620", ModelPrice::new(3.0, 15.0)),
        ("claude-3-5-sonnet-20241022", ModelPrice::new(3.0, 15.0)),
        ("claude-3-opus", ModelPrice::new(15.0, 75.0)),
        ("claude-3-sonnet", ModelPrice::new(3.0, 15.0)),
        ("claude-3-haiku", ModelPrice::new(0.25, 1.25)),
        ("claude-3-5-sonnet", ModelPrice::new(3.0, 15.0)),
    ])
}

/// Anthropic Messages provider.
pub struct AnthropicProvider {
    transport: DynHttpTransport,
    base_url: String,
    api_key: String,
    default_model: String,
    timeout: Option<Duration>,
    pricing: PricingTable,
}

impl AnthropicProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            default_model: DEFAULT_MODEL.to_string(),
            timeout: None,
            pricing: default_pricing(),
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/messages")
        } else {
            format!("{base}/v1/messages")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            ("x-api-key".to_string(), self.api_key.clone()),
            ("anthropic-version".to_string(), API_VERSION.to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ])
    }

    /// System messages move to the top-level `system` field, joined by blank lines.
    fn build_body(request: &ChatRequest, stream: bool) -> Value {
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|message| message.role.is_system())
            .map(|message| message.content.as_str())
            .collect();
        let messages: Vec<Value> = request
            .messages
            .iter()
            .filter(|message| !message.role.is_system())
            .map(|message| json!({"role": message.role.as_str(), "content": message.content}))
            .collect();

        let mut body = Map::new();
        body.insert("model".to_string(), Value::from(request.model.clone()));
        body.insert("messages".to_string(), Value::Array(messages));
        body.insert(
            "max_tokens".to_string(),
            Value::from(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        body.insert("temperature".to_string(), Value::from(request.temperature));
        if !system.is_empty() {
            body.insert("system".to_string(), Value::from(system.join("\n\n")));
        }
        if stream {
            body.insert("stream".to_string(), Value::Bool(true));
        }
        merge_extra(&mut body, &request.extra);
        Value::Object(body)
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
        Err(ANTHROPIC_RULES.classify(&parse_anthropic_error(
            status,
            &text,
            retry_after_from_headers(&headers),
        )))
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<ChatResult, ClassifiedError> {
        let estimated = TokenEstimator::estimate_messages(&request.messages);
        debug!(provider = PROVIDER, model = %request.model, estimated_prompt_tokens = estimated, "sending chat request");

        let body = Self::build_body(&request, false);
        let response = post_json_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
            self.build_headers(),
            &body,
            self.timeout,
        )
        .await
        .map_err(|err| transport_failure(PROVIDER, err))?;
        let text = ensure_success(response)?;
        let parsed: AnthropicMessageResponse = decode_body(PROVIDER, &text)?;

        let content: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();
        let usage = match parsed.usage {
            Some(usage) => Usage::new(usage.input_tokens, usage.output_tokens),
            None => Usage::estimated(estimated, TokenEstimator::estimate_text(&content)),
        };
        let cost = self.pricing.cost(&request.model, &usage);

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

        let body = Self::build_body(&request, true);
        let response = post_json_stream_with_headers(
            self.transport.as_ref(),
            self.endpoint(),
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
            return Err(ANTHROPIC_RULES.classify(&parse_anthropic_error(
                response.status,
                &text,
                retry_after,
            )));
        }

        let mut state = AnthropicStreamState::default();
        Ok(event_stream(response.body, PROVIDER, move |event| {
            state.convert(event)
        }))
    }

    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::StreamExt;

    use super::*;
    use crate::error::ErrorKind;
    use crate::http::memory::{MemoryTransport, ScriptedResponse};
    use crate::types::Message;

    fn provider(transport: &Arc<MemoryTransport>) -> AnthropicProvider {
        AnthropicProvider::new(transport.clone(), "sk-ant-test")
    }

    fn sent_body(transport: &MemoryTransport) -> Value {
        let request = &transport.requests()[0];
        serde_json::from_slice(request.body.as_deref().expect("body")).expect("json")
    }

    #[tokio::test]
    async fn chat_lifts_system_and_defaults_max_tokens() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::json(
            200,
            r#"{"id":"msg_1","type":"message","role":"assistant","model":"claude-3-opus-20240229","content":[{"type":"text","text":"Hello"},{"type":"text","text":"!"}],"stop_reason":"end_turn","usage":{"input_tokens":1000000,"output_tokens":1000000}}"#,
        ));
        let request = ChatRequest::new(
            vec![
                Message::system("Rule one"),
                Message::system("Rule two"),
                Message::user("Hi"),
            ],
            "claude-3-opus-20240229",
        );

        let result = provider(&transport).chat(request).await.expect("chat");
        assert_eq!(result.content, "Hello!");
        assert_eq!(result.usage.total_tokens, 2_000_000);
        let cost = result.cost.expect("priced");
        assert!((cost - 90.0).abs() < 1e-9);

        let body = sent_body(&transport);
        assert_eq!(body["system"], "Rule one\n\nRule two");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(1));

        let headers = &transport.requests()[0].headers;
        assert_eq!(headers.get("x-api-key"), Some(&"sk-ant-test".to_string()));
        assert_eq!(headers.get("anthropic-version"), Some(&API_VERSION.to_string()));
    }

    #[tokio::test]
    async fn overloaded_is_provider_specific() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::json(
            529,
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        ));
        let request = ChatRequest::new(vec![Message::user("Hi")], DEFAULT_MODEL);
        let err = provider(&transport).chat(request).await.expect_err("529");
        assert_eq!(err.kind(), ErrorKind::ProviderSpecific);
        assert_eq!(err.provider(), "anthropic");
    }

    #[tokio::test]
    async fn stream_ends_with_stop_reason() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::sse(
            200,
            [
                "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":3}}}\n\n",
                "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hey\"}}\n\n",
                "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n",
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ],
        ));
        let request = ChatRequest::new(vec![Message::user("Hi")], DEFAULT_MODEL);
        let stream = provider(&transport).stream_chat(request).await.expect("stream");
        let events: Vec<_> = stream.map(|event| event.expect("event")).collect().await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].delta, "Hey");
        assert_eq!(events[1].finish_reason.as_deref(), Some("end_turn"));
    }

    #[tokio::test]
    async fn truncated_stream_surfaces_network_error() {
        let transport = Arc::new(MemoryTransport::new());
        transport.push(ScriptedResponse::sse(
            200,
            ["data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hey\"}}\n\n"],
        ));
        let request = ChatRequest::new(vec![Message::user("Hi")], DEFAULT_MODEL);
        let stream = provider(&transport).stream_chat(request).await.expect("stream");
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1].as_ref().expect_err("truncated").kind(),
            ErrorKind::Network
        );
    }

    #[test]
    fn no_embedding_capability() {
        let transport = Arc::new(MemoryTransport::new());
        let provider = provider(&transport);
        assert!(provider.embeddings().is_none());
        assert!(!provider.capabilities().supports_embeddings);
    }
}
