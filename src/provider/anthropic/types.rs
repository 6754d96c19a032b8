use serde::Deserialize;

/// `/v1/messages` response body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicMessageResponse {
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    pub(crate) usage: Option<AnthropicUsage>,
}

/// Content block; only `text` blocks are read.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicContentBlock {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct AnthropicUsage {
    #[serde(default)]
    pub(crate) input_tokens: u64,
    #[serde(default)]
    pub(crate) output_tokens: u64,
}

/// Streaming event payloads, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnthropicStreamEvent {
    MessageStart,
    ContentBlockStart,
    ContentBlockDelta { delta: AnthropicDelta },
    ContentBlockStop,
    MessageDelta { delta: AnthropicMessageDelta },
    MessageStop,
    Ping,
    Error { error: AnthropicErrorBody },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicDelta {
    #[serde(default)]
    pub(crate) text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicMessageDelta {
    #[serde(default)]
    pub(crate) stop_reason: Option<String>,
}

/// Error envelope `{"type": "error", "error": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicErrorEnvelope {
    #[serde(default)]
    pub(crate) error: Option<AnthropicErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AnthropicErrorBody {
    #[serde(default, rename = "type")]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) message: Option<String>,
}
