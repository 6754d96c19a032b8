use serde::Deserialize;
use serde_json::Value;

/// `/v1/chat/completions` response body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenAiChatResponse {
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) choices: Vec<OpenAiChoice>,
    #[serde(default)]
    pub(crate) usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenAiChoice {
    #[serde(default)]
    pub(crate) message: Option<OpenAiMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenAiMessage {
    /// Null when the assistant answered with tool calls only.
    #[serde(default)]
    pub(crate) content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct OpenAiUsage {
    #[serde(default)]
    pub(crate) prompt_tokens: u64,
    #[serde(default)]
    pub(crate) completion_tokens: u64,
}

/// One `chat.completion.chunk` payload.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenAiStreamChunk {
    #[serde(default)]
    pub(crate) choices: Vec<OpenAiStreamChoice>,
    /// Some gateways report failures inline instead of via the HTTP status.
    #[serde(default)]
    pub(crate) error: Option<OpenAiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenAiStreamChoice {
    #[serde(default)]
    pub(crate) delta: Option<OpenAiDelta>,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenAiDelta {
    #[serde(default)]
    pub(crate) content: Option<String>,
}

/// `/v1/embeddings` response body.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenAiEmbeddingResponse {
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) data: Vec<OpenAiEmbedding>,
    #[serde(default)]
    pub(crate) usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenAiEmbedding {
    pub(crate) index: usize,
    pub(crate) embedding: Vec<f32>,
}

/// Error envelope `{"error": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenAiErrorEnvelope {
    #[serde(default)]
    pub(crate) error: Option<OpenAiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OpenAiErrorBody {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default, rename = "type")]
    pub(crate) kind: Option<String>,
    /// String for most errors, occasionally numeric.
    #[serde(default)]
    pub(crate) code: Option<Value>,
}
