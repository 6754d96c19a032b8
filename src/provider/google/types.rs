use serde::Deserialize;

/// `generateContent` response, also the shape of each streamed chunk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleGenerateResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<GoogleCandidate>,
    #[serde(default)]
    pub(crate) usage_metadata: Option<GoogleUsageMetadata>,
    #[serde(default)]
    pub(crate) prompt_feedback: Option<GooglePromptFeedback>,
    /// Only present on error chunks inside a stream.
    #[serde(default)]
    pub(crate) error: Option<GoogleErrorBody>,
}

impl GoogleGenerateResponse {
    /// Text of the first candidate, `None` when it has no text parts.
    pub(crate) fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        if content.parts.iter().any(|part| part.text.is_some()) {
            Some(text)
        } else {
            None
        }
    }

    pub(crate) fn finish_reason(&self) -> Option<&str> {
        self.candidates.first()?.finish_reason.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleCandidate {
    #[serde(default)]
    pub(crate) content: Option<GoogleContent>,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GoogleContent {
    #[serde(default)]
    pub(crate) parts: Vec<GooglePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GooglePart {
    #[serde(default)]
    pub(crate) text: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GoogleUsageMetadata {
    #[serde(default)]
    pub(crate) prompt_token_count: u64,
    #[serde(default)]
    pub(crate) candidates_token_count: u64,
}

/// Set when the prompt itself was blocked; no candidates are returned then.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GooglePromptFeedback {
    #[serde(default)]
    pub(crate) block_reason: Option<String>,
}

/// `batchEmbedContents` response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GoogleBatchEmbedResponse {
    #[serde(default)]
    pub(crate) embeddings: Vec<GoogleEmbedding>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GoogleEmbedding {
    #[serde(default)]
    pub(crate) values: Vec<f32>,
}

/// Error envelope `{"error": {"code": 400, "message": "...", "status": "INVALID_ARGUMENT"}}`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GoogleErrorEnvelope {
    #[serde(default)]
    pub(crate) error: Option<GoogleErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GoogleErrorBody {
    #[serde(default)]
    pub(crate) code: Option<u16>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<String>,
}
