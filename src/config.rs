//! Client configuration: selector strings, credentials and adapter construction.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;
use crate::http::DynHttpTransport;
use crate::provider::DynProvider;
use crate::provider::anthropic::AnthropicProvider;
use crate::provider::google::GoogleProvider;
use crate::provider::openai::OpenAiProvider;

/// Request timeout applied when the settings do not name one.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "google")]
    Google,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
    ];

    /// Parses a backend name as it appears in a selector.
    pub fn parse(name: &str) -> Result<Self, LLMError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| {
                LLMError::invalid_config(
                    "selector",
                    format!("unsupported provider '{name}', expected one of openai, anthropic, google"),
                )
            })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
        }
    }

    /// Environment variable consulted when no credential is configured.
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Google => "GOOGLE_AI_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"<backend>/<model>"` selector.
///
/// Only the first `/` separates the two parts, so model ids that contain `/` survive
/// intact.
///
/// # Examples
///
/// ```
/// use llm_connectivity::config::{ProviderKind, Selector};
///
/// let selector = Selector::parse("google/models/gemini-2.5-flash").unwrap();
/// assert_eq!(selector.backend, ProviderKind::Google);
/// assert_eq!(selector.model, "models/gemini-2.5-flash");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Selector {
    pub backend: ProviderKind,
    pub model: String,
}

impl Selector {
    pub fn parse(selector: &str) -> Result<Self, LLMError> {
        let Some((backend, model)) = selector.split_once('/') else {
            return Err(LLMError::invalid_config(
                "selector",
                format!("'{selector}' is not of the form '<provider>/<model>'"),
            ));
        };
        if backend.is_empty() || model.is_empty() {
            return Err(LLMError::invalid_config(
                "selector",
                format!("'{selector}' has an empty provider or model"),
            ));
        }
        Ok(Self {
            backend: ProviderKind::parse(backend)?,
            model: model.to_string(),
        })
    }
}

impl FromStr for Selector {
    type Err = LLMError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Selector {
    type Error = LLMError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Selector> for String {
    fn from(selector: Selector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.backend, self.model)
    }
}

/// Where the API key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    /// Literal API key.
    ApiKey { key: String },
    /// API key read from the named environment variable.
    Env { var: String },
}

/// Per-backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Falls back to the backend's default environment variable when absent.
    #[serde(default)]
    pub credential: Option<Credential>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Backend-specific knobs: `organization` and `project` (OpenAI),
    /// `embedding_batch_size` (OpenAI, Google).
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            credential: None,
            base_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            extra: HashMap::new(),
        }
    }
}

impl ProviderSettings {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.credential = Some(Credential::ApiKey { key: key.into() });
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }

    fn extra_usize(&self, key: &str) -> Option<usize> {
        self.extra
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|value| usize::try_from(value).ok())
    }
}

/// Optional overrides applied to the default strategy table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOverrides {
    /// Replaces `max_retries` on every strategy.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Serializable description of a client.
///
/// ```
/// use llm_connectivity::config::ClientConfig;
///
/// let config = ClientConfig::from_json(
///     r#"{"selector": "anthropic/claude-3-haiku-20240307",
///         "settings": {"credential": {"type": "api_key", "key": "sk-ant"}},
///         "retry": {"max_retries": 5}}"#,
/// )
/// .unwrap();
/// assert_eq!(config.selector.model, "claude-3-haiku-20240307");
/// assert_eq!(config.settings.timeout_secs, 60);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub selector: Selector,
    #[serde(default)]
    pub settings: ProviderSettings,
    #[serde(default)]
    pub retry: RetryOverrides,
    #[serde(default)]
    pub embedding_model: Option<String>,
}

impl ClientConfig {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            settings: ProviderSettings::default(),
            retry: RetryOverrides::default(),
            embedding_model: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, LLMError> {
        serde_json::from_str(json).map_err(|err| LLMError::invalid_config("config", err.to_string()))
    }
}

/// Resolves the API key for `kind`, consulting the environment when needed.
pub fn resolve_api_key(kind: ProviderKind, credential: Option<&Credential>) -> Result<String, LLMError> {
    let (key, source) = match credential {
        Some(Credential::ApiKey { key }) => (Some(key.clone()), "credential.key".to_string()),
        Some(Credential::Env { var }) => (std::env::var(var).ok(), var.clone()),
        None => (
            std::env::var(kind.api_key_env()).ok(),
            kind.api_key_env().to_string(),
        ),
    };
    key.filter(|key| !key.trim().is_empty()).ok_or_else(|| {
        LLMError::invalid_config(
            "credential",
            format!("no API key for {kind}: {source} is missing or empty"),
        )
    })
}

/// Builds the adapter for `kind` over `transport`.
///
/// `default_model` replaces the adapter's built-in chat default.
pub fn build_provider(
    kind: ProviderKind,
    settings: &ProviderSettings,
    transport: DynHttpTransport,
    default_model: Option<&str>,
) -> Result<DynProvider, LLMError> {
    let api_key = resolve_api_key(kind, settings.credential.as_ref())?;
    let timeout = settings.timeout();

    let provider: DynProvider = match kind {
        ProviderKind::OpenAi => {
            let mut provider = OpenAiProvider::new(transport, api_key).with_timeout(timeout);
            if let Some(base_url) = &settings.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(model) = default_model {
                provider = provider.with_default_model(model);
            }
            if let Some(org) = settings.extra_str("organization") {
                provider = provider.with_organization(org);
            }
            if let Some(project) = settings.extra_str("project") {
                provider = provider.with_project(project);
            }
            if let Some(batch_size) = settings.extra_usize("embedding_batch_size") {
                provider = provider.with_embedding_batch_size(batch_size);
            }
            Arc::new(provider)
        }
        ProviderKind::Anthropic => {
            let mut provider = AnthropicProvider::new(transport, api_key).with_timeout(timeout);
            if let Some(base_url) = &settings.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(model) = default_model {
                provider = provider.with_default_model(model);
            }
            Arc::new(provider)
        }
        ProviderKind::Google => {
            let mut provider = GoogleProvider::new(transport, api_key).with_timeout(timeout);
            if let Some(base_url) = &settings.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(model) = default_model {
                provider = provider.with_default_model(model);
            }
            if let Some(batch_size) = settings.extra_usize("embedding_batch_size") {
                provider = provider.with_embedding_batch_size(batch_size);
            }
            Arc::new(provider)
        }
    };

    Ok(provider)
}
