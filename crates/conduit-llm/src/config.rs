use conduit_core::{ConduitError, ConduitResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request fields the orchestrator sets itself; pass-through options may not
/// override them.
pub const RESERVED_KEYS: &[&str] = &[
    "model",
    "messages",
    "stream",
    "stream_options",
    "tools",
    "tool_choice",
];

/// OpenAI-compatible providers the HTTP transport knows default endpoints for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    OpenAi,
    OpenRouter,
    /// Groq cloud inference, OpenAI-compatible API.
    Groq,
}

/// Where and how to reach the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    /// Literal API key. Takes precedence over `api_key_env`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    pub api_base_url: Option<String>,
    /// Whole-request timeout, covering the full stream.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            api_key: None,
            api_key_env: None,
            api_base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url
        } else {
            match self.provider {
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
            }
        }
    }

    /// Resolves the API key, reading `api_key_env` when no literal key is set.
    /// Returns `Ok(None)` when neither is configured (e.g. a local endpoint).
    pub fn resolve_api_key(&self) -> ConduitResult<Option<String>> {
        if let Some(key) = &self.api_key {
            return Ok(Some(key.clone()));
        }
        match &self.api_key_env {
            Some(var) => std::env::var(var).map(Some).map_err(|_| {
                ConduitError::Config(format!("environment variable '{var}' is not set"))
            }),
            None => Ok(None),
        }
    }
}

/// Configuration for one orchestrated call. Immutable while the call runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    pub model: String,
    /// Retries after the first attempt; attempts run `0..=max_retries`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff base: attempt `n` failing waits `wait_seconds_on_retry * (n + 1)`.
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds_on_retry: f64,
    /// Model name used for token counting only.
    #[serde(default)]
    pub token_counter_model: Option<String>,
    /// Provider-specific options (temperature, max_tokens, ...) forwarded as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_max_retries() -> u32 {
    2
}

fn default_wait_seconds() -> f64 {
    3.0
}

impl CallConfig {
    /// Creates a validated config with default retry settings.
    pub fn new(model: impl Into<String>) -> ConduitResult<Self> {
        let config = Self {
            model: model.into(),
            max_retries: default_max_retries(),
            wait_seconds_on_retry: default_wait_seconds(),
            token_counter_model: None,
            extra: Map::new(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_wait_seconds(mut self, seconds: f64) -> Self {
        self.wait_seconds_on_retry = seconds;
        self
    }

    pub fn with_token_counter_model(mut self, model: impl Into<String>) -> Self {
        self.token_counter_model = Some(model.into());
        self
    }

    /// Adds a pass-through option. Call [`validate`](Self::validate) afterwards
    /// if the key comes from untrusted input.
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> ConduitResult<()> {
        if self.model.trim().is_empty() {
            return Err(ConduitError::Config("'model' must not be empty".into()));
        }
        if !self.wait_seconds_on_retry.is_finite() || self.wait_seconds_on_retry < 0.0 {
            return Err(ConduitError::Config(format!(
                "'wait_seconds_on_retry' must be a non-negative number, got {}",
                self.wait_seconds_on_retry
            )));
        }
        if let Some(key) = self.extra.keys().find(|k| RESERVED_KEYS.contains(&k.as_str())) {
            return Err(ConduitError::Config(format!(
                "pass-through option '{key}' is managed by the orchestrator"
            )));
        }
        Ok(())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CallConfig::new("gpt-4o-mini").unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.wait_seconds_on_retry, 3.0);
        assert_eq!(config.max_attempts(), 3);
        assert!(config.extra.is_empty());
    }

    #[test]
    fn test_empty_model_rejected() {
        assert!(matches!(CallConfig::new("  "), Err(ConduitError::Config(_))));
    }

    #[test]
    fn test_reserved_passthrough_rejected() {
        let config = CallConfig::new("m")
            .unwrap()
            .with_option("stream", Value::Bool(false));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stream"));
    }

    #[test]
    fn test_negative_wait_rejected() {
        let config = CallConfig::new("m").unwrap().with_wait_seconds(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_passthrough_is_flattened() {
        let config: CallConfig = toml::from_str(
            r#"
            model = "gpt-4o"
            max_retries = 4
            temperature = 0.2
            max_tokens = 512
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.wait_seconds_on_retry, 3.0);
        assert_eq!(config.extra.get("max_tokens"), Some(&Value::from(512)));
        assert!(config.extra.contains_key("temperature"));
        assert!(!config.extra.contains_key("max_retries"));
    }

    #[test]
    fn test_provider_base_url_defaults() {
        let mut provider = ProviderConfig::default();
        assert_eq!(provider.base_url(), "https://api.openai.com");
        provider.provider = LlmProvider::OpenRouter;
        assert_eq!(provider.base_url(), "https://openrouter.ai/api");
        provider.provider = LlmProvider::Groq;
        assert_eq!(provider.base_url(), "https://api.groq.com/openai");
        provider.api_base_url = Some("http://localhost:8080".into());
        assert_eq!(provider.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_resolve_api_key_prefers_literal() {
        let provider = ProviderConfig {
            api_key: Some("sk-literal".into()),
            api_key_env: Some("CONDUIT_TEST_UNSET_VAR".into()),
            ..ProviderConfig::default()
        };
        assert_eq!(provider.resolve_api_key().unwrap().as_deref(), Some("sk-literal"));
    }

    #[test]
    fn test_resolve_api_key_missing_env_is_config_error() {
        let provider = ProviderConfig {
            api_key_env: Some("CONDUIT_TEST_DEFINITELY_UNSET".into()),
            ..ProviderConfig::default()
        };
        assert!(matches!(provider.resolve_api_key(), Err(ConduitError::Config(_))));
        assert!(ProviderConfig::default().resolve_api_key().unwrap().is_none());
    }
}
