use conduit_llm::{CallConfig, ProviderConfig};
use serde::Deserialize;
use std::path::Path;

/// Contents of `conduit.toml`.
#[derive(Debug, Deserialize)]
pub struct ConduitConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    pub call: CallConfig,
}

impl ConduitConfig {
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.call.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        Self::from_toml(&text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conduit_llm::LlmProvider;
    use std::io::Write;

    const SAMPLE: &str = r#"
[provider]
provider = "openrouter"
api_key_env = "OPENROUTER_API_KEY"
timeout_secs = 120

[call]
model = "openai/gpt-4o-mini"
max_retries = 1
wait_seconds_on_retry = 0.5
token_counter_model = "gpt-4o"
temperature = 0.2
"#;

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = ConduitConfig::load(file.path()).await.unwrap();
        assert_eq!(config.provider.provider, LlmProvider::OpenRouter);
        assert_eq!(config.provider.timeout_secs, 120);
        assert_eq!(config.call.model, "openai/gpt-4o-mini");
        assert_eq!(config.call.max_attempts(), 2);
        assert_eq!(config.call.token_counter_model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.call.extra["temperature"], serde_json::json!(0.2));
    }

    #[test]
    fn test_provider_section_is_optional() {
        let config = ConduitConfig::from_toml("[call]\nmodel = \"gpt-4o\"\n").unwrap();
        assert_eq!(config.provider.provider, LlmProvider::OpenAi);
        assert_eq!(config.provider.base_url(), "https://api.openai.com");
        assert_eq!(config.call.max_retries, 2);
    }

    #[test]
    fn test_reserved_passthrough_is_rejected() {
        let err = ConduitConfig::from_toml("[call]\nmodel = \"m\"\nstream = false\n").unwrap_err();
        assert!(err.to_string().contains("stream"));
    }

    #[tokio::test]
    async fn test_missing_file_names_path() {
        let err = ConduitConfig::load(Path::new("/definitely/not/here.toml"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
