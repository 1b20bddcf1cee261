//! Provider registry: builds and holds one `Arc<dyn LlmClient>` per named
//! provider, resolved from configuration at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::LlmRegistryConfig;
use crate::error::{EngineError, Result};
use crate::llm::{
    AnthropicClient, AnthropicConfig, GeminiClient, GeminiConfig, LlmClient, LlmProvider,
    MockLlmClient, OllamaClient, OllamaConfig, OpenAiClient, OpenAiConfig,
};

/// Holds every configured provider client, keyed by `LlmProvider`.
pub struct ProviderRegistry {
    clients: HashMap<LlmProvider, Arc<dyn LlmClient>>,
    default_provider: LlmProvider,
}

impl ProviderRegistry {
    /// Builds a registry from configuration. `openai` and `gemini` are
    /// constructed from their configured API keys when present; `anthropic`
    /// and `ollama` are populated best-effort from the environment so they
    /// remain selectable in development; `mock` is always available.
    pub fn from_config(config: &LlmRegistryConfig) -> Result<Self> {
        let default_provider = config
            .default_provider
            .parse::<LlmProvider>()
            .map_err(EngineError::llm)?;

        let mut clients: HashMap<LlmProvider, Arc<dyn LlmClient>> = HashMap::new();

        if let Some(api_key) = &config.openai.api_key {
            let openai_config = OpenAiConfig::new(api_key.clone(), config.openai.model.clone())
                .with_max_completion_tokens(config.openai.max_completion_tokens)
                .with_temperature(config.openai.temperature);
            clients.insert(LlmProvider::OpenAi, Arc::new(OpenAiClient::new(openai_config)?));
        }

        if let Some(api_key) = &config.gemini.api_key {
            let gemini_config = GeminiConfig::new(api_key.clone(), config.gemini.model.clone())
                .with_max_completion_tokens(config.gemini.max_completion_tokens)
                .with_temperature(config.gemini.temperature);
            clients.insert(LlmProvider::Gemini, Arc::new(GeminiClient::new(gemini_config)?));
        }

        if let Ok(client) = AnthropicClient::from_env() {
            clients.insert(LlmProvider::Anthropic, Arc::new(client));
        }

        if let Ok(client) = OllamaClient::from_env() {
            clients.insert(LlmProvider::Ollama, Arc::new(client));
        }

        clients.insert(LlmProvider::Mock, Arc::new(MockLlmClient::new()));

        if !clients.contains_key(&default_provider) {
            return Err(EngineError::llm(format!(
                "default LLM provider '{default_provider}' is not configured (missing API key?)"
            )));
        }

        Ok(Self { clients, default_provider })
    }

    /// Builds a registry with only the mock provider, for tests.
    pub fn mock_only() -> Self {
        let mut clients: HashMap<LlmProvider, Arc<dyn LlmClient>> = HashMap::new();
        clients.insert(LlmProvider::Mock, Arc::new(MockLlmClient::new()));
        Self { clients, default_provider: LlmProvider::Mock }
    }

    pub fn default_provider(&self) -> LlmProvider {
        self.default_provider
    }

    pub fn get(&self, provider: LlmProvider) -> Result<Arc<dyn LlmClient>> {
        self.clients
            .get(&provider)
            .cloned()
            .ok_or_else(|| EngineError::llm(format!("LLM provider '{provider}' is not configured")))
    }

    pub fn default_client(&self) -> Result<Arc<dyn LlmClient>> {
        self.get(self.default_provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_only_registry() {
        let registry = ProviderRegistry::mock_only();
        assert_eq!(registry.default_provider(), LlmProvider::Mock);
        assert!(registry.default_client().is_ok());
    }

    #[test]
    fn test_get_unconfigured_provider_errors() {
        let registry = ProviderRegistry::mock_only();
        assert!(registry.get(LlmProvider::OpenAi).is_err());
    }
}
