//! Gemini LLM client implementation.
//!
//! Implements the LlmClient trait for Google's Generative Language API
//! (`generateContent`). Gemini has no mid-conversation system role: the
//! first `Role::System` message is lifted into `systemInstruction` and the
//! remaining history is mapped onto Gemini's `user`/`model` roles.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_completion_tokens: u32,
    pub temperature: f32,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_completion_tokens: 2048,
            temperature: 0.2,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_completion_tokens(mut self, max_completion_tokens: u32) -> Self {
        self.max_completion_tokens = max_completion_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::llm(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{GEMINI_API_BASE}/{}:generateContent?key={}",
            self.config.model, self.config.api_key
        )
    }

    /// Splits the leading system message (if any) from the turn history and
    /// maps the rest onto Gemini's `user`/`model` roles.
    fn convert_messages(messages: &[Message]) -> (Option<GeminiSystemInstruction>, Vec<GeminiContent>) {
        let mut system = None;
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    system = Some(GeminiSystemInstruction {
                        parts: vec![GeminiPart { text: msg.content.clone() }],
                    });
                }
                Role::User => contents.push(GeminiContent {
                    role: "user".to_string(),
                    parts: vec![GeminiPart { text: msg.content.clone() }],
                }),
                Role::Assistant => contents.push(GeminiContent {
                    role: "model".to_string(),
                    parts: vec![GeminiPart { text: msg.content.clone() }],
                }),
            }
        }

        (system, contents)
    }

    fn parse_error(status: reqwest::StatusCode, body: &str) -> (EngineError, bool) {
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return (
                EngineError::llm("authentication failed; check GEMINI_API_KEY"),
                false,
            );
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return (EngineError::llm("rate limited by Gemini"), true);
        }

        let is_retryable = status.is_server_error();
        if let Ok(error_response) = serde_json::from_str::<GeminiErrorResponse>(body) {
            return (
                EngineError::llm(format!("Gemini API error: {}", error_response.error.message)),
                is_retryable,
            );
        }
        (
            EngineError::llm(format!("Gemini API error ({status}): {body}")),
            is_retryable,
        )
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let (system_instruction, contents) = Self::convert_messages(messages);

        let request = GeminiRequest {
            contents,
            system_instruction,
            generation_config: GeminiGenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_completion_tokens,
            },
        };

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Gemini request attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            let result = self
                .client
                .post(self.endpoint())
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    let body = response
                        .text()
                        .await
                        .map_err(|e| EngineError::llm(format!("failed to read response: {e}")))?;

                    if status.is_success() {
                        let response: GeminiResponse = serde_json::from_str(&body)
                            .map_err(|e| EngineError::llm(format!("failed to parse response: {e}")))?;

                        let candidate = response
                            .candidates
                            .into_iter()
                            .next()
                            .ok_or_else(|| EngineError::llm("no response from Gemini"))?;

                        let text = candidate
                            .content
                            .parts
                            .into_iter()
                            .map(|p| p.text)
                            .collect::<Vec<_>>()
                            .join("");

                        return Ok(text);
                    }

                    let (error, is_retryable) = Self::parse_error(status, &body);
                    last_error = Some(error);
                    if !is_retryable || attempt >= MAX_RETRY_ATTEMPTS {
                        break;
                    }
                    warn!("Gemini request failed (attempt {}), retrying in {:?}", attempt, delay);
                }
                Err(e) => {
                    let error = if e.is_timeout() {
                        EngineError::llm("request timed out")
                    } else if e.is_connect() {
                        EngineError::llm("failed to connect to Gemini API")
                    } else {
                        EngineError::llm(format!("request failed: {e}"))
                    };
                    last_error = Some(error);
                    if attempt >= MAX_RETRY_ATTEMPTS {
                        break;
                    }
                }
            }

            tokio::time::sleep(delay).await;
            delay *= 2;
        }

        Err(last_error.expect("at least one attempt was made"))
    }
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = GeminiConfig::new("key", "gemini-1.5-pro");
        assert_eq!(config.model, "gemini-1.5-pro");
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_convert_messages_splits_system() {
        let messages = vec![
            Message::system("You are helpful."),
            Message::user("Hello"),
            Message::assistant("Hi!"),
        ];
        let (system, contents) = GeminiClient::convert_messages(&messages);
        assert!(system.is_some());
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].role, "user");
        assert_eq!(contents[1].role, "model");
    }

    #[test]
    fn test_parse_error_unauthorized() {
        let (error, is_retryable) = GeminiClient::parse_error(reqwest::StatusCode::UNAUTHORIZED, "");
        assert!(error.to_string().contains("authentication failed"));
        assert!(!is_retryable);
    }

    #[test]
    fn test_parse_error_with_message() {
        let body = r#"{"error":{"message":"bad request"}}"#;
        let (error, _) = GeminiClient::parse_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert!(error.to_string().contains("bad request"));
    }
}
