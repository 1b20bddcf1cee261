//! Process-wide configuration for the chat execution engine service.
//!
//! Loaded once at startup from environment variables (optionally backed by a
//! `.env` file via `dotenvy`), with a handful of process-level overrides
//! available as CLI flags for local development.

use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Top-level service configuration, assembled once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub limits: LimitsConfig,
    pub mongo: MongoConfig,
    pub redis: RedisConfig,
    pub llm: LlmRegistryConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub is_docker: bool,
    pub environment: Environment,
    pub cors_allowed_origin: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    /// 32-byte key used to encrypt ConnectionSpec secrets at rest.
    pub schema_encryption_key: [u8; 32],
    /// 32-byte key used to sign/verify JWTs.
    pub jwt_secret: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// 0 means "trial: at most 2 chats per user", preserved for compatibility.
    pub max_chats_per_user: i64,
}

impl LimitsConfig {
    pub fn effective_max_chats(&self) -> i64 {
        if self.max_chats_per_user == 0 {
            2
        } else {
            self.max_chats_per_user
        }
    }
}

#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database_name: String,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RedisConfig {
    pub fn connection_url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(u), Some(p)) => format!("{u}:{p}@"),
            (None, Some(p)) => format!(":{p}@"),
            _ => String::new(),
        };
        format!("redis://{auth}{}:{}", self.host, self.port)
    }
}

/// Per-provider LLM settings plus the registry's default provider.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub max_completion_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct LlmRegistryConfig {
    pub default_provider: String,
    pub openai: ProviderConfig,
    pub gemini: ProviderConfig,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_var_or(name: &str, default: &str) -> String {
    env_var(name).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env_var(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` before this if a `.env` file should be honored;
    /// this function itself never touches the filesystem.
    pub fn from_env() -> Result<Self> {
        let schema_encryption_key = parse_32_byte_key(
            &env_var("SCHEMA_ENCRYPTION_KEY")
                .ok_or_else(|| EngineError::config("SCHEMA_ENCRYPTION_KEY is required"))?,
            "SCHEMA_ENCRYPTION_KEY",
        )?;

        let jwt_secret = env_var("JWT_SECRET")
            .ok_or_else(|| EngineError::config("JWT_SECRET is required"))?;
        if jwt_secret.len() < 32 {
            return Err(EngineError::config("JWT_SECRET must be at least 32 bytes"));
        }

        Ok(Self {
            server: ServerConfig {
                port: env_parse_or("PORT", 8080),
                is_docker: env_parse_or("IS_DOCKER", false),
                environment: Environment::parse(&env_var_or("ENVIRONMENT", "development")),
                cors_allowed_origin: env_var_or("CORS_ALLOWED_ORIGIN", "*"),
            },
            auth: AuthConfig {
                admin_username: env_var("ADMIN_USERNAME"),
                admin_password: env_var("ADMIN_PASSWORD"),
                schema_encryption_key,
                jwt_secret,
                access_token_ttl: Duration::from_millis(env_parse_or(
                    "USER_JWT_EXPIRATION_MILLISECONDS",
                    15 * 60 * 1000,
                )),
                refresh_token_ttl: Duration::from_millis(env_parse_or(
                    "USER_JWT_REFRESH_EXPIRATION_MILLISECONDS",
                    7 * 24 * 60 * 60 * 1000,
                )),
            },
            limits: LimitsConfig {
                max_chats_per_user: env_parse_or("MAX_CHATS_PER_USER", 0),
            },
            mongo: MongoConfig {
                uri: env_var_or("MONGODB_URI", "mongodb://localhost:27017"),
                database_name: env_var_or("MONGODB_NAME", "chat_db_engine"),
            },
            redis: RedisConfig {
                host: env_var_or("REDIS_HOST", "localhost"),
                port: env_parse_or("REDIS_PORT", 6379),
                username: env_var("REDIS_USERNAME"),
                password: env_var("REDIS_PASSWORD"),
            },
            llm: LlmRegistryConfig {
                default_provider: env_var_or("DEFAULT_LLM_CLIENT", "openai"),
                openai: ProviderConfig {
                    api_key: env_var("OPENAI_API_KEY"),
                    model: env_var_or("OPENAI_MODEL", "gpt-4o"),
                    max_completion_tokens: env_parse_or("OPENAI_MAX_COMPLETION_TOKENS", 2048),
                    temperature: env_parse_or("OPENAI_TEMPERATURE", 0.2),
                },
                gemini: ProviderConfig {
                    api_key: env_var("GEMINI_API_KEY"),
                    model: env_var_or("GEMINI_MODEL", "gemini-1.5-pro"),
                    max_completion_tokens: env_parse_or("GEMINI_MAX_COMPLETION_TOKENS", 2048),
                    temperature: env_parse_or("GEMINI_TEMPERATURE", 0.2),
                },
            },
        })
    }
}

fn parse_32_byte_key(raw: &str, var_name: &str) -> Result<[u8; 32]> {
    let bytes = raw.as_bytes();
    if bytes.len() == 32 {
        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);
        return Ok(key);
    }
    // Accept a base64-encoded 32 byte key as a common alternative.
    use base64::Engine;
    if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(raw) {
        if decoded.len() == 32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(&decoded);
            return Ok(key);
        }
    }
    Err(EngineError::config(format!(
        "{var_name} must decode to exactly 32 bytes (raw or base64)"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse() {
        assert!(Environment::parse("production").is_production());
        assert!(Environment::parse("prod").is_production());
        assert!(!Environment::parse("development").is_production());
        assert!(!Environment::parse("").is_production());
    }

    #[test]
    fn test_effective_max_chats_trial() {
        let limits = LimitsConfig {
            max_chats_per_user: 0,
        };
        assert_eq!(limits.effective_max_chats(), 2);
    }

    #[test]
    fn test_effective_max_chats_configured() {
        let limits = LimitsConfig {
            max_chats_per_user: 50,
        };
        assert_eq!(limits.effective_max_chats(), 50);
    }

    #[test]
    fn test_parse_32_byte_key_raw() {
        let raw = "a".repeat(32);
        let key = parse_32_byte_key(&raw, "TEST").unwrap();
        assert_eq!(key.len(), 32);
    }

    #[test]
    fn test_parse_32_byte_key_wrong_length_errors() {
        let result = parse_32_byte_key("too-short", "TEST");
        assert!(result.is_err());
    }

    #[test]
    fn test_redis_connection_url_no_auth() {
        let cfg = RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
        };
        assert_eq!(cfg.connection_url(), "redis://localhost:6379");
    }

    #[test]
    fn test_redis_connection_url_with_auth() {
        let cfg = RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            username: Some("u".to_string()),
            password: Some("p".to_string()),
        };
        assert_eq!(cfg.connection_url(), "redis://u:p@localhost:6379");
    }
}
