//! LLM Orchestrator (C5): turns a chat's message history into a candidate
//! set of queries by delegating to the provider registry.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::chat::model::LlmMessage;
use crate::db::DatabaseBackend;
use crate::error::{EngineError, Result};
use crate::llm::parser::{parse_llm_output, ParsedLlmOutput};
use crate::llm::prompt::build_messages;
use crate::llm::registry::ProviderRegistry;
use crate::llm::LlmProvider;

/// Generates structured responses from chat history, selecting the provider
/// client out of a shared registry.
pub struct LlmOrchestrator {
    registry: Arc<ProviderRegistry>,
}

impl LlmOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Generates a response for `history` against `db_type`, using the
    /// registry's default provider.
    pub async fn generate_response(
        &self,
        history: &[LlmMessage],
        db_type: DatabaseBackend,
        cancel: &CancellationToken,
    ) -> Result<ParsedLlmOutput> {
        self.generate_response_with(self.registry.default_provider(), history, db_type, cancel)
            .await
    }

    /// Same as `generate_response`, but against an explicit provider.
    pub async fn generate_response_with(
        &self,
        provider: LlmProvider,
        history: &[LlmMessage],
        db_type: DatabaseBackend,
        cancel: &CancellationToken,
    ) -> Result<ParsedLlmOutput> {
        let client = self.registry.get(provider)?;
        let messages = build_messages(history, db_type);

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(EngineError::cancelled("response generation cancelled"));
            }
            result = client.complete(&messages) => result?,
        };

        parse_llm_output(&raw)
    }
}
