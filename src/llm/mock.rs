//! Mock LLM client for testing.
//!
//! Returns canned structured-JSON completions matching the strict output
//! contract, keyed on simple substring matches against the last user turn.

use async_trait::async_trait;

use crate::error::Result;
use crate::llm::types::{Message, Role};
use crate::llm::LlmClient;

/// Mock LLM client that returns canned JSON completions based on input
/// patterns. Used for unit testing without making real API calls.
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    custom_responses: Vec<(String, String)>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a custom response mapping. When the last user turn contains
    /// `pattern`, the mock returns `response` verbatim instead of its
    /// built-in heuristics.
    pub fn with_response(mut self, pattern: impl Into<String>, response: impl Into<String>) -> Self {
        self.custom_responses.push((pattern.into(), response.into()));
        self
    }

    fn mock_response(&self, input: &str) -> String {
        let input_lower = input.to_lowercase();

        for (pattern, response) in &self.custom_responses {
            if input_lower.contains(&pattern.to_lowercase()) {
                return response.clone();
            }
        }

        if input_lower.contains("all users") || input_lower.contains("show users") {
            return select_output(
                "Here are all the users.",
                "SELECT * FROM users",
                "list every user row",
                "users",
            );
        }

        if input_lower.contains("count") && input_lower.contains("orders") {
            return select_output(
                "Here is the order count.",
                "SELECT COUNT(*) FROM orders",
                "count all orders",
                "orders",
            );
        }

        if input_lower.contains("count") && input_lower.contains("users") {
            return select_output(
                "Here is the user count.",
                "SELECT COUNT(*) FROM users",
                "count all users",
                "users",
            );
        }

        if (input_lower.contains("insert") || input_lower.contains("add")) && input_lower.contains("user") {
            return mutating_output(
                "I'll add that user.",
                "INSERT INTO users (email, name) VALUES ('test@example.com', 'Test User')",
                "insert a new user row",
                "INSERT",
                "users",
                false,
                None,
            );
        }

        if input_lower.contains("update") && input_lower.contains("user") {
            return mutating_output(
                "I'll update that user.",
                "UPDATE users SET name = 'Updated Name' WHERE id = 1",
                "update a user row",
                "UPDATE",
                "users",
                true,
                Some("UPDATE users SET name = 'Original Name' WHERE id = 1"),
            );
        }

        if input_lower.contains("delete") && input_lower.contains("user") {
            return mutating_output(
                "This will permanently remove that user.",
                "DELETE FROM users WHERE id = 1",
                "delete a user row",
                "DELETE",
                "users",
                true,
                None,
            );
        }

        r#"{"assistantMessage": "I don't understand that question. Could you please rephrase it?", "queries": []}"#
            .to_string()
    }

    fn extract_user_input(messages: &[Message]) -> String {
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }
}

fn select_output(assistant_message: &str, query: &str, explanation: &str, tables: &str) -> String {
    serde_json::json!({
        "assistantMessage": assistant_message,
        "queries": [{
            "query": query,
            "explanation": explanation,
            "queryType": "SELECT",
            "tables": tables,
            "isCritical": false,
            "canRollback": false,
            "estimateResponseTime": 100,
        }],
    })
    .to_string()
}

#[allow(clippy::too_many_arguments)]
fn mutating_output(
    assistant_message: &str,
    query: &str,
    explanation: &str,
    query_type: &str,
    tables: &str,
    is_critical: bool,
    rollback_query: Option<&str>,
) -> String {
    serde_json::json!({
        "assistantMessage": assistant_message,
        "queries": [{
            "query": query,
            "explanation": explanation,
            "queryType": query_type,
            "tables": tables,
            "isCritical": is_critical,
            "canRollback": rollback_query.is_some(),
            "rollbackQuery": rollback_query,
            "estimateResponseTime": 100,
        }],
    })
    .to_string()
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let input = Self::extract_user_input(messages);
        Ok(self.mock_response(&input))
    }
}
