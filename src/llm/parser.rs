//! Strict parsing of an orchestrator completion into candidate queries.
//!
//! The provider is instructed to return a single JSON object: `{assistantMessage,
//! queries, actionButtons?}`. This module validates that shape defensively —
//! providers drift on numeric-vs-string fields and on omitting optionals — and
//! maps it onto the engine's own `chat::model` types.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::chat::model::{ActionButtonKind, Pagination, QueryType};
use crate::error::{EngineError, Result};

const DEFAULT_ESTIMATE_RESPONSE_TIME_MS: u64 = 100;

#[derive(Debug, Deserialize)]
struct RawLlmOutput {
    #[serde(rename = "assistantMessage")]
    assistant_message: String,
    #[serde(default)]
    queries: Vec<RawQueryOutput>,
    #[serde(rename = "actionButtons", default)]
    action_buttons: Vec<RawActionButton>,
}

#[derive(Debug, Deserialize)]
struct RawQueryOutput {
    query: String,
    #[serde(default)]
    explanation: String,
    #[serde(rename = "queryType")]
    query_type: String,
    #[serde(default)]
    tables: String,
    #[serde(rename = "isCritical", default)]
    is_critical: bool,
    #[serde(rename = "canRollback", default)]
    can_rollback: bool,
    #[serde(rename = "rollbackQuery", default)]
    rollback_query: Option<String>,
    #[serde(rename = "rollbackDependentQuery", default)]
    rollback_dependent_query: Option<String>,
    #[serde(rename = "exampleResult", default)]
    example_result: Option<JsonValue>,
    #[serde(rename = "estimateResponseTime", default)]
    estimate_response_time: Option<JsonValue>,
    #[serde(default)]
    pagination: Option<RawPagination>,
}

#[derive(Debug, Deserialize)]
struct RawPagination {
    #[serde(rename = "paginatedQuery", default)]
    paginated_query: Option<String>,
    #[serde(rename = "countQuery", default)]
    count_query: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawActionButton {
    kind: String,
    #[serde(default)]
    label: String,
    #[serde(rename = "queryId", default)]
    query_id: Option<String>,
}

/// A single candidate query as parsed from the provider's output.
#[derive(Debug, Clone)]
pub struct LlmQueryOutput {
    pub query: String,
    pub explanation: String,
    pub query_type: QueryType,
    pub tables: String,
    pub is_critical: bool,
    pub can_rollback: bool,
    pub rollback_query: Option<String>,
    pub rollback_dependent_query: Option<String>,
    pub example_result: Option<JsonValue>,
    pub estimate_response_time_ms: u64,
    pub pagination: Option<Pagination>,
}

/// A parsed action button suggestion. `query_id` is resolved by the caller
/// once queries have been assigned stable ids, so it stays a raw string here.
#[derive(Debug, Clone)]
pub struct LlmActionButtonOutput {
    pub kind: ActionButtonKind,
    pub label: String,
    pub query_id_hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedLlmOutput {
    pub assistant_message: String,
    pub queries: Vec<LlmQueryOutput>,
    pub action_buttons: Vec<LlmActionButtonOutput>,
}

fn parse_query_type(s: &str) -> QueryType {
    match s.to_uppercase().as_str() {
        "SELECT" => QueryType::Select,
        "INSERT" => QueryType::Insert,
        "UPDATE" => QueryType::Update,
        "DELETE" => QueryType::Delete,
        "DDL" => QueryType::Ddl,
        _ => QueryType::Other,
    }
}

fn parse_action_button_kind(s: &str) -> Option<ActionButtonKind> {
    match s.to_lowercase().as_str() {
        "fix_error" | "fixerror" => Some(ActionButtonKind::FixError),
        "run_query" | "runquery" => Some(ActionButtonKind::RunQuery),
        "rollback_query" | "rollbackquery" => Some(ActionButtonKind::RollbackQuery),
        _ => None,
    }
}

/// Coerces `estimateResponseTime` from either a JSON number or a numeric
/// string, defaulting when absent or unparsable.
fn coerce_estimate_response_time(value: Option<JsonValue>) -> u64 {
    match value {
        Some(JsonValue::Number(n)) => n.as_u64().unwrap_or(DEFAULT_ESTIMATE_RESPONSE_TIME_MS),
        Some(JsonValue::String(s)) => s
            .trim()
            .parse::<u64>()
            .unwrap_or(DEFAULT_ESTIMATE_RESPONSE_TIME_MS),
        _ => DEFAULT_ESTIMATE_RESPONSE_TIME_MS,
    }
}

/// Parses a raw completion string into the engine's internal representation.
///
/// The input is expected to be a bare JSON object; some providers wrap it in
/// a fenced code block despite instructions not to, so that wrapping is
/// stripped before parsing.
pub fn parse_llm_output(raw: &str) -> Result<ParsedLlmOutput> {
    let json_text = strip_code_fence(raw);

    let raw_output: RawLlmOutput = serde_json::from_str(json_text)
        .map_err(|e| EngineError::llm(format!("failed to parse LLM output as JSON: {e}")))?;

    let queries = raw_output
        .queries
        .into_iter()
        .map(|q| LlmQueryOutput {
            query: q.query,
            explanation: q.explanation,
            query_type: parse_query_type(&q.query_type),
            tables: q.tables,
            is_critical: q.is_critical,
            can_rollback: q.can_rollback,
            rollback_query: q.rollback_query,
            rollback_dependent_query: q.rollback_dependent_query,
            example_result: q.example_result,
            estimate_response_time_ms: coerce_estimate_response_time(q.estimate_response_time),
            pagination: q.pagination.map(|p| Pagination {
                paginated_query: p.paginated_query,
                count_query: p.count_query,
                total_records_count: None,
                offset: 0,
                limit: 50,
            }),
        })
        .collect();

    let action_buttons = raw_output
        .action_buttons
        .into_iter()
        .filter_map(|b| {
            parse_action_button_kind(&b.kind).map(|kind| LlmActionButtonOutput {
                kind,
                label: b.label,
                query_id_hint: b.query_id,
            })
        })
        .collect();

    Ok(ParsedLlmOutput {
        assistant_message: raw_output.assistant_message,
        queries,
        action_buttons,
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start();
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }
    trimmed
}
