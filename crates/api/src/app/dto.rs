use axum::http::StatusCode;
use serde::Deserialize;

use ventas_core::{AgentId, ConversationId, QueueItemId};
use ventas_queue::QueueStatus;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub agent_id: String,
}

// -------------------------
// Parsing helpers
// -------------------------

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

pub fn parse_status(s: Option<&str>) -> Result<Option<QueueStatus>, axum::response::Response> {
    match s {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse::<QueueStatus>().map(Some).map_err(|_| {
            errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_status",
                "status must be one of: pending, processing, completed, failed",
            )
        }),
    }
}

pub fn parse_item_id(s: &str) -> Result<QueueItemId, axum::response::Response> {
    s.parse::<QueueItemId>()
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

pub fn parse_conversation_id(s: String) -> Result<ConversationId, axum::response::Response> {
    ConversationId::parse(s)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}

pub fn parse_agent_id(s: String) -> Result<AgentId, axum::response::Response> {
    AgentId::parse(s)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", e.to_string()))
}
