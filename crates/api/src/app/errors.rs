use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use ventas_infra::conversations::{ConversationServiceError, ConversationStoreError};
use ventas_infra::queue::QueueStoreError;
use ventas_infra::webhook::IngestError;

pub fn queue_error_to_response(err: QueueStoreError) -> axum::response::Response {
    match err {
        QueueStoreError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("queue item {id} not found"))
        }
        QueueStoreError::AlreadyExists(id) => {
            json_error(StatusCode::CONFLICT, "conflict", format!("queue item {id} already exists"))
        }
        QueueStoreError::InvalidState(msg) => json_error(StatusCode::CONFLICT, "invalid_state", msg),
        QueueStoreError::Storage(msg) => {
            tracing::error!(error = %msg, "queue store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
    }
}

pub fn conversation_error_to_response(err: ConversationServiceError) -> axum::response::Response {
    match err {
        ConversationServiceError::Store(ConversationStoreError::NotFound(id)) => json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("conversation {id} not found"),
        ),
        ConversationServiceError::Store(ConversationStoreError::Domain(e)) => {
            json_error(StatusCode::CONFLICT, "invalid_transition", e.to_string())
        }
        ConversationServiceError::Store(ConversationStoreError::Storage(msg)) => {
            tracing::error!(error = %msg, "conversation store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg)
        }
        ConversationServiceError::Messaging(e) => {
            json_error(StatusCode::BAD_GATEWAY, "messaging_error", e.to_string())
        }
    }
}

pub fn ingest_error_to_response(err: IngestError) -> axum::response::Response {
    match err {
        IngestError::Unauthorized(msg) => json_error(StatusCode::UNAUTHORIZED, "unauthorized", msg),
        IngestError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        IngestError::Store(e) => queue_error_to_response(e),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
