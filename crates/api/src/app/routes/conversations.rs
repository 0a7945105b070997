use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::{get, post},
};

use ventas_core::ConversationId;
use ventas_infra::conversations::{ConversationServiceError, ConversationStoreError};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:id", get(get_conversation))
        .route("/:id/escalations", get(list_escalations))
        .route("/:id/messages", get(list_messages))
        .route("/:id/assign", post(assign))
        .route("/:id/release", post(release))
        .route("/:id/close", post(close))
}

fn store_error(err: ConversationStoreError) -> axum::response::Response {
    errors::conversation_error_to_response(ConversationServiceError::Store(err))
}

async fn require_conversation(
    services: &AppServices,
    id: String,
) -> Result<ConversationId, axum::response::Response> {
    let id = dto::parse_conversation_id(id)?;
    match services.conversations.store().get(&id).await {
        Ok(Some(_)) => Ok(id),
        Ok(None) => Err(store_error(ConversationStoreError::NotFound(id))),
        Err(e) => Err(store_error(e)),
    }
}

pub async fn get_conversation(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_conversation_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.conversations.store().get(&id).await {
        Ok(Some(conversation)) => Json(conversation).into_response(),
        Ok(None) => store_error(ConversationStoreError::NotFound(id)),
        Err(e) => store_error(e),
    }
}

/// Escalation audit, oldest first.
pub async fn list_escalations(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match require_conversation(&services, id).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.conversations.store().list_escalations(&id).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn list_messages(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Query(query): Query<dto::LimitQuery>,
) -> axum::response::Response {
    let id = match require_conversation(&services, id).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services
        .conversations
        .store()
        .list_messages(&id, dto::clamp_limit(query.limit))
        .await
    {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn assign(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::AssignRequest>,
) -> axum::response::Response {
    let id = match dto::parse_conversation_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let agent = match dto::parse_agent_id(body.agent_id) {
        Ok(agent) => agent,
        Err(resp) => return resp,
    };

    match services.conversations.assign(&id, agent).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => errors::conversation_error_to_response(e),
    }
}

pub async fn release(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match dto::parse_conversation_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.conversations.release(&id).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => errors::conversation_error_to_response(e),
    }
}

pub async fn close(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = match dto::parse_conversation_id(id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.conversations.close(&id).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => errors::conversation_error_to_response(e),
    }
}
