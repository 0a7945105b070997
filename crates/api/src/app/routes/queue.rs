use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/items", get(list_items))
        .route("/items/:id", get(get_item))
        .route("/items/:id/retry", post(retry_item))
        .route("/process", post(process))
        .route("/cleanup", post(cleanup))
}

pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.queue.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "pending": stats.pending,
            "processing": stats.processing,
            "completed": stats.completed,
            "failed": stats.failed,
            "total": stats.total(),
        }))
        .into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn list_items(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListItemsQuery>,
) -> axum::response::Response {
    let status = match dto::parse_status(query.status.as_deref()) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    match services.queue.list(status, dto::clamp_limit(query.limit)).await {
        Ok(items) => Json(items).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

pub async fn get_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_item_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.queue.get(id).await {
        Ok(Some(item)) => Json(item).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("queue item {id} not found")),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// Move a dead-lettered item back to pending with a fresh attempt budget.
pub async fn retry_item(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_item_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.queue.retry_failed(id, Utc::now()).await {
        Ok(item) => {
            tracing::info!(item_id = %id, "failed item requeued by operator");
            services.trigger.notify();
            Json(item).into_response()
        }
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// Run one batch now, in the request.
pub async fn process(
    Extension(services): Extension<Arc<AppServices>>,
    body: Option<Json<dto::ProcessRequest>>,
) -> axum::response::Response {
    let limit = body
        .and_then(|Json(b)| b.limit)
        .unwrap_or(services.processor.config().batch_size);

    match services.processor.process_batch(limit).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}

/// Purge expired terminal items and release stale claims.
pub async fn cleanup(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    match services.processor.run_maintenance().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::queue_error_to_response(e),
    }
}
