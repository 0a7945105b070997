use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use ventas_infra::webhook::SIGNATURE_HEADER;

use crate::app::errors;
use crate::app::services::AppServices;

/// Platform webhook: verify, enqueue, answer 202 without waiting for processing.
pub async fn receive_messages(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match services.ingestor.ingest(signature, &body).await {
        Ok(receipt) => (StatusCode::ACCEPTED, Json(receipt)).into_response(),
        Err(e) => errors::ingest_error_to_response(e),
    }
}
