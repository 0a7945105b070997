use axum::{
    Router,
    routing::{get, post},
};

pub mod conversations;
pub mod queue;
pub mod system;
pub mod webhooks;

/// Unauthenticated endpoints (the webhook authenticates by signature).
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/webhooks/messages", post(webhooks::receive_messages))
}

/// Operator endpoints (admin bearer token).
pub fn operator_router() -> Router {
    Router::new()
        .nest("/queue", queue::router())
        .nest("/conversations", conversations::router())
}
