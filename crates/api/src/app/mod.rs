//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, capability clients, handlers, processor
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and parsing helpers
//! - `errors.rs`: consistent `{"error", "message"}` responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, Clients, assemble, build_services};

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>, admin_token: &str) -> Router {
    let auth_state = middleware::AdminAuthState {
        token: Arc::from(admin_token),
    };

    let operator = routes::operator_router().route_layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::admin_auth_middleware,
    ));

    Router::new()
        .merge(routes::public_router())
        .merge(operator)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}
