//! HTTP API: webhook intake, operator endpoints, process bootstrap.

pub mod app;
pub mod middleware;
