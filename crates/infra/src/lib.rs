//! Infrastructure layer: persistence, queue execution, external clients,
//! webhook ingestion and configuration.

pub mod config;
pub mod conversations;
pub mod db;
pub mod external;
pub mod queue;
pub mod webhook;

pub use config::AppConfig;
