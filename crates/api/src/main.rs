use std::sync::Arc;

use anyhow::Context;

use ventas_infra::AppConfig;
use ventas_observability::LogFormat;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let log_format: LogFormat = config.log_format.parse()?;
    ventas_observability::init(log_format);

    let services = Arc::new(ventas_api::app::build_services(&config).await?);

    let runner = config
        .runner
        .spawn(services.processor.clone(), services.trigger.clone());

    let app = ventas_api::app::build_app(services, &config.admin_token);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    runner.shutdown().await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
