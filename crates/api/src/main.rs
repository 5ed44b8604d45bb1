use std::sync::Arc;

use anyhow::Context;

use shipsync_api::app::{self, services};
use shipsync_api::scheduler;
use shipsync_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shipsync_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let provider = std::env::var("WEBHOOK_PROVIDER").unwrap_or_else(|_| services::DEFAULT_PROVIDER.to_string());
    let bind_addr = std::env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let services = Arc::new(services::build_services(&config, provider).await?);
    let scheduler = scheduler::spawn(services.clone(), &config.schedule);
    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    scheduler.shutdown();
    Ok(())
}
