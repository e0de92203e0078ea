use std::sync::Arc;

use anyhow::Context;
use feedpost_infra::{CycleRunner, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    feedpost_observability::init();

    let config = EngineConfig::from_env();
    let services = Arc::new(feedpost_api::app::services::build_services(config.clone()).await?);

    let runner = CycleRunner::from_cadence(config.cadence).spawn(services.driver.clone());
    let app = feedpost_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    runner.shutdown().await;
    Ok(())
}
