// Gateway service main entry point.
use anyhow::{Context, Result};
use gateway::app::{AppState, build_router};
use gateway::config::GatewayConfig;
use gateway::observability;
use hermod_broker::TopicRepository;
use hermod_log::MemoryLog;
use std::sync::Arc;

// Brokers modeled by the in-process log store.
const MEMORY_BROKERS: u32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env_or_yaml()?;
    let metrics_handle = observability::init_observability();
    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    // In-process log store behind the client seam; a real cluster client
    // plugs in here without touching the repository.
    let log = Arc::new(MemoryLog::new(MEMORY_BROKERS));
    let repository = Arc::new(TopicRepository::new(
        log.clone(),
        log,
        config.repository_settings(),
    ));

    let listen_bind = config.listen_bind;
    let state = AppState::new(repository, config);
    let listener = tokio::net::TcpListener::bind(listen_bind)
        .await
        .with_context(|| format!("bind {listen_bind}"))?;
    tracing::info!(addr = %listen_bind, "gateway listening");
    axum::serve(listener, build_router(state).into_make_service())
        .await
        .context("serve gateway")?;
    Ok(())
}
