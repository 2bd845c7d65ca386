// Logging and metrics bootstrap for the gateway service.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Initialize tracing from the environment and install the Prometheus
/// recorder. Returns the handle the metrics listener renders from.
pub fn init_observability() -> PrometheusHandle {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    PrometheusBuilder::new()
        .install_recorder()
        .expect("install metrics recorder")
}

/// Serve the Prometheus scrape endpoint on its own listener.
pub async fn serve_metrics(handle: PrometheusHandle, addr: SocketAddr) -> std::io::Result<()> {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await
}
