use crate::Metrics;
use anyhow::{Error as AnyhowError, Result};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct MetricsServerConfig {
    pub metrics_address: IpAddr,
    pub metrics_port: u16,
}

impl From<&MetricsServerConfig> for SocketAddr {
    fn from(config: &MetricsServerConfig) -> Self {
        SocketAddr::from((config.metrics_address, config.metrics_port))
    }
}

async fn prometheus_metrics_handler(
    State(metrics): State<Arc<Metrics>>,
) -> Result<String, (StatusCode, String)> {
    metrics.gather().map_err(|err| {
        warn!(error = %err, "Failed to gather metrics");
        (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    })
}

pub async fn run_metrics_server(config: MetricsServerConfig, metrics: Arc<Metrics>) -> Result<()> {
    let addr = SocketAddr::from(&config);

    let router = Router::new()
        .route("/metrics", get(prometheus_metrics_handler))
        .with_state(metrics);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Metrics server listening");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(AnyhowError::new)?;

    Ok(())
}
