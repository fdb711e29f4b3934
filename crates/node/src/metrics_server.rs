//! HTTP endpoint for the node's Prometheus metrics.

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use sable_core::metrics::SyncMetrics;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_bind_address() -> String {
    "127.0.0.1:9090".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
        }
    }
}

pub struct MetricsServer {
    metrics: Arc<SyncMetrics>,
    bind_address: String,
}

impl MetricsServer {
    pub fn new(metrics: Arc<SyncMetrics>, config: &MetricsConfig) -> Self {
        Self {
            metrics,
            bind_address: config.bind_address.clone(),
        }
    }

    /// Binds the configured address and serves until the task is dropped.
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(&self.bind_address)
            .await
            .with_context(|| format!("Failed to bind metrics server to {}", self.bind_address))?;
        info!("Metrics server listening on {}", self.bind_address);
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        axum::serve(listener, create_metrics_router(self.metrics))
            .await
            .context("Metrics server failed")
    }
}

pub fn create_metrics_router(metrics: Arc<SyncMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<SyncMetrics>>) -> Result<String, StatusCode> {
    metrics.gather().map_err(|err| {
        error!("Failed to gather metrics: {}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn health_handler() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_metrics_handler() {
        let metrics = Arc::new(SyncMetrics::new().unwrap());
        metrics.blocks_committed.inc();

        let body = metrics_handler(State(metrics)).await.unwrap();
        assert!(body.contains("sable_blocks_committed_total 1"));
    }

    #[tokio::test]
    async fn test_serves_metrics_over_http() {
        let metrics = Arc::new(SyncMetrics::new().unwrap());
        metrics.commit_height.set(41);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(MetricsServer::new(metrics, &MetricsConfig::default()).serve(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("sable_commit_height 41"));
        server.abort();
    }

    #[test]
    fn test_disabled_by_default() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.bind_address, "127.0.0.1:9090");
    }
}
