//! Sync and commit metrics.
//!
//! Each node owns one `SyncMetrics` with its own registry; nothing here is
//! process-global.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct SyncMetrics {
    registry: Registry,
    pub blocks_committed: IntCounter,
    pub commit_height: IntGauge,
    pub pool_size: IntGauge,
    pub retry_delays: IntCounter,
    pub blocks_rejected: IntCounter,
    pub headers_persisted: IntCounter,
    pub data_requests_sent: IntCounter,
    pub send_failures: IntCounter,
}

impl SyncMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("sable".to_string()), None)?;

        let blocks_committed = IntCounter::new("blocks_committed_total", "Blocks committed to storage")?;
        let commit_height = IntGauge::new("commit_height", "Index of the last committed block")?;
        let pool_size = IntGauge::new("block_pool_size", "Blocks waiting in the pool")?;
        let retry_delays = IntCounter::new("commit_retry_delays_total", "Commit loop waits for a missing index")?;
        let blocks_rejected = IntCounter::new("blocks_rejected_total", "Blocks rejected at ingestion")?;
        let headers_persisted = IntCounter::new("headers_persisted_total", "Headers stored by header sync")?;
        let data_requests_sent = IntCounter::new("data_requests_sent_total", "Block body requests sent to peers")?;
        let send_failures = IntCounter::new("peer_send_failures_total", "Messages that failed to reach a peer")?;

        registry.register(Box::new(blocks_committed.clone()))?;
        registry.register(Box::new(commit_height.clone()))?;
        registry.register(Box::new(pool_size.clone()))?;
        registry.register(Box::new(retry_delays.clone()))?;
        registry.register(Box::new(blocks_rejected.clone()))?;
        registry.register(Box::new(headers_persisted.clone()))?;
        registry.register(Box::new(data_requests_sent.clone()))?;
        registry.register(Box::new(send_failures.clone()))?;

        Ok(Self {
            registry,
            blocks_committed,
            commit_height,
            pool_size,
            retry_delays,
            blocks_rejected,
            headers_persisted,
            data_requests_sent,
            send_failures,
        })
    }

    /// Prometheus text exposition of every metric.
    pub fn gather(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
