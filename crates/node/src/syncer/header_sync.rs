//! Header-first sync.
//!
//! Header batches are persisted before anything else happens. Bodies are then
//! requested in bounded chunks for every stored header above the committed
//! height that has no pooled block yet, and the next header range is
//! requested while the peer is still ahead. The missing set is rebuilt from
//! storage each time, so a lost request or a restart is repaired by the next
//! cycle.

use crate::config::SyncConfig;
use sable_common::error::Result;
use sable_common::types::{BlockHeader, Hash};
use sable_core::block_pool::BlockPool;
use sable_core::blockchain::{is_behind, Blockchain};
use sable_core::metrics::SyncMetrics;
use sable_core::persister::BlockPersister;
use sable_core::repository::Repository;
use sable_network::messages::GetBlockHeadersPayload;
use sable_network::{InventoryPayload, Message, Peer};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What one sync step led to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Headers stored by this batch.
    pub persisted: usize,
    /// Body requests delivered to the peer.
    pub data_requests_sent: usize,
    /// Messages that could not be delivered.
    pub send_failures: usize,
    /// Whether the next header range was requested.
    pub requested_headers: bool,
}

pub struct HeaderSyncCoordinator {
    persister: Arc<dyn BlockPersister>,
    repository: Arc<dyn Repository>,
    pool: Arc<BlockPool>,
    chain: Arc<Blockchain>,
    metrics: Arc<SyncMetrics>,
    chunk_size: usize,
    request_window: u32,
}

impl HeaderSyncCoordinator {
    pub fn new(
        persister: Arc<dyn BlockPersister>,
        repository: Arc<dyn Repository>,
        pool: Arc<BlockPool>,
        chain: Arc<Blockchain>,
        metrics: Arc<SyncMetrics>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            persister,
            repository,
            pool,
            chain,
            metrics,
            chunk_size: config.chunk_size(),
            request_window: config.request_window(),
        }
    }

    /// Handles a headers message from `peer`. Persistence and lookup failures
    /// are returned as errors; delivery failures are counted in the report.
    #[instrument(skip_all, fields(peer = %peer.id(), count = headers.len()))]
    pub async fn handle_headers(&self, headers: Vec<BlockHeader>, peer: &dyn Peer) -> Result<SyncReport> {
        let persisted = self.persister.persist_headers(headers).await?;
        self.metrics.headers_persisted.inc_by(persisted.len() as u64);

        let mut report = SyncReport {
            persisted: persisted.len(),
            ..Default::default()
        };
        self.sync_with(peer, &mut report).await?;

        debug!(?report, "Header batch handled");
        Ok(report)
    }

    /// Starts sync with a newly versioned peer: bodies still missing below
    /// the header frontier, then headers if the peer is ahead.
    #[instrument(skip_all, fields(peer = %peer.id()))]
    pub async fn start_sync(&self, peer: &dyn Peer) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        self.sync_with(peer, &mut report).await?;
        debug!(?report, "Sync started");
        Ok(report)
    }

    async fn sync_with(&self, peer: &dyn Peer, report: &mut SyncReport) -> Result<()> {
        let peer_index = peer.current_block_index();

        if is_behind(self.chain.current_block_height().await, peer_index) {
            let hashes = self.missing_block_hashes().await?;
            self.request_blocks(&hashes, peer, report).await;
        }

        let last_header_index = self.chain.last_header_index().await;
        if is_behind(last_header_index, peer_index) {
            info!(
                peer_blocks = peer_index as u64 + 1,
                local_headers = last_header_index.map_or(0, |index| index as u64 + 1),
                "Peer is ahead of local headers"
            );
            if self.request_headers(peer).await {
                report.requested_headers = true;
            } else {
                report.send_failures += 1;
            }
        }
        Ok(())
    }

    /// Stored header hashes above the committed height whose block is not
    /// pooled, lowest first, within the request window.
    async fn missing_block_hashes(&self) -> Result<Vec<Hash>> {
        let Some(frontier) = self.chain.last_header_index().await else {
            return Ok(Vec::new());
        };
        let start = match self.chain.current_block_height().await {
            Some(height) => match height.checked_add(1) {
                Some(next) => next,
                None => return Ok(Vec::new()),
            },
            None => 0,
        };
        if start > frontier {
            return Ok(Vec::new());
        }
        let end = frontier.min(start.saturating_add(self.request_window - 1));

        let mut hashes = Vec::new();
        for height in start..=end {
            let Some(hash) = self
                .repository
                .get_block_header_by_height(height)
                .await?
                .and_then(|header| header.hash)
            else {
                continue;
            };
            if !self.pool.contains(&hash).await {
                hashes.push(hash);
            }
        }
        Ok(hashes)
    }

    async fn request_blocks(&self, hashes: &[Hash], peer: &dyn Peer, report: &mut SyncReport) {
        for chunk in hashes.chunks(self.chunk_size) {
            let inventory = match InventoryPayload::blocks(chunk.to_vec()) {
                Ok(inventory) => inventory,
                Err(e) => {
                    warn!(error = %e, "Skipping invalid inventory chunk");
                    report.send_failures += 1;
                    continue;
                }
            };

            match peer.send(Message::GetData(inventory)).await {
                Ok(()) => {
                    report.data_requests_sent += 1;
                    self.metrics.data_requests_sent.inc();
                }
                Err(e) => {
                    warn!(error = %e, hashes = chunk.len(), "Failed to request blocks");
                    report.send_failures += 1;
                    self.metrics.send_failures.inc();
                }
            }
        }
    }

    async fn request_headers(&self, peer: &dyn Peer) -> bool {
        let hash_start = self
            .chain
            .last_block_header()
            .await
            .and_then(|header| header.hash)
            .unwrap_or(Hash::ZERO);

        let message = Message::GetBlockHeaders(GetBlockHeadersPayload::new(hash_start));
        match peer.send(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, %hash_start, "Failed to request headers");
                self.metrics.send_failures.inc();
                false
            }
        }
    }
}
