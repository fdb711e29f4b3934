use crate::config::{NodeConfig, StorageBackend};
use crate::metrics_server::{MetricsConfig, MetricsServer};
use crate::syncer::HeaderSyncCoordinator;
use anyhow::{Context, Result};
use sable_common::traits::DBInterface;
use sable_core::block_processor::BlockProcessor;
use sable_core::blockchain::Blockchain;
use sable_core::block_pool::BlockPool;
use sable_core::delayer::TokioDelayer;
use sable_core::metrics::SyncMetrics;
use sable_core::persister::ChainPersister;
use sable_core::repository::KvRepository;
use sable_network::{Message, Peer};
use sable_storage::{MemoryDB, SledDB};
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// A message together with the peer it came from.
pub type Inbound = (Message, Arc<dyn Peer>);

/// Heights reported by `sable status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub current_block_height: Option<u32>,
    pub last_header_index: Option<u32>,
}

pub struct SableNode {
    chain: Arc<Blockchain>,
    processor: Arc<BlockProcessor>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<SyncMetrics>,
    metrics_config: MetricsConfig,
    sled: Option<Arc<SledDB>>,

    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
}

impl SableNode {
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let (db, sled): (Arc<dyn DBInterface>, Option<Arc<SledDB>>) = match config.storage.backend {
            StorageBackend::Sled => {
                let sled = Arc::new(SledDB::new(&config.storage.data_dir)?);
                (sled.clone(), Some(sled))
            }
            StorageBackend::Memory => (Arc::new(MemoryDB::new()), None),
        };

        let repository = Arc::new(KvRepository::new(db, config.storage.format));
        let chain = Blockchain::load(repository.as_ref())
            .await
            .context("Failed to load chain state")?;
        let metrics = Arc::new(SyncMetrics::new().context("Failed to register metrics")?);

        let pool = Arc::new(BlockPool::new());
        let persister = Arc::new(ChainPersister::new(repository.clone(), chain.clone()));
        let processor = BlockProcessor::new(
            pool.clone(),
            chain.clone(),
            repository.clone(),
            persister.clone(),
            Arc::new(TokioDelayer),
            metrics.clone(),
            config.processor.clone(),
        );
        let coordinator = HeaderSyncCoordinator::new(
            persister,
            repository,
            pool,
            chain.clone(),
            metrics.clone(),
            &config.sync,
        );
        let dispatcher = Arc::new(Dispatcher {
            processor: processor.clone(),
            coordinator,
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(config.network.inbound_capacity.max(1));

        let status = NodeStatus {
            current_block_height: chain.current_block_height().await,
            last_header_index: chain.last_header_index().await,
        };
        info!(
            backend = ?config.storage.backend,
            format = ?config.storage.format,
            height = ?status.current_block_height,
            headers = ?status.last_header_index,
            "Node initialized"
        );

        Ok(Self {
            chain,
            processor,
            dispatcher,
            metrics,
            metrics_config: config.metrics,
            sled,
            inbound_tx,
            inbound_rx,
        })
    }

    /// Sender for messages arriving from peers. Once the node runs, it stops
    /// when every sender handed out here has been dropped.
    pub fn inbound(&self) -> mpsc::Sender<Inbound> {
        self.inbound_tx.clone()
    }

    pub fn processor(&self) -> &Arc<BlockProcessor> {
        &self.processor
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            current_block_height: self.chain.current_block_height().await,
            last_header_index: self.chain.last_header_index().await,
        }
    }

    /// Runs until ctrl-c.
    pub async fn start(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    /// Runs the commit loop and dispatches inbound messages until `shutdown`
    /// resolves, the inbound channel closes or the commit loop fails.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Starting sable node...");
        let SableNode {
            chain,
            processor,
            dispatcher,
            metrics,
            metrics_config,
            sled,
            inbound_tx,
            mut inbound_rx,
        } = self;
        drop(inbound_tx);

        let metrics_task = metrics_config.enabled.then(|| {
            let server = MetricsServer::new(metrics, &metrics_config);
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!(error = %e, "Metrics server stopped");
                }
            })
        });

        let commit_loop = processor.run(chain.current_block().await)?;
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = commit_loop.stopped() => {
                    warn!("Commit loop stopped");
                    break;
                }
                inbound = inbound_rx.recv() => match inbound {
                    Some((message, peer)) => {
                        let dispatcher = dispatcher.clone();
                        handlers.spawn(async move { dispatcher.dispatch(message, peer).await });
                    }
                    None => {
                        info!("Inbound channel closed");
                        break;
                    }
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Message handler failed");
                    }
                }
            }
        }

        handlers.shutdown().await;
        if let Some(task) = metrics_task {
            task.abort();
        }
        let result = commit_loop.shutdown().await;
        if let Some(sled) = &sled {
            sled.flush().await?;
        }

        let last = result.context("Commit loop failed")?;
        info!(height = ?last.as_ref().map(|block| block.index()), "Node stopped");
        Ok(())
    }
}

/// Handles one inbound message. Each message runs on its own task.
struct Dispatcher {
    processor: Arc<BlockProcessor>,
    coordinator: HeaderSyncCoordinator,
}

impl Dispatcher {
    async fn dispatch(&self, message: Message, peer: Arc<dyn Peer>) {
        let command = message.command();
        match message {
            Message::Version(version) => {
                peer.set_current_block_index(version.current_block_index);
                if let Err(e) = self.coordinator.start_sync(peer.as_ref()).await {
                    error!(peer = %peer.id(), error = %e, "Failed to start sync");
                }
            }
            Message::BlockHeaders(payload) => {
                if let Err(e) = self.coordinator.handle_headers(payload.headers, peer.as_ref()).await {
                    error!(peer = %peer.id(), error = %e, "Failed to persist block headers");
                }
            }
            Message::Block(block) => match self.processor.add_block(block).await {
                Ok(outcome) => debug!(peer = %peer.id(), ?outcome, "Block received"),
                Err(e) if e.is_invalid_input() => warn!(peer = %peer.id(), error = %e, "Invalid block"),
                Err(e) if e.is_conflict() => debug!(peer = %peer.id(), error = %e, "Duplicate block"),
                Err(e) => error!(peer = %peer.id(), error = %e, "Failed to add block"),
            },
            Message::GetBlockHeaders(_) | Message::GetData(_) => {
                debug!(peer = %peer.id(), command, "Serving peers is not supported, ignoring");
            }
        }
    }
}
