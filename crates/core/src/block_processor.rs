//! Block ingestion and the sequential commit loop.
//!
//! Peers push blocks through [`BlockProcessor::add_block`] in any order. A
//! single loop started with [`BlockProcessor::run`] drains the pool strictly
//! by index: it commits `n + 1` only after `n` has been persisted and its
//! commit-completed notification has been sent.

use crate::block_pool::BlockPool;
use crate::blockchain::Blockchain;
use crate::config::ProcessorConfig;
use crate::delayer::{AsyncDelayer, DelayOutcome};
use crate::metrics::SyncMetrics;
use crate::persister::BlockPersister;
use crate::repository::Repository;
use sable_common::error::SableError;
use sable_common::types::{Block, Hash, HeaderKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, instrument, warn};

/// Why a block was refused at ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("block is missing")]
    MissingBlock,

    #[error("block {index} has no hash")]
    MissingHash { index: u32 },

    #[error("block {index} carries the zero hash")]
    ZeroHash { index: u32 },

    #[error("block {0} is already queued for commit")]
    AlreadyQueued(Hash),

    #[error("index {index} is already held by another pooled block, rejected {hash}")]
    IndexOccupied { index: u32, hash: Hash },

    #[error("block {index} is at or below the committed height {height}")]
    BelowCommitted { index: u32, height: u32 },

    #[error("storage lookup failed: {0}")]
    Storage(#[from] SableError),
}

impl IngestError {
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            IngestError::MissingBlock | IngestError::MissingHash { .. } | IngestError::ZeroHash { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            IngestError::AlreadyQueued(_) | IngestError::IndexOccupied { .. } | IngestError::BelowCommitted { .. }
        )
    }
}

/// Successful ingestion results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddBlockOutcome {
    /// Added to the pool.
    Queued,
    /// Storage already holds the committed block; nothing was done.
    AlreadyCommitted,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("a commit loop is already running")]
    AlreadyRunning,

    #[error("failed to persist block {index}: {source}")]
    Persist {
        index: u32,
        #[source]
        source: SableError,
    },

    #[error("commit loop task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Where the commit loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    AwaitingNextIndex(u32),
    Persisting(u32),
    Stopped,
}

pub struct BlockProcessor {
    pool: Arc<BlockPool>,
    chain: Arc<Blockchain>,
    repository: Arc<dyn Repository>,
    persister: Arc<dyn BlockPersister>,
    delayer: Arc<dyn AsyncDelayer>,
    metrics: Arc<SyncMetrics>,
    config: ProcessorConfig,
    committed_tx: broadcast::Sender<Block>,
    state_tx: watch::Sender<ProcessorState>,
    running: AtomicBool,
}

impl BlockProcessor {
    pub fn new(
        pool: Arc<BlockPool>,
        chain: Arc<Blockchain>,
        repository: Arc<dyn Repository>,
        persister: Arc<dyn BlockPersister>,
        delayer: Arc<dyn AsyncDelayer>,
        metrics: Arc<SyncMetrics>,
        config: ProcessorConfig,
    ) -> Arc<Self> {
        let (committed_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, _) = watch::channel(ProcessorState::Idle);

        Arc::new(Self {
            pool,
            chain,
            repository,
            persister,
            delayer,
            metrics,
            config,
            committed_tx,
            state_tx,
            running: AtomicBool::new(false),
        })
    }

    /// Commit-completed notifications, one per committed block, in index order.
    pub fn subscribe(&self) -> broadcast::Receiver<Block> {
        self.committed_tx.subscribe()
    }

    pub fn state(&self) -> ProcessorState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ProcessorState> {
        self.state_tx.subscribe()
    }

    pub fn pool(&self) -> &Arc<BlockPool> {
        &self.pool
    }

    /// Validates a block and queues it for commit. Never writes storage and
    /// never waits on the commit loop.
    #[instrument(skip_all)]
    pub async fn add_block(&self, block: impl Into<Option<Block>>) -> Result<AddBlockOutcome, IngestError> {
        let result = self.ingest(block.into()).await;
        match &result {
            Ok(AddBlockOutcome::Queued) => {
                self.metrics.pool_size.set(self.pool.len().await as i64);
            }
            Ok(AddBlockOutcome::AlreadyCommitted) => {}
            Err(e) => {
                self.metrics.blocks_rejected.inc();
                debug!(error = %e, "Block rejected");
            }
        }
        result
    }

    async fn ingest(&self, block: Option<Block>) -> Result<AddBlockOutcome, IngestError> {
        let block = block.ok_or(IngestError::MissingBlock)?;
        let index = block.index();
        let hash = block.hash().ok_or(IngestError::MissingHash { index })?;
        if hash.is_zero() {
            return Err(IngestError::ZeroHash { index });
        }

        if self.pool.contains(&hash).await {
            return Err(IngestError::AlreadyQueued(hash));
        }

        let committed = self.chain.current_block_height().await;

        // Header-only entries come from header sync and still need their body.
        if let Some(header) = self.repository.get_block_header(&hash).await? {
            if header.kind == HeaderKind::Extended && committed.is_some_and(|height| header.index <= height) {
                debug!(%hash, index, "Block already committed, dropping");
                return Ok(AddBlockOutcome::AlreadyCommitted);
            }
        }

        if let Some(height) = committed {
            if index <= height {
                return Err(IngestError::BelowCommitted { index, height });
            }
        }

        if !self.pool.add(block).await {
            if self.pool.contains(&hash).await {
                return Err(IngestError::AlreadyQueued(hash));
            }
            return Err(IngestError::IndexOccupied { index, hash });
        }

        debug!(%hash, index, "Block queued for commit");
        Ok(AddBlockOutcome::Queued)
    }

    /// Starts the commit loop after `current`, or from index 0 when `current`
    /// is `None`. Only one loop may run per processor.
    pub fn run(self: &Arc<Self>, current: Option<Block>) -> Result<CommitLoop, ProcessorError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(ProcessorError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let done = CancellationToken::new();
        let processor = self.clone();
        let token = cancel.clone();
        let done_guard = done.clone().drop_guard();
        let task = tokio::spawn(async move {
            let _done = done_guard;
            let _running = RunningGuard(processor.clone());
            processor.commit_loop(current, token).await
        });

        Ok(CommitLoop {
            cancel: cancel.clone(),
            done,
            task,
            _guard: cancel.drop_guard(),
        })
    }

    async fn commit_loop(
        &self,
        mut current: Option<Block>,
        cancel: CancellationToken,
    ) -> Result<Option<Block>, ProcessorError> {
        info!(after = ?current.as_ref().map(Block::index), "Commit loop started");

        if let Some(start) = current.as_ref().map(Block::index) {
            let pruned = self.pool.prune_through(start).await;
            if pruned > 0 {
                debug!(pruned, through = start, "Dropped pooled blocks behind the commit frontier");
                self.metrics.pool_size.set(self.pool.len().await as i64);
            }
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let expected = next_index(current.as_ref());
            self.state_tx.send_replace(ProcessorState::AwaitingNextIndex(expected));

            let Some(block) = self.pool.try_get(expected).await else {
                self.metrics.retry_delays.inc();
                match self.delayer.delay(self.config.retry_delay(), cancel.clone()).await {
                    DelayOutcome::Elapsed => continue,
                    DelayOutcome::Cancelled => break,
                }
            };

            if cancel.is_cancelled() {
                break;
            }

            self.state_tx.send_replace(ProcessorState::Persisting(expected));
            if let Err(source) = self.persister.persist(&block).await {
                error!(index = expected, error = %source, "Failed to persist block, stopping commit loop");
                return Err(ProcessorError::Persist { index: expected, source });
            }

            self.pool.remove(expected).await;
            self.metrics.blocks_committed.inc();
            self.metrics.commit_height.set(expected as i64);
            self.metrics.pool_size.set(self.pool.len().await as i64);

            if self.committed_tx.send(block.clone()).is_err() {
                debug!(index = expected, "No listeners for committed block");
            }
            current = Some(block);
        }

        info!(last = ?current.as_ref().map(Block::index), "Commit loop stopped");
        Ok(current)
    }
}

/// Releases the single-loop slot when the loop task ends, panics included.
struct RunningGuard(Arc<BlockProcessor>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.state_tx.send_replace(ProcessorState::Stopped);
        self.0.running.store(false, Ordering::Release);
    }
}

fn next_index(current: Option<&Block>) -> u32 {
    match current {
        Some(block) => match block.index().checked_add(1) {
            Some(next) => next,
            None => {
                warn!("Chain index space exhausted");
                u32::MAX
            }
        },
        None => 0,
    }
}

/// Handle to a running commit loop. Dropping it cancels the loop.
pub struct CommitLoop {
    cancel: CancellationToken,
    done: CancellationToken,
    task: JoinHandle<Result<Option<Block>, ProcessorError>>,
    _guard: DropGuard,
}

impl CommitLoop {
    /// Cancels any pending retry wait and stops further persistence. A
    /// persist call already in flight is allowed to finish.
    pub fn dispose(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolves once the loop has ended, for any reason.
    pub async fn stopped(&self) {
        self.done.cancelled().await
    }

    /// Waits for the loop to end. Returns the last committed block, which is
    /// the starting point for a later `run`.
    pub async fn join(self) -> Result<Option<Block>, ProcessorError> {
        self.task.await?
    }

    pub async fn shutdown(self) -> Result<Option<Block>, ProcessorError> {
        self.dispose();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delayer::{MockAsyncDelayer, TokioDelayer};
    use crate::persister::MockBlockPersister;
    use crate::repository::MockRepository;
    use async_trait::async_trait;
    use sable_common::types::BlockHeader;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    const H1: &str = "1a259dba256600620c6c91094f3a300b30f0cbaecee19c6114deffd3288957d7";

    fn block(index: u32) -> Block {
        let mut b = Block::default();
        b.header.index = index;
        b.sign();
        b
    }

    fn block_with_hash(index: u32, hash: Option<Hash>) -> Block {
        let mut b = Block::default();
        b.header.index = index;
        b.header.hash = hash;
        b
    }

    fn processor(
        pool: Arc<BlockPool>,
        repository: MockRepository,
        persister: Arc<dyn BlockPersister>,
        delayer: Arc<dyn AsyncDelayer>,
    ) -> Arc<BlockProcessor> {
        processor_on(Arc::new(Blockchain::new(None, None)), pool, repository, persister, delayer)
    }

    fn processor_on(
        chain: Arc<Blockchain>,
        pool: Arc<BlockPool>,
        repository: MockRepository,
        persister: Arc<dyn BlockPersister>,
        delayer: Arc<dyn AsyncDelayer>,
    ) -> Arc<BlockProcessor> {
        BlockProcessor::new(
            pool,
            chain,
            Arc::new(repository),
            persister,
            delayer,
            Arc::new(SyncMetrics::new().unwrap()),
            ProcessorConfig { retry_delay_ms: 5, event_capacity: 64 },
        )
    }

    fn unknown_repository() -> MockRepository {
        let mut repo = MockRepository::new();
        repo.expect_get_block_header().returning(|_| Ok(None));
        repo
    }

    fn idle_persister() -> Arc<dyn BlockPersister> {
        let mut persister = MockBlockPersister::new();
        persister.expect_persist().never();
        Arc::new(persister)
    }

    /// Records persisted indexes in call order.
    #[derive(Default)]
    struct RecordingPersister {
        persisted: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl BlockPersister for RecordingPersister {
        async fn persist(&self, block: &Block) -> sable_common::Result<()> {
            self.persisted.lock().unwrap().push(block.index());
            Ok(())
        }

        async fn persist_headers(&self, _headers: Vec<BlockHeader>) -> sable_common::Result<Vec<BlockHeader>> {
            Ok(Vec::new())
        }
    }

    /// Holds every persist call until released.
    struct GatedPersister {
        entered: Notify,
        release: Notify,
        calls: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl BlockPersister for GatedPersister {
        async fn persist(&self, block: &Block) -> sable_common::Result<()> {
            self.calls.lock().unwrap().push(block.index());
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }

        async fn persist_headers(&self, _headers: Vec<BlockHeader>) -> sable_common::Result<Vec<BlockHeader>> {
            Ok(Vec::new())
        }
    }

    // --- ingestion ---

    #[tokio::test]
    async fn test_add_block_missing_block_is_invalid() {
        let pool = Arc::new(BlockPool::new());
        let p = processor(pool.clone(), MockRepository::new(), idle_persister(), Arc::new(TokioDelayer));

        let err = p.add_block(None::<Block>).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingBlock));
        assert!(err.is_invalid_input());
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_block_missing_or_zero_hash_is_invalid() {
        let pool = Arc::new(BlockPool::new());
        let p = processor(pool.clone(), MockRepository::new(), idle_persister(), Arc::new(TokioDelayer));

        let err = p.add_block(block_with_hash(1, None)).await.unwrap_err();
        assert!(matches!(err, IngestError::MissingHash { index: 1 }));
        assert!(err.is_invalid_input());

        let err = p.add_block(block_with_hash(1, Some(Hash::ZERO))).await.unwrap_err();
        assert!(matches!(err, IngestError::ZeroHash { index: 1 }));
        assert!(err.is_invalid_input());

        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_add_block_already_pooled_is_conflict() {
        let pool = Arc::new(BlockPool::new());
        let b = block(1);
        pool.add(b.clone()).await;

        let mut repo = MockRepository::new();
        repo.expect_get_block_header().never();
        let p = processor(pool.clone(), repo, idle_persister(), Arc::new(TokioDelayer));

        let err = p.add_block(b).await.unwrap_err();
        assert!(matches!(err, IngestError::AlreadyQueued(_)));
        assert!(err.is_conflict());
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_add_block_already_committed_is_noop() {
        let pool = Arc::new(BlockPool::new());
        let b = block_with_hash(1, Some(H1.parse().unwrap()));
        let expected = b.hash();

        let mut repo = MockRepository::new();
        repo.expect_get_block_header()
            .withf(move |hash| Some(*hash) == expected)
            .times(1)
            .returning(|hash| {
                Ok(Some(BlockHeader {
                    index: 1,
                    kind: HeaderKind::Extended,
                    hash: Some(*hash),
                    ..Default::default()
                }))
            });
        let chain = Arc::new(Blockchain::new(Some(block(1)), None));
        let p = processor_on(chain, pool.clone(), repo, idle_persister(), Arc::new(TokioDelayer));

        assert_eq!(p.add_block(b).await.unwrap(), AddBlockOutcome::AlreadyCommitted);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_extended_header_above_committed_height_is_queued() {
        // header written by a commit whose height never reached storage
        let pool = Arc::new(BlockPool::new());
        let b = block(0);
        let mut repo = MockRepository::new();
        repo.expect_get_block_header().returning(|hash| {
            Ok(Some(BlockHeader { index: 0, kind: HeaderKind::Extended, hash: Some(*hash), ..Default::default() }))
        });
        let p = processor(pool.clone(), repo, idle_persister(), Arc::new(TokioDelayer));

        assert_eq!(p.add_block(b.clone()).await.unwrap(), AddBlockOutcome::Queued);
        assert_eq!(pool.try_get(0).await, Some(b));
    }

    #[tokio::test]
    async fn test_add_block_below_committed_height_is_rejected() {
        let pool = Arc::new(BlockPool::new());
        let chain = Arc::new(Blockchain::new(Some(block(5)), None));
        let p = processor_on(chain, pool.clone(), unknown_repository(), idle_persister(), Arc::new(TokioDelayer));

        let err = p.add_block(block(3)).await.unwrap_err();
        assert!(matches!(err, IngestError::BelowCommitted { index: 3, height: 5 }));
        assert!(err.is_conflict());

        let mut rival = block(5);
        rival.header.consensus_data = 7;
        rival.sign();
        assert!(p.add_block(rival).await.unwrap_err().is_conflict());
        assert!(pool.is_empty().await);

        assert_eq!(p.add_block(block(6)).await.unwrap(), AddBlockOutcome::Queued);
    }

    #[tokio::test]
    async fn test_add_block_with_synced_header_only_is_queued() {
        let pool = Arc::new(BlockPool::new());
        let b = block(3);

        let mut repo = MockRepository::new();
        repo.expect_get_block_header().returning(|hash| {
            Ok(Some(BlockHeader { index: 3, kind: HeaderKind::Header, hash: Some(*hash), ..Default::default() }))
        });
        let p = processor(pool.clone(), repo, idle_persister(), Arc::new(TokioDelayer));

        assert_eq!(p.add_block(b.clone()).await.unwrap(), AddBlockOutcome::Queued);
        assert_eq!(pool.try_get(3).await, Some(b));
    }

    #[tokio::test]
    async fn test_add_block_unknown_queued_once_then_conflict() {
        let pool = Arc::new(BlockPool::new());
        let p = processor(pool.clone(), unknown_repository(), idle_persister(), Arc::new(TokioDelayer));
        let b = block(1);

        assert_eq!(p.add_block(b.clone()).await.unwrap(), AddBlockOutcome::Queued);
        assert!(p.add_block(b).await.unwrap_err().is_conflict());
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_add_block_rival_at_same_index_is_conflict() {
        let pool = Arc::new(BlockPool::new());
        let p = processor(pool.clone(), unknown_repository(), idle_persister(), Arc::new(TokioDelayer));
        let mut rival = block(1);
        rival.header.consensus_data = 99;
        rival.sign();

        p.add_block(block(1)).await.unwrap();
        let err = p.add_block(rival).await.unwrap_err();
        assert!(matches!(err, IngestError::IndexOccupied { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_add_block_storage_failure_surfaces() {
        let pool = Arc::new(BlockPool::new());
        let mut repo = MockRepository::new();
        repo.expect_get_block_header()
            .returning(|_| Err(SableError::Internal("lookup failed".to_string())));
        let p = processor(pool.clone(), repo, idle_persister(), Arc::new(TokioDelayer));

        let err = p.add_block(block(1)).await.unwrap_err();
        assert!(matches!(err, IngestError::Storage(_)));
        assert!(!err.is_conflict() && !err.is_invalid_input());
        assert!(pool.is_empty().await);
    }

    // --- commit loop ---

    #[tokio::test]
    async fn test_next_block_in_pool_is_committed_and_announced() {
        let pool = Arc::new(BlockPool::new());
        let new_block = block_with_hash(1, Some(H1.parse().unwrap()));
        pool.add(new_block.clone()).await;

        let mut persister = MockBlockPersister::new();
        let expected = new_block.clone();
        persister
            .expect_persist()
            .withf(move |b| *b == expected)
            .times(1)
            .returning(|_| Ok(()));

        let mut delayer = MockAsyncDelayer::new();
        delayer.expect_delay().returning(|_, token| {
            token.cancel();
            DelayOutcome::Cancelled
        });

        let p = processor(pool.clone(), MockRepository::new(), Arc::new(persister), Arc::new(delayer));
        let mut committed = p.subscribe();

        let last = p.run(Some(block(0))).unwrap().join().await.unwrap();

        assert_eq!(last, Some(new_block.clone()));
        assert_eq!(committed.recv().await.unwrap(), new_block);
        assert!(committed.try_recv().is_err());
        assert!(pool.is_empty().await);
        assert_eq!(p.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn test_missing_next_block_waits_and_cancels_without_persisting() {
        let pool = Arc::new(BlockPool::new());
        // index 2 is buffered but index 1 is the one expected
        pool.add(block(2)).await;

        let mut delayer = MockAsyncDelayer::new();
        delayer
            .expect_delay()
            .withf(|duration, _| *duration == Duration::from_millis(5))
            .times(1)
            .returning(|_, token| {
                token.cancel();
                DelayOutcome::Cancelled
            });

        let p = processor(pool.clone(), MockRepository::new(), idle_persister(), Arc::new(delayer));
        let last = p.run(Some(block(0))).unwrap().join().await.unwrap();

        assert_eq!(last.map(|b| b.index()), Some(0));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_no_current_block_starts_at_index_zero() {
        let pool = Arc::new(BlockPool::new());
        pool.add(block(0)).await;

        let persister = Arc::new(RecordingPersister::default());
        let mut delayer = MockAsyncDelayer::new();
        delayer.expect_delay().returning(|_, token| {
            token.cancel();
            DelayOutcome::Cancelled
        });

        let p = processor(pool, MockRepository::new(), persister.clone(), Arc::new(delayer));
        let last = p.run(None).unwrap().join().await.unwrap();

        assert_eq!(last.map(|b| b.index()), Some(0));
        assert_eq!(*persister.persisted.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_persist_failure_is_fatal_and_does_not_skip() {
        let pool = Arc::new(BlockPool::new());
        pool.add(block(1)).await;
        pool.add(block(2)).await;

        let mut persister = MockBlockPersister::new();
        persister
            .expect_persist()
            .times(1)
            .returning(|_| Err(SableError::Internal("disk full".to_string())));

        let p = processor(pool.clone(), MockRepository::new(), Arc::new(persister), Arc::new(TokioDelayer));
        let mut committed = p.subscribe();

        let commit_loop = p.run(Some(block(0))).unwrap();
        commit_loop.stopped().await;
        let err = commit_loop.join().await.unwrap_err();
        assert!(matches!(err, ProcessorError::Persist { index: 1, .. }));
        assert!(committed.try_recv().is_err());
        // the failed block stays buffered
        assert!(pool.try_get(1).await.is_some());
    }

    #[tokio::test]
    async fn test_run_drops_pooled_blocks_behind_start() {
        let pool = Arc::new(BlockPool::new());
        for index in [1, 2, 4] {
            pool.add(block(index)).await;
        }

        let mut delayer = MockAsyncDelayer::new();
        delayer.expect_delay().returning(|_, token| {
            token.cancel();
            DelayOutcome::Cancelled
        });

        let p = processor(pool.clone(), MockRepository::new(), idle_persister(), Arc::new(delayer));
        p.run(Some(block(2))).unwrap().join().await.unwrap();

        assert_eq!(pool.len().await, 1);
        assert!(pool.try_get(4).await.is_some());
    }

    struct PanickingPersister;

    #[async_trait]
    impl BlockPersister for PanickingPersister {
        async fn persist(&self, _block: &Block) -> sable_common::Result<()> {
            panic!("persist blew up");
        }

        async fn persist_headers(&self, _headers: Vec<BlockHeader>) -> sable_common::Result<Vec<BlockHeader>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_panicked_loop_can_be_restarted() {
        let pool = Arc::new(BlockPool::new());
        pool.add(block(1)).await;
        let p = processor(pool, MockRepository::new(), Arc::new(PanickingPersister), Arc::new(TokioDelayer));

        let err = p.run(Some(block(0))).unwrap().join().await.unwrap_err();
        assert!(matches!(err, ProcessorError::Task(_)));
        assert_eq!(p.state(), ProcessorState::Stopped);

        let again = p.run(None).unwrap();
        again.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_single_loop_per_processor() {
        let pool = Arc::new(BlockPool::new());
        let p = processor(pool, MockRepository::new(), idle_persister(), Arc::new(TokioDelayer));

        let running = p.run(None).unwrap();
        assert!(matches!(p.run(None), Err(ProcessorError::AlreadyRunning)));

        running.shutdown().await.unwrap();
        let again = p.run(None).unwrap();
        again.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dispose_during_persist_lets_it_finish_and_stops() {
        let pool = Arc::new(BlockPool::new());
        pool.add(block(1)).await;
        pool.add(block(2)).await;

        let persister = Arc::new(GatedPersister {
            entered: Notify::new(),
            release: Notify::new(),
            calls: Mutex::new(Vec::new()),
        });
        let p = processor(pool.clone(), MockRepository::new(), persister.clone(), Arc::new(TokioDelayer));
        let mut committed = p.subscribe();

        let commit_loop = p.run(Some(block(0))).unwrap();
        persister.entered.notified().await;
        commit_loop.dispose();
        persister.release.notify_one();

        let last = commit_loop.join().await.unwrap();
        assert_eq!(last.map(|b| b.index()), Some(1));
        assert_eq!(*persister.calls.lock().unwrap(), vec![1]);
        assert_eq!(committed.recv().await.unwrap().index(), 1);
        assert!(pool.try_get(2).await.is_some());
    }

    #[tokio::test]
    async fn test_dispose_wakes_pending_delay() {
        let pool = Arc::new(BlockPool::new());
        let p = BlockProcessor::new(
            pool,
            Arc::new(Blockchain::new(None, None)),
            Arc::new(MockRepository::new()),
            idle_persister(),
            Arc::new(TokioDelayer),
            Arc::new(SyncMetrics::new().unwrap()),
            ProcessorConfig { retry_delay_ms: 60_000, event_capacity: 8 },
        );

        let commit_loop = p.run(None).unwrap();
        let mut state = p.watch_state();
        state.wait_for(|s| *s == ProcessorState::AwaitingNextIndex(0)).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), commit_loop.shutdown()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_out_of_order_arrivals_commit_in_order() {
        let pool = Arc::new(BlockPool::new());
        let persister = Arc::new(RecordingPersister::default());
        let p = processor(pool, unknown_repository(), persister.clone(), Arc::new(TokioDelayer));
        let mut committed = p.subscribe();

        let commit_loop = p.run(Some(block(0))).unwrap();

        let mut producers = Vec::new();
        for chunk in [vec![7u32, 3, 9], vec![2, 10, 5], vec![1, 8, 4, 6]] {
            let p = p.clone();
            producers.push(tokio::spawn(async move {
                for index in chunk {
                    p.add_block(block(index)).await.unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 10 {
            seen.push(committed.recv().await.unwrap().index());
        }
        let last = commit_loop.shutdown().await.unwrap();

        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
        assert_eq!(*persister.persisted.lock().unwrap(), (1..=10).collect::<Vec<_>>());
        assert_eq!(last.map(|b| b.index()), Some(10));
    }

    #[tokio::test]
    async fn test_restart_resumes_without_double_commit() {
        let pool = Arc::new(BlockPool::new());
        let persister = Arc::new(RecordingPersister::default());
        let p = processor(pool.clone(), MockRepository::new(), persister.clone(), Arc::new(TokioDelayer));
        let mut committed = p.subscribe();

        pool.add(block(1)).await;
        pool.add(block(2)).await;
        let first = p.run(Some(block(0))).unwrap();
        committed.recv().await.unwrap();
        committed.recv().await.unwrap();
        let resume_from = first.shutdown().await.unwrap();
        assert_eq!(resume_from.as_ref().map(Block::index), Some(2));

        pool.add(block(3)).await;
        let second = p.run(resume_from).unwrap();
        assert_eq!(committed.recv().await.unwrap().index(), 3);
        second.shutdown().await.unwrap();

        assert_eq!(*persister.persisted.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_next_index() {
        assert_eq!(next_index(None), 0);
        assert_eq!(next_index(Some(&block(4))), 5);
    }
}
