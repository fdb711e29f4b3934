pub mod block_pool;
pub mod block_processor;
pub mod blockchain;
pub mod config;
pub mod delayer;
pub mod metrics;
pub mod persister;
pub mod repository;

// Re-export commonly used types
pub use block_pool::BlockPool;
pub use block_processor::{AddBlockOutcome, BlockProcessor, CommitLoop, IngestError, ProcessorError, ProcessorState};
pub use blockchain::Blockchain;
pub use config::ProcessorConfig;
pub use delayer::{AsyncDelayer, DelayOutcome, TokioDelayer};
pub use metrics::SyncMetrics;
pub use persister::{BlockPersister, ChainPersister};
pub use repository::{KvRepository, Repository};
