use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of a cancellable wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayOutcome {
    Elapsed,
    Cancelled,
}

/// Waits used by retry loops. Swappable so tests control time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AsyncDelayer: Send + Sync {
    /// Returns as soon as `cancel` fires, without waiting out `duration`.
    async fn delay(&self, duration: Duration, cancel: CancellationToken) -> DelayOutcome;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelayer;

#[async_trait]
impl AsyncDelayer for TokioDelayer {
    async fn delay(&self, duration: Duration, cancel: CancellationToken) -> DelayOutcome {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => DelayOutcome::Cancelled,
            _ = tokio::time::sleep(duration) => DelayOutcome::Elapsed,
        }
    }
}
