use serde::Deserialize;
use std::time::Duration;

/// Commit loop settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ProcessorConfig {
    /// Wait before re-checking the pool for a missing index.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Capacity of the commit-completed broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_retry_delay_ms() -> u64 { 1000 }
fn default_event_capacity() -> usize { 256 }

impl ProcessorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: default_retry_delay_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}
