use crate::messages::Message;
use async_trait::async_trait;
use sable_common::error::NetworkError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::trace;

/// Longest a send waits for room in a full peer queue.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected remote node as seen by the sync layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Peer: Send + Sync {
    fn id(&self) -> String;

    /// Height the peer advertised in its last version message.
    fn current_block_index(&self) -> u32;

    fn set_current_block_index(&self, index: u32);

    async fn send(&self, message: Message) -> Result<(), NetworkError>;
}

/// Peer whose outbound messages land on an mpsc channel. The embedding
/// transport drains the receiver; a send that finds the queue full for
/// longer than the send timeout fails instead of waiting.
pub struct ChannelPeer {
    id: String,
    current_block_index: AtomicU32,
    tx: mpsc::Sender<Message>,
    send_timeout: Duration,
}

impl ChannelPeer {
    pub fn new(id: impl Into<String>, current_block_index: u32, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let peer = Self {
            id: id.into(),
            current_block_index: AtomicU32::new(current_block_index),
            tx,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        };
        (peer, rx)
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }
}

#[async_trait]
impl Peer for ChannelPeer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn current_block_index(&self) -> u32 {
        self.current_block_index.load(Ordering::Acquire)
    }

    fn set_current_block_index(&self, index: u32) {
        self.current_block_index.store(index, Ordering::Release);
    }

    async fn send(&self, message: Message) -> Result<(), NetworkError> {
        trace!(peer = %self.id, command = message.command(), "Sending message");
        self.tx
            .send_timeout(message, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => NetworkError::Timeout(self.id.clone()),
                SendTimeoutError::Closed(_) => NetworkError::Disconnected(self.id.clone()),
            })
    }
}
