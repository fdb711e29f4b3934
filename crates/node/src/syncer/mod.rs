//! Syncer module
//!
//! Header-first chain synchronization with peers.

pub mod header_sync;

pub use header_sync::{HeaderSyncCoordinator, SyncReport};
