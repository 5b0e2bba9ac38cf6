//! Offline sync queue module

mod drain;
mod queue;

pub use drain::{DrainReport, HttpSyncDispatcher, SyncDispatcher};
pub use queue::SyncQueue;
