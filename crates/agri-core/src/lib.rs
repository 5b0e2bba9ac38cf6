//! Agri Cache Core Business Logic
//!
//! This crate provides the offline-first core of Agri Cache: the expiry
//! cache over weather, soil, market and recommendation data, the durable
//! sync queue, connectivity monitoring and the fetch-or-cache data service.

pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod fetch;
pub mod offline;
pub mod service;
pub mod sync;
pub mod tasks;
pub mod validate;

pub use cache::{CacheManager, TtlPolicy, spawn_sweep_task};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheTtlConfig, ConnectivityConfig, SyncConfig};
pub use connectivity::{ConnectivityMonitor, ConnectivityStatus, Probe, SubscriberId, TcpProbe};
pub use error::CoreError;
pub use fetch::{DataFetcher, HttpFetcher};
pub use offline::{OfflineCoordinator, OfflineStatus};
pub use service::{DataService, DataSource, Fetched};
pub use sync::{DrainReport, HttpSyncDispatcher, SyncDispatcher, SyncQueue};
pub use tasks::BackgroundTasks;
