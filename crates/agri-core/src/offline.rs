//! Offline coordinator: manual override plus measured connectivity

use agri_db::Database;
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConnectivityConfig;
use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus, SubscriberId, Subscribers};
use crate::sync::{SyncDispatcher, SyncQueue};

/// Snapshot of the effective offline state and its inputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfflineStatus {
    pub effective_offline: bool,
    pub manual_offline: bool,
    pub connectivity: ConnectivityStatus,
}

/// Combines the persisted manual offline flag with the connectivity monitor.
///
/// Effective offline is `manual_offline || !monitor.is_online()`.
/// Subscribers registered here hear about effective-state transitions,
/// whether caused by the network or by the manual flag.
pub struct OfflineCoordinator {
    db: Database,
    monitor: Arc<ConnectivityMonitor>,
    config: ConnectivityConfig,
    manual_offline: AtomicBool,
    effective_online: ReentrantMutex<Cell<bool>>,
    subscribers: Subscribers,
    monitor_subscription: Mutex<Option<SubscriberId>>,
}

impl OfflineCoordinator {
    /// Load the persisted manual flag and attach to `monitor`.
    /// An unreadable flag is treated as off.
    pub async fn new(
        db: Database,
        monitor: Arc<ConnectivityMonitor>,
        config: ConnectivityConfig,
    ) -> Arc<Self> {
        let manual = match db.get_offline_mode().await {
            Ok(manual) => manual,
            Err(e) => {
                warn!("Could not read offline mode setting, assuming off: {}", e);
                false
            }
        };
        if manual {
            info!("Manual offline mode is enabled");
        }

        let coordinator = Arc::new(Self {
            db,
            effective_online: ReentrantMutex::new(Cell::new(!manual && monitor.is_online())),
            monitor,
            config,
            manual_offline: AtomicBool::new(manual),
            subscribers: Subscribers::new(),
            monitor_subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&coordinator);
        let id = coordinator.monitor.subscribe(move |_| {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.refresh();
            }
        });
        *coordinator.monitor_subscription.lock() = Some(id);

        coordinator
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn is_manual_offline(&self) -> bool {
        self.manual_offline.load(Ordering::SeqCst)
    }

    pub fn effective_offline(&self) -> bool {
        self.is_manual_offline() || !self.monitor.is_online()
    }

    pub fn status(&self) -> OfflineStatus {
        OfflineStatus {
            effective_offline: self.effective_offline(),
            manual_offline: self.is_manual_offline(),
            connectivity: self.monitor.status(),
        }
    }

    /// Force offline regardless of measured connectivity.
    /// Returns whether the flag was persisted; it applies to this process
    /// either way.
    pub async fn enable_manual_offline(&self) -> bool {
        self.set_manual_offline(true).await
    }

    pub async fn disable_manual_offline(&self) -> bool {
        self.set_manual_offline(false).await
    }

    async fn set_manual_offline(&self, offline: bool) -> bool {
        let persisted = match self.db.set_offline_mode(offline).await {
            Ok(()) => true,
            Err(e) => {
                error!("Error saving offline mode: {}", e);
                false
            }
        };

        self.manual_offline.store(offline, Ordering::SeqCst);
        info!("Manual offline mode {}", if offline { "enabled" } else { "disabled" });
        self.refresh();

        persisted
    }

    /// Register for effective-state transitions; the callback receives
    /// `true` when the effective state becomes online
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Re-evaluate the effective state and notify on a change. Reading the
    /// state and notifying happen under one reentrant lock.
    fn refresh(&self) {
        let last = self.effective_online.lock();
        let online = !self.effective_offline();
        if last.replace(online) != online {
            debug!("Effective connectivity changed (online: {})", online);
            self.subscribers.notify(online);
        }
    }

    /// Probe immediately, then every poll interval, until `stop` flips.
    ///
    /// Each probe runs as its own task: if it panics, the error is logged
    /// and the loop waits the longer error backoff before the next attempt.
    pub fn start_monitoring(&self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = self.monitor.clone();
        let config = self.config.clone();
        info!(
            "Starting connectivity monitoring (interval: {:?}, probe timeout: {:?})",
            config.poll_interval(),
            config.probe_timeout()
        );

        tokio::spawn(async move {
            loop {
                if *stop.borrow() {
                    break;
                }

                let probe_monitor = monitor.clone();
                let timeout = config.probe_timeout();
                let attempt = tokio::spawn(async move { probe_monitor.probe(timeout).await });

                let wait = tokio::select! {
                    outcome = attempt => match outcome {
                        Ok(_) => config.poll_interval(),
                        Err(e) => {
                            error!("Error in connectivity check: {}", e);
                            config.error_backoff()
                        }
                    },
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            info!("Connectivity monitoring stopped");
        })
    }

    /// Drain `queue` through `dispatcher` each time the effective state
    /// becomes online, and once at start if already online.
    pub fn spawn_drain_on_online(
        self: &Arc<Self>,
        queue: Arc<SyncQueue>,
        dispatcher: Arc<dyn SyncDispatcher>,
        retry_limit: u32,
        mut stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let wake = Arc::new(Notify::new());
        let trigger = wake.clone();
        let subscription = self.subscribe(move |online| {
            if online {
                trigger.notify_one();
            }
        });
        if !self.effective_offline() {
            wake.notify_one();
        }

        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                if *stop.borrow() {
                    break;
                }

                tokio::select! {
                    _ = wake.notified() => {}
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }

                if coordinator.effective_offline() {
                    debug!("Offline again, skipping sync drain");
                    continue;
                }

                info!("Connectivity restored, draining sync queue");
                queue.drain(dispatcher.as_ref(), retry_limit).await;
            }

            coordinator.unsubscribe(subscription);
            info!("Sync drain hook stopped");
        })
    }
}

impl Drop for OfflineCoordinator {
    fn drop(&mut self) {
        if let Some(id) = self.monitor_subscription.lock().take() {
            self.monitor.unsubscribe(id);
        }
    }
}
