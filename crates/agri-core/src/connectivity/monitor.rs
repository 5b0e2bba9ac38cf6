//! Connectivity monitor

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::probe::Probe;
use super::subscribers::{SubscriberId, Subscribers};

/// Point-in-time view of the monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityStatus {
    pub online: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct ProbeHistory {
    last_check: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

/// Measured network reachability
///
/// Starts offline until the first successful probe. Subscribers hear about
/// transitions only, never about repeated probes of the same state.
pub struct ConnectivityMonitor {
    probe: Arc<dyn Probe>,
    online: AtomicBool,
    history: Mutex<ProbeHistory>,
    subscribers: Subscribers,
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self {
            probe,
            online: AtomicBool::new(false),
            history: Mutex::new(ProbeHistory::default()),
            subscribers: Subscribers::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectivityStatus {
        let history = self.history.lock();
        ConnectivityStatus {
            online: self.is_online(),
            last_check: history.last_check,
            consecutive_failures: history.consecutive_failures,
        }
    }

    /// Register a transition callback; it receives the new online state
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Check reachability within `timeout` and return the measured state.
    /// Subscribers run on this task before `probe` returns.
    pub async fn probe(&self, timeout: Duration) -> bool {
        let reachable = match tokio::time::timeout(timeout, self.probe.check()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Connectivity probe failed: {}", e);
                false
            }
            Err(_) => {
                debug!("Connectivity probe timed out after {:?}", timeout);
                false
            }
        };

        {
            let mut history = self.history.lock();
            history.last_check = Some(Utc::now());
            if reachable {
                history.consecutive_failures = 0;
            } else {
                history.consecutive_failures = history.consecutive_failures.saturating_add(1);
            }
        }

        // swap makes exactly one caller observe each transition
        let was_online = self.online.swap(reachable, Ordering::SeqCst);
        if was_online == reachable {
            debug!("Connectivity unchanged (online: {})", reachable);
            return reachable;
        }

        if reachable {
            info!("Device came online");
        } else {
            warn!("Device went offline");
        }
        self.subscribers.notify(reachable);

        reachable
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::io;

    /// Probe replaying a fixed sequence, repeating the last outcome
    pub(crate) struct ScriptedProbe {
        outcomes: Mutex<VecDeque<bool>>,
        last: Mutex<bool>,
    }

    impl ScriptedProbe {
        pub(crate) fn new(outcomes: &[bool]) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                last: Mutex::new(false),
            }
        }

        pub(crate) fn push(&self, outcome: bool) {
            self.outcomes.lock().push_back(outcome);
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn check(&self) -> io::Result<()> {
            let next = self.outcomes.lock().pop_front();
            let outcome = match next {
                Some(outcome) => {
                    *self.last.lock() = outcome;
                    outcome
                }
                None => *self.last.lock(),
            };
            if outcome {
                Ok(())
            } else {
                Err(io::Error::new(io::ErrorKind::ConnectionRefused, "scripted"))
            }
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl Probe for HangingProbe {
        async fn check(&self) -> io::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn recording(monitor: &ConnectivityMonitor) -> Arc<Mutex<Vec<bool>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        monitor.subscribe(move |online| sink.lock().push(online));
        seen
    }

    #[tokio::test]
    async fn test_starts_offline() {
        let monitor = ConnectivityMonitor::new(Arc::new(ScriptedProbe::new(&[])));
        assert!(!monitor.is_online());
        assert_eq!(monitor.status().last_check, None);
    }

    #[tokio::test]
    async fn test_fires_once_per_transition() {
        let probe = Arc::new(ScriptedProbe::new(&[true, true, true]));
        let monitor = ConnectivityMonitor::new(probe.clone());
        let seen = recording(&monitor);

        for _ in 0..3 {
            assert!(monitor.probe(TIMEOUT).await);
        }
        assert_eq!(*seen.lock(), vec![true]);

        probe.push(false);
        probe.push(false);
        assert!(!monitor.probe(TIMEOUT).await);
        assert!(!monitor.probe(TIMEOUT).await);
        assert_eq!(*seen.lock(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_failures_from_offline_are_silent() {
        let monitor = ConnectivityMonitor::new(Arc::new(ScriptedProbe::new(&[false, false])));
        let seen = recording(&monitor);

        monitor.probe(TIMEOUT).await;
        monitor.probe(TIMEOUT).await;

        assert!(seen.lock().is_empty());
        let status = monitor.status();
        assert!(!status.online);
        assert_eq!(status.consecutive_failures, 2);
        assert!(status.last_check.is_some());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let monitor = ConnectivityMonitor::new(Arc::new(ScriptedProbe::new(&[false, true])));
        monitor.probe(TIMEOUT).await;
        monitor.probe(TIMEOUT).await;
        assert_eq!(monitor.status().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_block_others() {
        let monitor = ConnectivityMonitor::new(Arc::new(ScriptedProbe::new(&[true])));
        monitor.subscribe(|_| panic!("subscriber bug"));
        let seen = recording(&monitor);

        assert!(monitor.probe(TIMEOUT).await);
        assert_eq!(*seen.lock(), vec![true]);
        assert!(monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_counts_as_offline() {
        let monitor = ConnectivityMonitor::new(Arc::new(HangingProbe));
        assert!(!monitor.probe(Duration::from_secs(5)).await);
        assert_eq!(monitor.status().consecutive_failures, 1);
    }
}
