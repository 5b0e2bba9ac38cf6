//! Ordered observer registry for state transitions

use parking_lot::RwLock;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::error;

/// Handle returned by `subscribe`, used to unsubscribe
pub type SubscriberId = u64;

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

/// Subscribers called synchronously, in registration order
///
/// A panicking callback is logged and does not stop the others. Callbacks
/// run outside the registry lock, so they may subscribe or unsubscribe.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    entries: RwLock<Vec<(SubscriberId, Callback)>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().push((id, Arc::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every subscriber with `state`
    pub fn notify(&self, state: bool) {
        let callbacks: Vec<(SubscriberId, Callback)> = self.entries.read().clone();

        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(state))).is_err() {
                error!("Connectivity subscriber {} panicked", id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_notify_in_registration_order() {
        let subscribers = Subscribers::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let log = log.clone();
            subscribers.subscribe(move |state| log.lock().push((name, state)));
        }
        subscribers.notify(true);

        assert_eq!(
            *log.lock(),
            vec![("first", true), ("second", true), ("third", true)]
        );
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let subscribers = Subscribers::new();
        let calls = Arc::new(AtomicU64::new(0));

        subscribers.subscribe(|_| panic!("subscriber bug"));
        let counter = calls.clone();
        subscribers.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        subscribers.notify(false);
        subscribers.notify(true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let subscribers = Subscribers::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let id = subscribers.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(subscribers.unsubscribe(id));
        assert!(!subscribers.unsubscribe(id));
        assert!(subscribers.is_empty());

        subscribers.notify(true);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
