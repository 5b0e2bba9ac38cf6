//! Draining the sync queue through a dispatcher

use agri_db::{SyncAction, SyncItem, SyncStatus};
use agri_proxy::SyncClient;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::queue::SyncQueue;
use crate::error::CoreError;

/// Delivers one queued mutation to the remote
#[async_trait]
pub trait SyncDispatcher: Send + Sync {
    async fn dispatch(&self, item: &SyncItem) -> Result<(), CoreError>;
}

/// Outcome counts of one drain pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Items handed to the dispatcher
    pub attempted: usize,
    pub completed: usize,
    /// Failed attempts that went back to `pending`
    pub retried: usize,
    /// Failed attempts that exhausted the retry limit
    pub failed: usize,
    /// Items not attempted: no longer pending, or queued behind a failed
    /// mutation of the same entity
    pub skipped: usize,
}

impl SyncQueue {
    /// Attempt every pending item once, oldest first.
    ///
    /// When a mutation fails, later mutations of the same entity are held
    /// back until the next drain so one entity's changes never apply out of
    /// order. Items an earlier drain left in `syncing` are returned to
    /// `pending` first and sent again. Assumes a single drainer at a time.
    pub async fn drain(&self, dispatcher: &dyn SyncDispatcher, retry_limit: u32) -> DrainReport {
        let mut report = DrainReport::default();
        let mut blocked: HashSet<(String, Option<i64>)> = HashSet::new();

        self.release_interrupted().await;
        for item in self.pending().await {
            let entity = (item.entity_type.clone(), item.entity_id);
            if blocked.contains(&entity) {
                report.skipped += 1;
                continue;
            }

            let Some(item) = self.begin_dispatch(item.id).await else {
                report.skipped += 1;
                continue;
            };
            report.attempted += 1;

            match dispatcher.dispatch(&item).await {
                Ok(()) => {
                    if self.complete(item.id).await.is_some() {
                        report.completed += 1;
                    }
                }
                Err(e) => {
                    warn!("Dispatch of sync {} failed: {}", item.id, e);
                    blocked.insert(entity);
                    match self.fail(item.id, retry_limit).await {
                        Some(updated) if updated.status == SyncStatus::Failed => report.failed += 1,
                        Some(_) => report.retried += 1,
                        None => {}
                    }
                }
            }
        }

        if report.attempted > 0 || report.skipped > 0 {
            info!(
                "Sync drain: {} attempted, {} completed, {} retried, {} failed, {} skipped",
                report.attempted, report.completed, report.retried, report.failed, report.skipped
            );
        }
        report
    }
}

/// Dispatcher pushing items to the REST sync remote
pub struct HttpSyncDispatcher {
    client: SyncClient,
}

impl HttpSyncDispatcher {
    pub fn new(client: SyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SyncDispatcher for HttpSyncDispatcher {
    async fn dispatch(&self, item: &SyncItem) -> Result<(), CoreError> {
        debug!(
            "Pushing sync item {} ({} {}) to {}",
            item.id,
            item.action.as_str(),
            item.entity_type,
            self.client.endpoint()
        );
        match (item.action, item.entity_id) {
            (SyncAction::Create, _) => self.client.create(&item.entity_type, &item.payload).await?,
            (SyncAction::Update, Some(id)) => {
                self.client.update(&item.entity_type, id, &item.payload).await?
            }
            (SyncAction::Delete, Some(id)) => self.client.delete(&item.entity_type, id).await?,
            (action, None) => {
                return Err(CoreError::Validation(format!(
                    "{} of {} needs an entity id",
                    action.as_str(),
                    item.entity_type
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use agri_db::Database;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    /// Records dispatch order; fails items whose payload tag is listed
    #[derive(Default)]
    struct ScriptedDispatcher {
        seen: Mutex<Vec<String>>,
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl SyncDispatcher for ScriptedDispatcher {
        async fn dispatch(&self, item: &SyncItem) -> Result<(), CoreError> {
            let tag = item.payload["tag"].as_str().unwrap_or_default().to_string();
            self.seen.lock().push(tag.clone());
            if self.failing.contains(&tag.as_str()) {
                return Err(CoreError::FetchFailed(format!("remote rejected {}", tag)));
            }
            Ok(())
        }
    }

    async fn queue() -> SyncQueue {
        let db = Database::in_memory().await.unwrap();
        SyncQueue::new(db, Arc::new(SystemClock))
    }

    async fn enqueue(queue: &SyncQueue, entity_id: i64, tag: &str) {
        queue
            .enqueue("field", Some(entity_id), SyncAction::Update, json!({ "tag": tag }))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_drain_in_creation_order() {
        let queue = queue().await;
        for tag in ["A", "B", "C"] {
            enqueue(&queue, 1, tag).await;
        }

        let dispatcher = ScriptedDispatcher::default();
        let report = queue.drain(&dispatcher, 3).await;

        assert_eq!(*dispatcher.seen.lock(), vec!["A", "B", "C"]);
        assert_eq!(report.attempted, 3);
        assert_eq!(report.completed, 3);
        assert_eq!(queue.stats().await.completed, 3);
    }

    #[tokio::test]
    async fn test_failure_holds_back_same_entity_only() {
        let queue = queue().await;
        enqueue(&queue, 1, "A").await;
        enqueue(&queue, 2, "X").await;
        enqueue(&queue, 1, "B").await;

        let dispatcher = ScriptedDispatcher {
            failing: vec!["A"],
            ..Default::default()
        };
        let report = queue.drain(&dispatcher, 3).await;

        assert_eq!(*dispatcher.seen.lock(), vec!["A", "X"]);
        assert_eq!(
            report,
            DrainReport {
                attempted: 2,
                completed: 1,
                retried: 1,
                failed: 0,
                skipped: 1,
            }
        );

        // Next pass retries A before B
        let dispatcher = ScriptedDispatcher::default();
        queue.drain(&dispatcher, 3).await;
        assert_eq!(*dispatcher.seen.lock(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_interrupted_dispatch_is_sent_again() {
        let queue = queue().await;
        enqueue(&queue, 1, "A").await;
        enqueue(&queue, 1, "B").await;
        let first = queue.pending().await[0].id;
        queue.begin_dispatch(first).await.unwrap();

        let dispatcher = ScriptedDispatcher::default();
        let report = queue.drain(&dispatcher, 3).await;

        assert_eq!(*dispatcher.seen.lock(), vec!["A", "B"]);
        assert_eq!(report.completed, 2);
        let stats = queue.stats().await;
        assert_eq!(stats.syncing, 0);
        assert_eq!(stats.completed, 2);
    }

    #[tokio::test]
    async fn test_drain_until_failed() {
        let queue = queue().await;
        enqueue(&queue, 1, "A").await;
        let dispatcher = ScriptedDispatcher {
            failing: vec!["A"],
            ..Default::default()
        };

        let first = queue.drain(&dispatcher, 2).await;
        assert_eq!(first.retried, 1);
        let second = queue.drain(&dispatcher, 2).await;
        assert_eq!(second.failed, 1);
        let third = queue.drain(&dispatcher, 2).await;
        assert_eq!(third, DrainReport::default());

        assert_eq!(queue.failed().await.len(), 1);
    }

    #[tokio::test]
    async fn test_http_dispatcher_requires_entity_id() {
        let client = SyncClient::new("http://127.0.0.1:9", agri_proxy::RetryPolicy::none()).unwrap();
        let dispatcher = HttpSyncDispatcher::new(client);
        let item = SyncItem {
            id: 1,
            entity_type: "field".to_string(),
            entity_id: None,
            action: SyncAction::Delete,
            payload: json!({}),
            status: SyncStatus::Syncing,
            retry_count: 0,
            created_at: chrono::Utc::now(),
            synced_at: None,
        };

        assert!(matches!(
            dispatcher.dispatch(&item).await,
            Err(CoreError::Validation(_))
        ));
    }
}
