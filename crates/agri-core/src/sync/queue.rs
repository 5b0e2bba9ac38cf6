//! Durable sync queue

use agri_db::{Database, NewSyncItem, SyncAction, SyncItem, SyncQueueStats, SyncStatus};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::CoreError;
use crate::validate;

/// Queue of local mutations awaiting delivery
///
/// Item lifecycle: `pending → syncing → {completed | pending | failed}`.
/// Storage errors are logged and surface as `None`, an empty list or a
/// zero count; a write that failed is picked up again on the next drain.
pub struct SyncQueue {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SyncQueue {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Append a new `pending` item. Never deduplicates: repeated mutations of
    /// one entity are kept in creation order.
    ///
    /// Only a malformed entity type is an error; a storage failure yields
    /// `Ok(None)`.
    pub async fn enqueue(
        &self,
        entity_type: &str,
        entity_id: Option<i64>,
        action: SyncAction,
        payload: serde_json::Value,
    ) -> Result<Option<SyncItem>, CoreError> {
        let entity_type = validate::entity_type(entity_type)?;
        let item = NewSyncItem {
            entity_type,
            entity_id,
            action,
            payload,
        };

        match self.db.insert_sync_item(item, self.clock.now()).await {
            Ok(item) => {
                info!(
                    "Queued {} {:?} for {} sync (id {})",
                    item.entity_type,
                    item.entity_id,
                    item.action.as_str(),
                    item.id
                );
                Ok(Some(item))
            }
            Err(e) => {
                error!("Error queuing for sync: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn get(&self, id: i64) -> Option<SyncItem> {
        match self.db.get_sync_item(id).await {
            Ok(item) => item,
            Err(e) => {
                error!("Error reading sync item {}: {}", id, e);
                None
            }
        }
    }

    /// Pending items, oldest first
    pub async fn pending(&self) -> Vec<SyncItem> {
        self.list(SyncStatus::Pending).await
    }

    /// Failed items, oldest first
    pub async fn failed(&self) -> Vec<SyncItem> {
        self.list(SyncStatus::Failed).await
    }

    async fn list(&self, status: SyncStatus) -> Vec<SyncItem> {
        match self.db.list_sync_items_by_status(status).await {
            Ok(items) => items,
            Err(e) => {
                error!("Error listing {} sync items: {}", status.as_str(), e);
                Vec::new()
            }
        }
    }

    /// `pending → syncing`. `None` if the item is not pending.
    pub async fn begin_dispatch(&self, id: i64) -> Option<SyncItem> {
        match self.db.mark_sync_syncing(id).await {
            Ok(Some(item)) => Some(item),
            Ok(None) => {
                debug!("Sync {} is not pending, not dispatching", id);
                None
            }
            Err(e) => {
                error!("Error marking sync {} as syncing: {}", id, e);
                None
            }
        }
    }

    /// `syncing → completed`, stamping `synced_at`
    pub async fn complete(&self, id: i64) -> Option<SyncItem> {
        match self.db.mark_sync_completed(id, self.clock.now()).await {
            Ok(Some(item)) => {
                info!("Sync {} completed", id);
                Some(item)
            }
            Ok(None) => {
                warn!("Sync {} is not syncing, cannot complete", id);
                None
            }
            Err(e) => {
                error!("Error marking sync {} as completed: {}", id, e);
                None
            }
        }
    }

    /// Count a failed attempt. The item becomes `failed` once `retry_count`
    /// reaches `retry_limit`, otherwise it returns to `pending`. Terminal
    /// items are left untouched.
    pub async fn fail(&self, id: i64, retry_limit: u32) -> Option<SyncItem> {
        match self.db.record_sync_failure(id, i64::from(retry_limit)).await {
            Ok(Some(item)) => {
                if item.status == SyncStatus::Failed {
                    error!("Sync {} failed after {} retries", id, item.retry_count);
                } else {
                    warn!("Sync {} failed, will retry (attempt {})", id, item.retry_count);
                }
                Some(item)
            }
            Ok(None) => {
                debug!("Sync {} is terminal or missing, failure ignored", id);
                None
            }
            Err(e) => {
                error!("Error marking sync {} as failed: {}", id, e);
                None
            }
        }
    }

    /// Give a `failed` item a fresh retry budget
    pub async fn requeue_failed(&self, id: i64) -> Option<SyncItem> {
        match self.db.requeue_failed_sync(id).await {
            Ok(Some(item)) => {
                info!("Sync {} requeued", id);
                Some(item)
            }
            Ok(None) => None,
            Err(e) => {
                error!("Error requeuing sync {}: {}", id, e);
                None
            }
        }
    }

    /// Return items stuck in `syncing` to `pending`. Their dispatch may or
    /// may not have reached the remote, so they will be sent again.
    pub async fn release_interrupted(&self) -> u64 {
        match self.db.release_syncing_items().await {
            Ok(released) => {
                if released > 0 {
                    warn!("Returned {} interrupted sync items to pending", released);
                }
                released
            }
            Err(e) => {
                error!("Error releasing interrupted sync items: {}", e);
                0
            }
        }
    }

    /// Delete `completed` items; `failed` ones are kept for diagnosis
    pub async fn purge_completed(&self) -> u64 {
        self.purge(SyncStatus::Completed).await
    }

    /// Explicitly clear `failed` items
    pub async fn purge_failed(&self) -> u64 {
        self.purge(SyncStatus::Failed).await
    }

    async fn purge(&self, status: SyncStatus) -> u64 {
        match self.db.delete_sync_items_by_status(status).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!("Cleared {} {} sync items", deleted, status.as_str());
                }
                deleted
            }
            Err(e) => {
                error!("Error clearing {} sync items: {}", status.as_str(), e);
                0
            }
        }
    }

    /// Per-status counts; all zero if the store cannot be read
    pub async fn stats(&self) -> SyncQueueStats {
        match self.db.get_sync_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Error getting sync stats: {}", e);
                SyncQueueStats::default()
            }
        }
    }
}
