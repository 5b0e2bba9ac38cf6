//! Sync queue operations
//!
//! Every status transition is a single conditional `UPDATE ... RETURNING`,
//! so a transition either applies atomically or reports `None`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::error::DbError;
use crate::models::{NewSyncItem, SyncItem, SyncStatus};
use crate::repository::Database;
use crate::utils::format_timestamp;

const SYNC_COLUMNS: &str =
    "id, entity_type, entity_id, action, payload, status, retry_count, created_at, synced_at";

/// Item counts per delivery status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncQueueStats {
    pub total: i64,
    pub pending: i64,
    pub syncing: i64,
    pub completed: i64,
    pub failed: i64,
}

impl Database {
    // ==================== Sync Queue Operations ====================

    /// Append a new `pending` item
    pub async fn insert_sync_item(
        &self,
        item: NewSyncItem,
        created_at: DateTime<Utc>,
    ) -> Result<SyncItem, DbError> {
        let payload = serde_json::to_string(&item.payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sync_queue (entity_type, entity_id, action, payload, status, retry_count, created_at)
            VALUES (?, ?, ?, ?, 'pending', 0, ?)
            RETURNING id
            "#,
        )
        .bind(&item.entity_type)
        .bind(item.entity_id)
        .bind(item.action.as_str())
        .bind(&payload)
        .bind(format_timestamp(created_at))
        .fetch_one(&self.pool)
        .await?;

        Ok(SyncItem {
            id: result.get("id"),
            entity_type: item.entity_type,
            entity_id: item.entity_id,
            action: item.action,
            payload: item.payload,
            status: SyncStatus::Pending,
            retry_count: 0,
            created_at,
            synced_at: None,
        })
    }

    /// Get a sync item by ID
    pub async fn get_sync_item(&self, id: i64) -> Result<Option<SyncItem>, DbError> {
        let sql = format!("SELECT {SYNC_COLUMNS} FROM sync_queue WHERE id = ?");
        let result = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        result.map(|row| SyncItem::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// List items in one status, oldest first
    pub async fn list_sync_items_by_status(
        &self,
        status: SyncStatus,
    ) -> Result<Vec<SyncItem>, DbError> {
        let sql = format!(
            "SELECT {SYNC_COLUMNS} FROM sync_queue WHERE status = ? ORDER BY created_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| SyncItem::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// `pending → syncing`
    pub async fn mark_sync_syncing(&self, id: i64) -> Result<Option<SyncItem>, DbError> {
        let sql = format!(
            "UPDATE sync_queue SET status = 'syncing' WHERE id = ? AND status = 'pending' RETURNING {SYNC_COLUMNS}"
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        result.map(|row| SyncItem::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// `syncing → completed`, stamping `synced_at`
    pub async fn mark_sync_completed(
        &self,
        id: i64,
        synced_at: DateTime<Utc>,
    ) -> Result<Option<SyncItem>, DbError> {
        let sql = format!(
            "UPDATE sync_queue SET status = 'completed', synced_at = ? WHERE id = ? AND status = 'syncing' RETURNING {SYNC_COLUMNS}"
        );
        let result = sqlx::query(&sql)
            .bind(format_timestamp(synced_at))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        result.map(|row| SyncItem::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// Count one failed attempt against a non-terminal item.
    ///
    /// The item becomes `failed` once the incremented `retry_count` reaches
    /// `retry_limit`, otherwise it returns to `pending`.
    pub async fn record_sync_failure(
        &self,
        id: i64,
        retry_limit: i64,
    ) -> Result<Option<SyncItem>, DbError> {
        let sql = format!(
            r#"
            UPDATE sync_queue
            SET retry_count = retry_count + 1,
                status = CASE WHEN retry_count + 1 >= ? THEN 'failed' ELSE 'pending' END
            WHERE id = ? AND status IN ('pending', 'syncing')
            RETURNING {SYNC_COLUMNS}
            "#
        );
        let result = sqlx::query(&sql)
            .bind(retry_limit)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        result.map(|row| SyncItem::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// `failed → pending` with a fresh retry budget
    pub async fn requeue_failed_sync(&self, id: i64) -> Result<Option<SyncItem>, DbError> {
        let sql = format!(
            "UPDATE sync_queue SET status = 'pending', retry_count = 0 WHERE id = ? AND status = 'failed' RETURNING {SYNC_COLUMNS}"
        );
        let result = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        result.map(|row| SyncItem::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// `syncing → pending` for every item left mid-dispatch. Returns the
    /// number of items released.
    pub async fn release_syncing_items(&self) -> Result<u64, DbError> {
        let result = sqlx::query("UPDATE sync_queue SET status = 'pending' WHERE status = 'syncing'")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Delete every item in `status`
    pub async fn delete_sync_items_by_status(&self, status: SyncStatus) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE status = ?")
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Get per-status counts
    pub async fn get_sync_stats(&self) -> Result<SyncQueueStats, DbError> {
        let rows = sqlx::query("SELECT status, COUNT(*) as count FROM sync_queue GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = SyncQueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            match status.as_str() {
                "pending" => stats.pending = count,
                "syncing" => stats.syncing = count,
                "completed" => stats.completed = count,
                "failed" => stats.failed = count,
                other => {
                    return Err(DbError::InvalidValue(format!("Unknown sync status '{}'", other)));
                }
            }
            stats.total += count;
        }

        Ok(stats)
    }
}
