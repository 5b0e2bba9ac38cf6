//! Shared expiry-cache operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::error::DbError;
use crate::models::{CacheEntry, CacheKind};
use crate::repository::Database;
use crate::utils::{format_timestamp, parse_datetime_or_now};

/// A record type persisted in one of the expiry-cache tables
///
/// Rows are append-only: `insert` never overwrites or merges with existing
/// rows for the same key, and the only deletion path is
/// [`Database::delete_expired`].
#[async_trait]
pub trait CacheTable: Sized + Send + Sync + Unpin + 'static {
    /// Lookup key, including any read-side refinement
    type Key: Send + Sync + std::fmt::Debug;

    /// Which cache this record type lives in
    const KIND: CacheKind;

    /// Select rows for `key`.
    ///
    /// With `valid_at = Some(t)` only rows with `expires_at > t` are returned;
    /// with `None` every matching row is returned regardless of expiry.
    async fn select(
        db: &Database,
        key: &Self::Key,
        valid_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<CacheEntry<Self>>, DbError>;

    /// Insert one row per record in a single transaction, all sharing the
    /// given timestamps. Returns the number of rows written.
    async fn insert(
        db: &Database,
        key: &Self::Key,
        records: &[Self],
        fetched_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, DbError>;
}

/// Build a cache entry from a row holding the payload columns plus
/// `id`, `fetched_at` and `expires_at`
pub(crate) fn entry_from_row<T>(row: &SqliteRow) -> Result<CacheEntry<T>, sqlx::Error>
where
    T: for<'r> TryFrom<&'r SqliteRow, Error = sqlx::Error>,
{
    Ok(CacheEntry {
        id: row.try_get("id")?,
        payload: T::try_from(row)?,
        fetched_at: parse_datetime_or_now(&row.try_get::<String, _>("fetched_at")?),
        expires_at: parse_datetime_or_now(&row.try_get::<String, _>("expires_at")?),
    })
}

/// Decode a full result set into cache entries
pub(crate) fn entries_from_rows<T>(rows: &[SqliteRow]) -> Result<Vec<CacheEntry<T>>, DbError>
where
    T: for<'r> TryFrom<&'r SqliteRow, Error = sqlx::Error>,
{
    rows.iter()
        .map(|row| entry_from_row(row).map_err(DbError::from))
        .collect()
}

impl Database {
    // ==================== Expiry Cache Operations ====================

    /// Delete every row of `kind` with `expires_at <= now`
    pub async fn delete_expired(&self, kind: CacheKind, now: DateTime<Utc>) -> Result<u64, DbError> {
        let sql = format!("DELETE FROM {} WHERE expires_at <= ?", kind.table());
        let result = sqlx::query(&sql)
            .bind(format_timestamp(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Count all rows of `kind`, fresh or not
    pub async fn count_cache_rows(&self, kind: CacheKind) -> Result<i64, DbError> {
        let sql = format!("SELECT COUNT(*) as count FROM {}", kind.table());
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.get("count"))
    }
}
