//! Market price cache operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{CacheEntry, CacheKind, MarketKey, MarketRecord};
use crate::repository::Database;
use crate::repository::cache::{CacheTable, entries_from_rows};
use crate::utils::{format_date, format_timestamp};

#[async_trait]
impl CacheTable for MarketRecord {
    type Key = MarketKey;

    const KIND: CacheKind = CacheKind::Market;

    /// Newest price date first
    async fn select(
        db: &Database,
        key: &MarketKey,
        valid_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<CacheEntry<Self>>, DbError> {
        let valid_at = valid_at.map(format_timestamp);

        let rows = sqlx::query(
            r#"
            SELECT id, state, district, market_name, price_per_quintal, price_date,
                   price_change_percent, volume_traded, min_price, max_price,
                   trend_30day_avg, trend_90day_avg, fetched_at, expires_at
            FROM market_data
            WHERE commodity_name = ?
              AND (? IS NULL OR state = ?)
              AND (? IS NULL OR expires_at > ?)
            ORDER BY price_date DESC, fetched_at DESC, id ASC
            "#,
        )
        .bind(&key.commodity)
        .bind(&key.state)
        .bind(&key.state)
        .bind(&valid_at)
        .bind(&valid_at)
        .fetch_all(&db.pool)
        .await?;

        entries_from_rows(&rows)
    }

    async fn insert(
        db: &Database,
        key: &MarketKey,
        records: &[Self],
        fetched_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<u64, DbError> {
        let fetched_at = format_timestamp(fetched_at);
        let expires_at = format_timestamp(expires_at);

        let mut tx = db.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO market_data (commodity_name, state, district, market_name,
                    price_per_quintal, price_date, price_change_percent, volume_traded,
                    min_price, max_price, trend_30day_avg, trend_90day_avg,
                    fetched_at, expires_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&key.commodity)
            .bind(&record.state)
            .bind(&record.district)
            .bind(&record.market_name)
            .bind(record.price_per_quintal)
            .bind(format_date(record.price_date))
            .bind(record.price_change_percent)
            .bind(record.volume_traded)
            .bind(record.min_price)
            .bind(record.max_price)
            .bind(record.trend_30day_avg)
            .bind(record.trend_90day_avg)
            .bind(&fetched_at)
            .bind(&expires_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(records.len() as u64)
    }
}
