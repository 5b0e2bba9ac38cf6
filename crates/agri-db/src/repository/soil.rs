//! Soil cache operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{CacheEntry, CacheKind, Location, SoilRecord};
use crate::repository::Database;
use crate::repository::cache::{CacheTable, entries_from_rows};
use crate::utils::format_timestamp;

#[async_trait]
impl CacheTable for SoilRecord {
    type Key = Location;

    const KIND: CacheKind = CacheKind::Soil;

    async fn select(
        db: &Database,
        key: &Location,
        valid_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<CacheEntry<Self>>, DbError> {
        let valid_at = valid_at.map(format_timestamp);

        let rows = sqlx::query(
            r#"
            SELECT id, source, field_id, ph_level, organic_carbon, nitrogen_ppm, phosphorus_ppm,
                   potassium_ppm, moisture_percent, bulk_density, clay_percent, sand_percent,
                   silt_percent, soil_classification, fertility_index, fetched_at, expires_at
            FROM soil_data
            WHERE latitude = ? AND longitude = ?
              AND (? IS NULL OR expires_at > ?)
            ORDER BY fetched_at DESC, id DESC
            "#,
        )
        .bind(key.latitude)
        .bind(key.longitude)
        .bind(&valid_at)
        .bind(&valid_at)
        .fetch_all(&db.pool)
        .await?;

        entries_from_rows(&rows)
    }

    async fn insert(
        db: &Database,
        key: &Location,
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
                INSERT INTO soil_data (field_id, latitude, longitude, source, ph_level,
                    organic_carbon, nitrogen_ppm, phosphorus_ppm, potassium_ppm,
                    moisture_percent, bulk_density, clay_percent, sand_percent, silt_percent,
                    soil_classification, fertility_index, fetched_at, expires_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.field_id)
            .bind(key.latitude)
            .bind(key.longitude)
            .bind(&record.source)
            .bind(record.ph_level)
            .bind(record.organic_carbon)
            .bind(record.nitrogen_ppm)
            .bind(record.phosphorus_ppm)
            .bind(record.potassium_ppm)
            .bind(record.moisture_percent)
            .bind(record.bulk_density)
            .bind(record.clay_percent)
            .bind(record.sand_percent)
            .bind(record.silt_percent)
            .bind(&record.soil_classification)
            .bind(record.fertility_index)
            .bind(&fetched_at)
            .bind(&expires_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_soil_roundtrip_newest_first() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc::now();
        let key = Location {
            latitude: 12.97,
            longitude: 77.59,
        };

        let older = SoilRecord {
            source: "soilgrids".to_string(),
            ph_level: Some(6.4),
            ..Default::default()
        };
        let newer = SoilRecord {
            source: "manual".to_string(),
            ph_level: Some(6.9),
            clay_percent: Some(31.0),
            ..Default::default()
        };

        SoilRecord::insert(&db, &key, &[older], now - Duration::days(1), now + Duration::days(29))
            .await
            .unwrap();
        SoilRecord::insert(&db, &key, &[newer.clone()], now, now + Duration::days(30))
            .await
            .unwrap();

        let rows = SoilRecord::select(&db, &key, Some(now)).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].payload, newer);
    }

    #[tokio::test]
    async fn test_soil_field_reference_must_exist() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc::now();
        let key = Location {
            latitude: 12.97,
            longitude: 77.59,
        };
        let record = SoilRecord {
            source: "iot".to_string(),
            field_id: Some(999),
            ..Default::default()
        };

        let result = SoilRecord::insert(&db, &key, &[record], now, now + Duration::days(30)).await;
        assert!(result.is_err());
        // The failed batch leaves nothing behind
        assert_eq!(db.count_cache_rows(CacheKind::Soil).await.unwrap(), 0);
    }
}
