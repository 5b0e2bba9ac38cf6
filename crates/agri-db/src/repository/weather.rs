//! Weather cache operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{CacheEntry, CacheKind, WeatherKey, WeatherRecord};
use crate::repository::Database;
use crate::repository::cache::{CacheTable, entries_from_rows};
use crate::utils::{format_date, format_timestamp};

#[async_trait]
impl CacheTable for WeatherRecord {
    type Key = WeatherKey;

    const KIND: CacheKind = CacheKind::Weather;

    /// Newest fetch first; within one fetch, ascending forecast date
    async fn select(
        db: &Database,
        key: &WeatherKey,
        valid_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<CacheEntry<Self>>, DbError> {
        let forecast_date = key.forecast_date.map(format_date);
        let valid_at = valid_at.map(format_timestamp);

        let rows = sqlx::query(
            r#"
            SELECT id, forecast_date, location_name, temperature_c, temp_min_c, temp_max_c,
                   humidity_percent, wind_speed_kmh, precipitation_mm, rainfall_probability,
                   condition, uv_index, fetched_at, expires_at
            FROM weather_data
            WHERE latitude = ? AND longitude = ?
              AND (? IS NULL OR forecast_date = ?)
              AND (? IS NULL OR expires_at > ?)
            ORDER BY fetched_at DESC, forecast_date ASC, id ASC
            "#,
        )
        .bind(key.location.latitude)
        .bind(key.location.longitude)
        .bind(&forecast_date)
        .bind(&forecast_date)
        .bind(&valid_at)
        .bind(&valid_at)
        .fetch_all(&db.pool)
        .await?;

        entries_from_rows(&rows)
    }

    async fn insert(
        db: &Database,
        key: &WeatherKey,
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
                INSERT INTO weather_data (latitude, longitude, location_name, forecast_date,
                    temperature_c, temp_min_c, temp_max_c, humidity_percent, wind_speed_kmh,
                    precipitation_mm, rainfall_probability, condition, uv_index,
                    fetched_at, expires_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(key.location.latitude)
            .bind(key.location.longitude)
            .bind(&record.location_name)
            .bind(format_date(record.forecast_date))
            .bind(record.temperature_c)
            .bind(record.temp_min_c)
            .bind(record.temp_max_c)
            .bind(record.humidity_percent)
            .bind(record.wind_speed_kmh)
            .bind(record.precipitation_mm)
            .bind(record.rainfall_probability)
            .bind(&record.condition)
            .bind(record.uv_index)
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
    use crate::models::Location;
    use chrono::{Duration, NaiveDate};

    fn delhi() -> Location {
        Location {
            latitude: 28.6,
            longitude: 77.2,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[tokio::test]
    async fn test_select_filters_by_location_date_and_expiry() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc::now();
        let key = WeatherKey::new(delhi());
        let records: Vec<WeatherRecord> = (1..=3).map(|d| WeatherRecord::for_date(day(d))).collect();

        WeatherRecord::insert(&db, &key, &records, now, now + Duration::hours(6))
            .await
            .unwrap();

        let fresh = WeatherRecord::select(&db, &key, Some(now)).await.unwrap();
        assert_eq!(fresh.len(), 3);
        assert_eq!(fresh[0].payload.forecast_date, day(1));

        let one_day = WeatherRecord::select(&db, &WeatherKey::on(delhi(), day(2)), Some(now))
            .await
            .unwrap();
        assert_eq!(one_day.len(), 1);
        assert_eq!(one_day[0].payload.forecast_date, day(2));

        let elsewhere = WeatherKey::new(Location {
            latitude: 19.0,
            longitude: 72.8,
        });
        assert!(WeatherRecord::select(&db, &elsewhere, Some(now)).await.unwrap().is_empty());

        let later = now + Duration::hours(7);
        assert!(WeatherRecord::select(&db, &key, Some(later)).await.unwrap().is_empty());
        assert_eq!(WeatherRecord::select(&db, &key, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_insert_is_append_only() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc::now();
        let key = WeatherKey::new(delhi());

        let mut first = WeatherRecord::for_date(day(1));
        first.temperature_c = Some(30.0);
        let mut second = WeatherRecord::for_date(day(1));
        second.temperature_c = Some(32.5);

        WeatherRecord::insert(&db, &key, &[first], now, now + Duration::hours(6))
            .await
            .unwrap();
        WeatherRecord::insert(
            &db,
            &key,
            &[second],
            now + Duration::minutes(5),
            now + Duration::hours(6) + Duration::minutes(5),
        )
        .await
        .unwrap();

        let rows = WeatherRecord::select(&db, &key, Some(now)).await.unwrap();
        assert_eq!(rows.len(), 2);
        // Most recent fetch first
        assert_eq!(rows[0].payload.temperature_c, Some(32.5));
        assert_eq!(rows[1].payload.temperature_c, Some(30.0));
    }
}
