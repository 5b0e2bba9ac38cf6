//! Crop recommendation cache operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbError;
use crate::models::{CacheEntry, CacheKind, RecommendationKey, RecommendationRecord};
use crate::repository::Database;
use crate::repository::cache::{CacheTable, entries_from_rows};
use crate::utils::format_timestamp;

#[async_trait]
impl CacheTable for RecommendationRecord {
    type Key = RecommendationKey;

    const KIND: CacheKind = CacheKind::Recommendation;

    /// Best rank first
    async fn select(
        db: &Database,
        key: &RecommendationKey,
        valid_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<CacheEntry<Self>>, DbError> {
        let valid_at = valid_at.map(format_timestamp);

        let rows = sqlx::query(
            r#"
            SELECT id, crop_name, crop_family, rank, confidence_score, expected_yield_kg,
                   profit_margin_percent, reasoning, planting_season, fetched_at, expires_at
            FROM recommendations
            WHERE (? IS NULL OR field_id = ?)
              AND (? IS NULL OR expires_at > ?)
            ORDER BY rank ASC, fetched_at DESC, id ASC
            "#,
        )
        .bind(key.field_id)
        .bind(key.field_id)
        .bind(&valid_at)
        .bind(&valid_at)
        .fetch_all(&db.pool)
        .await?;

        entries_from_rows(&rows)
    }

    async fn insert(
        db: &Database,
        key: &RecommendationKey,
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
                INSERT INTO recommendations (field_id, crop_name, crop_family, rank,
                    confidence_score, expected_yield_kg, profit_margin_percent, reasoning,
                    planting_season, fetched_at, expires_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(key.field_id)
            .bind(&record.crop_name)
            .bind(&record.crop_family)
            .bind(record.rank)
            .bind(record.confidence_score)
            .bind(record.expected_yield_kg)
            .bind(record.profit_margin_percent)
            .bind(&record.reasoning)
            .bind(&record.planting_season)
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
    use crate::models::NewField;
    use chrono::Duration;

    fn crop(name: &str, rank: i64) -> RecommendationRecord {
        RecommendationRecord {
            crop_name: name.to_string(),
            crop_family: None,
            rank,
            confidence_score: Some(0.8),
            expected_yield_kg: None,
            profit_margin_percent: None,
            reasoning: None,
            planting_season: Some("Rabi".to_string()),
        }
    }

    #[tokio::test]
    async fn test_recommendations_by_field_sorted_by_rank() {
        let db = Database::in_memory().await.unwrap();
        let now = Utc::now();
        let field = db
            .insert_field(NewField {
                name: "North plot".to_string(),
                size_value: 2.5,
                size_unit: "acres".to_string(),
                latitude: None,
                longitude: None,
                current_crop: None,
            })
            .await
            .unwrap();

        let for_field = RecommendationKey {
            field_id: Some(field.id),
        };
        RecommendationRecord::insert(
            &db,
            &for_field,
            &[crop("Mustard", 2), crop("Wheat", 1), crop("Gram", 3)],
            now,
            now + Duration::days(7),
        )
        .await
        .unwrap();
        RecommendationRecord::insert(
            &db,
            &RecommendationKey::default(),
            &[crop("Barley", 1)],
            now,
            now + Duration::days(7),
        )
        .await
        .unwrap();

        let rows = RecommendationRecord::select(&db, &for_field, Some(now)).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.payload.crop_name.as_str()).collect();
        assert_eq!(names, vec!["Wheat", "Mustard", "Gram"]);

        let all = RecommendationRecord::select(&db, &RecommendationKey::default(), Some(now))
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
    }
}
