//! Field operations

use chrono::Utc;
use sqlx::Row;
use tracing::debug;

use crate::error::DbError;
use crate::models::{Field, NewField};
use crate::repository::Database;
use crate::utils::format_timestamp;

impl Database {
    // ==================== Field Operations ====================

    /// Insert a new field
    pub async fn insert_field(&self, field: NewField) -> Result<Field, DbError> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO fields (name, size_value, size_unit, latitude, longitude, current_crop, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&field.name)
        .bind(field.size_value)
        .bind(&field.size_unit)
        .bind(field.latitude)
        .bind(field.longitude)
        .bind(&field.current_crop)
        .bind(format_timestamp(now))
        .fetch_one(&self.pool)
        .await?;

        Ok(Field {
            id: result.get("id"),
            name: field.name,
            size_value: field.size_value,
            size_unit: field.size_unit,
            latitude: field.latitude,
            longitude: field.longitude,
            current_crop: field.current_crop,
            created_at: now,
        })
    }

    /// Get a field by ID
    pub async fn get_field(&self, id: i64) -> Result<Option<Field>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT id, name, size_value, size_unit, latitude, longitude, current_crop, created_at
            FROM fields
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        result.map(|row| Field::try_from(&row).map_err(DbError::from)).transpose()
    }

    /// List all fields
    pub async fn list_fields(&self) -> Result<Vec<Field>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, size_value, size_unit, latitude, longitude, current_crop, created_at
            FROM fields
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Field::try_from(row).map_err(DbError::from))
            .collect()
    }

    /// Delete a field together with every soil and recommendation row that
    /// references it. Returns false if the field did not exist.
    pub async fn delete_field(&self, id: i64) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        let soil = sqlx::query("DELETE FROM soil_data WHERE field_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let recommendations = sqlx::query("DELETE FROM recommendations WHERE field_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let field = sqlx::query("DELETE FROM fields WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if field.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        tx.commit().await?;

        debug!(
            "Deleted field {} with {} soil and {} recommendation rows",
            id,
            soil.rows_affected(),
            recommendations.rows_affected()
        );
        Ok(true)
    }
}
