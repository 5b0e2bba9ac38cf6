//! User settings operations

use chrono::Utc;
use sqlx::Row;

use crate::error::DbError;
use crate::models::UserSettings;
use crate::repository::Database;
use crate::utils::format_timestamp;

impl Database {
    // ==================== Settings Operations ====================

    /// Get the settings singleton
    pub async fn get_user_settings(&self) -> Result<UserSettings, DbError> {
        let row = sqlx::query(
            r#"
            SELECT farmer_name, app_language, offline_mode, updated_at
            FROM user_settings
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound("user settings".to_string()))?;

        Ok(UserSettings::try_from(&row)?)
    }

    /// Read the persisted manual offline flag
    pub async fn get_offline_mode(&self) -> Result<bool, DbError> {
        let row = sqlx::query("SELECT offline_mode FROM user_settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound("user settings".to_string()))?;

        Ok(row.get("offline_mode"))
    }

    /// Persist the manual offline flag
    pub async fn set_offline_mode(&self, offline: bool) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE user_settings SET offline_mode = ?, updated_at = ? WHERE id = 1",
        )
        .bind(offline)
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("user settings".to_string()));
        }
        Ok(())
    }
}
