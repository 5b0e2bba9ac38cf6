//! Database repository implementation

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{error, info};

use crate::error::DbError;

// Submodules
mod cache;
mod fields;
mod market;
mod recommendations;
mod settings;
mod soil;
mod sync_queue;
mod weather;

pub use cache::CacheTable;
pub use sync_queue::SyncQueueStats;

/// Database connection and operations
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    ///
    /// The database file is created if missing and migrations are applied.
    pub async fn new(database_url: &str) -> Result<Self, DbError> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create a private in-memory database
    ///
    /// Uses a single long-lived connection so the in-memory database
    /// survives for as long as the pool does.
    pub async fn in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Get the underlying pool for advanced usage
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check that the store answers queries
    pub async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                error!("Database health check failed: {}", e);
                false
            }
        }
    }

    /// Close all pooled connections
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), DbError> {
        info!("Running database migrations");

        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DbError::Migration(e.to_string()))?;
        }

        info!("Database migrations completed");
        Ok(())
    }
}

/// Idempotent schema statements, applied in order
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS user_settings (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        farmer_name TEXT,
        app_language TEXT NOT NULL DEFAULT 'en',
        offline_mode INTEGER NOT NULL DEFAULT 0,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    INSERT OR IGNORE INTO user_settings (id, farmer_name, app_language, offline_mode, updated_at)
    VALUES (1, 'Farmer', 'en', 0, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS fields (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        size_value REAL NOT NULL,
        size_unit TEXT NOT NULL,
        latitude REAL,
        longitude REAL,
        current_crop TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS soil_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        field_id INTEGER REFERENCES fields(id),
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        source TEXT NOT NULL,
        ph_level REAL,
        organic_carbon REAL,
        nitrogen_ppm REAL,
        phosphorus_ppm REAL,
        potassium_ppm REAL,
        moisture_percent REAL,
        bulk_density REAL,
        clay_percent REAL,
        sand_percent REAL,
        silt_percent REAL,
        soil_classification TEXT,
        fertility_index REAL,
        fetched_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_soil_data_location ON soil_data(latitude, longitude)",
    "CREATE INDEX IF NOT EXISTS idx_soil_data_expires ON soil_data(expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS weather_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        location_name TEXT,
        forecast_date TEXT NOT NULL,
        temperature_c REAL,
        temp_min_c REAL,
        temp_max_c REAL,
        humidity_percent REAL,
        wind_speed_kmh REAL,
        precipitation_mm REAL,
        rainfall_probability REAL,
        condition TEXT,
        uv_index REAL,
        fetched_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_weather_data_location_date ON weather_data(latitude, longitude, forecast_date)",
    "CREATE INDEX IF NOT EXISTS idx_weather_data_expires ON weather_data(expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS market_data (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        commodity_name TEXT NOT NULL,
        state TEXT,
        district TEXT,
        market_name TEXT,
        price_per_quintal REAL NOT NULL,
        price_date TEXT NOT NULL,
        price_change_percent REAL,
        volume_traded REAL,
        min_price REAL,
        max_price REAL,
        trend_30day_avg REAL,
        trend_90day_avg REAL,
        fetched_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_market_data_commodity ON market_data(commodity_name, price_date)",
    "CREATE INDEX IF NOT EXISTS idx_market_data_expires ON market_data(expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS recommendations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        field_id INTEGER REFERENCES fields(id),
        crop_name TEXT NOT NULL,
        crop_family TEXT,
        rank INTEGER NOT NULL,
        confidence_score REAL,
        expected_yield_kg REAL,
        profit_margin_percent REAL,
        reasoning TEXT,
        planting_season TEXT,
        fetched_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_recommendations_field ON recommendations(field_id)",
    "CREATE INDEX IF NOT EXISTS idx_recommendations_expires ON recommendations(expires_at)",
    r#"
    CREATE TABLE IF NOT EXISTS sync_queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_type TEXT NOT NULL,
        entity_id INTEGER,
        action TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        retry_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        synced_at TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status, created_at)",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_migrates() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.health_check().await);

        // Settings singleton is seeded by the migrations
        let settings = db.get_user_settings().await.unwrap();
        assert!(!settings.offline_mode);
        assert_eq!(settings.app_language, "en");
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.set_offline_mode(true).await.unwrap();

        db.run_migrations().await.unwrap();

        // Re-running must not reset the seeded singleton
        assert!(db.get_offline_mode().await.unwrap());
    }
}
