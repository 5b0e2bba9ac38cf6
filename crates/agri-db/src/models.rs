//! Database models

use crate::utils::{parse_date, parse_datetime_or_now, parse_optional_datetime};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

/// Error type for parsing models from strings
#[derive(Debug, Clone)]
pub enum ParseError {
    InvalidCacheKind(String),
    InvalidSyncAction(String),
    InvalidSyncStatus(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidCacheKind(s) => write!(f, "Invalid cache kind: {}", s),
            ParseError::InvalidSyncAction(s) => write!(f, "Invalid sync action: {}", s),
            ParseError::InvalidSyncStatus(s) => write!(f, "Invalid sync status: {}", s),
        }
    }
}

impl std::error::Error for ParseError {}

// ==================== Cache Models ====================

/// The four kinds of cached data, each backed by its own table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Soil,
    Weather,
    Market,
    Recommendation,
}

impl CacheKind {
    /// All kinds in sweep order
    pub const ALL: [CacheKind; 4] = [
        CacheKind::Soil,
        CacheKind::Weather,
        CacheKind::Market,
        CacheKind::Recommendation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKind::Soil => "soil",
            CacheKind::Weather => "weather",
            CacheKind::Market => "market",
            CacheKind::Recommendation => "recommendation",
        }
    }

    /// Backing table name
    pub fn table(&self) -> &'static str {
        match self {
            CacheKind::Soil => "soil_data",
            CacheKind::Weather => "weather_data",
            CacheKind::Market => "market_data",
            CacheKind::Recommendation => "recommendations",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "soil" => Ok(CacheKind::Soil),
            "weather" => Ok(CacheKind::Weather),
            "market" => Ok(CacheKind::Market),
            "recommendation" | "recommendations" => Ok(CacheKind::Recommendation),
            _ => Err(ParseError::InvalidCacheKind(s.to_string())),
        }
    }
}

/// A geographic point used as the key of soil and weather caches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// A cached row: the payload plus its freshness window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub id: i64,
    pub payload: T,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// A read is a hit iff `now < expires_at`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// Cache key for weather rows
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherKey {
    pub location: Location,
    /// Narrows reads to a single forecast date; ignored on insert
    pub forecast_date: Option<NaiveDate>,
}

impl WeatherKey {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            forecast_date: None,
        }
    }

    pub fn on(location: Location, forecast_date: NaiveDate) -> Self {
        Self {
            location,
            forecast_date: Some(forecast_date),
        }
    }
}

/// Cache key for market price rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketKey {
    pub commodity: String,
    /// Narrows reads to a single state; ignored on insert
    pub state: Option<String>,
}

/// Cache key for recommendation rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecommendationKey {
    /// `None` reads recommendations for every field
    pub field_id: Option<i64>,
}

/// Cached soil properties for a location
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoilRecord {
    /// Data source: "soilgrids", "bhuvan", "iot" or "manual"
    pub source: String,
    pub field_id: Option<i64>,
    pub ph_level: Option<f64>,
    pub organic_carbon: Option<f64>,
    pub nitrogen_ppm: Option<f64>,
    pub phosphorus_ppm: Option<f64>,
    pub potassium_ppm: Option<f64>,
    pub moisture_percent: Option<f64>,
    pub bulk_density: Option<f64>,
    pub clay_percent: Option<f64>,
    pub sand_percent: Option<f64>,
    pub silt_percent: Option<f64>,
    pub soil_classification: Option<String>,
    pub fertility_index: Option<f64>,
}

/// Cached weather observation or forecast day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub forecast_date: NaiveDate,
    pub location_name: Option<String>,
    pub temperature_c: Option<f64>,
    pub temp_min_c: Option<f64>,
    pub temp_max_c: Option<f64>,
    pub humidity_percent: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub rainfall_probability: Option<f64>,
    pub condition: Option<String>,
    pub uv_index: Option<f64>,
}

impl WeatherRecord {
    /// A record with only the date set
    pub fn for_date(forecast_date: NaiveDate) -> Self {
        Self {
            forecast_date,
            location_name: None,
            temperature_c: None,
            temp_min_c: None,
            temp_max_c: None,
            humidity_percent: None,
            wind_speed_kmh: None,
            precipitation_mm: None,
            rainfall_probability: None,
            condition: None,
            uv_index: None,
        }
    }
}

/// Cached mandi price for a commodity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    pub state: Option<String>,
    pub district: Option<String>,
    pub market_name: Option<String>,
    pub price_per_quintal: f64,
    pub price_date: NaiveDate,
    pub price_change_percent: Option<f64>,
    pub volume_traded: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub trend_30day_avg: Option<f64>,
    pub trend_90day_avg: Option<f64>,
}

/// Cached crop recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationRecord {
    pub crop_name: String,
    pub crop_family: Option<String>,
    pub rank: i64,
    pub confidence_score: Option<f64>,
    pub expected_yield_kg: Option<f64>,
    pub profit_margin_percent: Option<f64>,
    pub reasoning: Option<String>,
    /// Kharif, Rabi or Zaid
    pub planting_season: Option<String>,
}

// ==================== Sync Queue Models ====================

/// Mutation carried by a sync item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

impl FromStr for SyncAction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            _ => Err(ParseError::InvalidSyncAction(s.to_string())),
        }
    }
}

/// Delivery state of a sync item
///
/// `pending → syncing → {completed | pending | failed}`; `completed` and
/// `failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }
}

impl FromStr for SyncStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "syncing" => Ok(SyncStatus::Syncing),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            _ => Err(ParseError::InvalidSyncStatus(s.to_string())),
        }
    }
}

/// Queued local mutation awaiting delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: i64,
    /// e.g. "field", "crop_history", "soil_data", "detection"
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub action: SyncAction,
    pub payload: serde_json::Value,
    pub status: SyncStatus,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub synced_at: Option<DateTime<Utc>>,
}

/// New sync item (for insertion)
#[derive(Debug, Clone)]
pub struct NewSyncItem {
    pub entity_type: String,
    pub entity_id: Option<i64>,
    pub action: SyncAction,
    pub payload: serde_json::Value,
}

// ==================== Settings & Field Models ====================

/// User preferences singleton (id = 1)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSettings {
    pub farmer_name: Option<String>,
    pub app_language: String,
    pub offline_mode: bool,
    pub updated_at: DateTime<Utc>,
}

/// A farmer's field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub id: i64,
    pub name: String,
    pub size_value: f64,
    /// "acres" or "hectares"
    pub size_unit: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub current_crop: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New field (for insertion)
#[derive(Debug, Clone)]
pub struct NewField {
    pub name: String,
    pub size_value: f64,
    pub size_unit: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub current_crop: Option<String>,
}

// ==================== TryFrom Implementations ====================

impl TryFrom<&sqlx::sqlite::SqliteRow> for SoilRecord {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(SoilRecord {
            source: row.try_get("source")?,
            field_id: row.try_get("field_id")?,
            ph_level: row.try_get("ph_level")?,
            organic_carbon: row.try_get("organic_carbon")?,
            nitrogen_ppm: row.try_get("nitrogen_ppm")?,
            phosphorus_ppm: row.try_get("phosphorus_ppm")?,
            potassium_ppm: row.try_get("potassium_ppm")?,
            moisture_percent: row.try_get("moisture_percent")?,
            bulk_density: row.try_get("bulk_density")?,
            clay_percent: row.try_get("clay_percent")?,
            sand_percent: row.try_get("sand_percent")?,
            silt_percent: row.try_get("silt_percent")?,
            soil_classification: row.try_get("soil_classification")?,
            fertility_index: row.try_get("fertility_index")?,
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for WeatherRecord {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(WeatherRecord {
            forecast_date: parse_date(&row.try_get::<String, _>("forecast_date")?)?,
            location_name: row.try_get("location_name")?,
            temperature_c: row.try_get("temperature_c")?,
            temp_min_c: row.try_get("temp_min_c")?,
            temp_max_c: row.try_get("temp_max_c")?,
            humidity_percent: row.try_get("humidity_percent")?,
            wind_speed_kmh: row.try_get("wind_speed_kmh")?,
            precipitation_mm: row.try_get("precipitation_mm")?,
            rainfall_probability: row.try_get("rainfall_probability")?,
            condition: row.try_get("condition")?,
            uv_index: row.try_get("uv_index")?,
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for MarketRecord {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(MarketRecord {
            state: row.try_get("state")?,
            district: row.try_get("district")?,
            market_name: row.try_get("market_name")?,
            price_per_quintal: row.try_get("price_per_quintal")?,
            price_date: parse_date(&row.try_get::<String, _>("price_date")?)?,
            price_change_percent: row.try_get("price_change_percent")?,
            volume_traded: row.try_get("volume_traded")?,
            min_price: row.try_get("min_price")?,
            max_price: row.try_get("max_price")?,
            trend_30day_avg: row.try_get("trend_30day_avg")?,
            trend_90day_avg: row.try_get("trend_90day_avg")?,
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for RecommendationRecord {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(RecommendationRecord {
            crop_name: row.try_get("crop_name")?,
            crop_family: row.try_get("crop_family")?,
            rank: row.try_get("rank")?,
            confidence_score: row.try_get("confidence_score")?,
            expected_yield_kg: row.try_get("expected_yield_kg")?,
            profit_margin_percent: row.try_get("profit_margin_percent")?,
            reasoning: row.try_get("reasoning")?,
            planting_season: row.try_get("planting_season")?,
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for SyncItem {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        let action_str: String = row.try_get("action")?;
        let status_str: String = row.try_get("status")?;
        let payload_str: String = row.try_get("payload")?;
        Ok(SyncItem {
            id: row.try_get("id")?,
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            action: SyncAction::from_str(&action_str)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            payload: serde_json::from_str(&payload_str)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            status: SyncStatus::from_str(&status_str)
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            retry_count: row.try_get("retry_count")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
            synced_at: parse_optional_datetime(row.try_get("synced_at")?),
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for UserSettings {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(UserSettings {
            farmer_name: row.try_get("farmer_name")?,
            app_language: row.try_get("app_language")?,
            offline_mode: row.try_get("offline_mode")?,
            updated_at: parse_datetime_or_now(&row.try_get::<String, _>("updated_at")?),
        })
    }
}

impl TryFrom<&sqlx::sqlite::SqliteRow> for Field {
    type Error = sqlx::Error;

    fn try_from(row: &sqlx::sqlite::SqliteRow) -> Result<Self, Self::Error> {
        Ok(Field {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            size_value: row.try_get("size_value")?,
            size_unit: row.try_get("size_unit")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            current_crop: row.try_get("current_crop")?,
            created_at: parse_datetime_or_now(&row.try_get::<String, _>("created_at")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cache_kind_parse() {
        assert_eq!("soil".parse::<CacheKind>().unwrap(), CacheKind::Soil);
        assert_eq!("Weather".parse::<CacheKind>().unwrap(), CacheKind::Weather);
        assert_eq!(
            "recommendations".parse::<CacheKind>().unwrap(),
            CacheKind::Recommendation
        );
        assert!("pests".parse::<CacheKind>().is_err());
    }

    #[test]
    fn test_cache_kind_tables_are_distinct() {
        let mut tables: Vec<&str> = CacheKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), 4);
    }

    #[test]
    fn test_sync_status_terminal() {
        assert!(!SyncStatus::Pending.is_terminal());
        assert!(!SyncStatus::Syncing.is_terminal());
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert_eq!("failed".parse::<SyncStatus>().unwrap(), SyncStatus::Failed);
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_sync_action_parse() {
        for action in [SyncAction::Create, SyncAction::Update, SyncAction::Delete] {
            assert_eq!(action.as_str().parse::<SyncAction>().unwrap(), action);
        }
        assert!("upsert".parse::<SyncAction>().is_err());
    }

    #[test]
    fn test_cache_entry_freshness_boundary() {
        let fetched_at = Utc::now();
        let entry = CacheEntry {
            id: 1,
            payload: (),
            fetched_at,
            expires_at: fetched_at + Duration::hours(6),
        };

        assert!(entry.is_fresh(fetched_at + Duration::hours(1)));
        assert!(!entry.is_fresh(fetched_at + Duration::hours(6)));
        assert!(!entry.is_fresh(fetched_at + Duration::hours(7)));
    }
}
