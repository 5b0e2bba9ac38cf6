//! Live data collaborators

use agri_db::{Location, MarketRecord, SoilRecord, WeatherRecord};
use agri_proxy::{MarketClient, MarketQuote, SoilClient, SoilProfile, WeatherClient, WeatherReading};
use async_trait::async_trait;

use crate::error::CoreError;

/// Source label stored with SoilGrids rows
pub const SOILGRIDS_SOURCE: &str = "soilgrids";

/// Fetches fresh data from the outside world
#[async_trait]
pub trait DataFetcher: Send + Sync {
    async fn current_weather(&self, location: Location) -> Result<WeatherRecord, CoreError>;

    async fn forecast(&self, location: Location, days: u32) -> Result<Vec<WeatherRecord>, CoreError>;

    async fn soil(&self, location: Location) -> Result<SoilRecord, CoreError>;

    async fn market_prices(
        &self,
        commodity: &str,
        state: Option<&str>,
    ) -> Result<Vec<MarketRecord>, CoreError>;
}

/// `DataFetcher` over the upstream HTTP clients.
/// Weather and market need API keys; without one those lookups fail.
pub struct HttpFetcher {
    weather: Option<WeatherClient>,
    soil: SoilClient,
    market: Option<MarketClient>,
}

impl HttpFetcher {
    pub fn new(
        weather: Option<WeatherClient>,
        soil: SoilClient,
        market: Option<MarketClient>,
    ) -> Self {
        Self {
            weather,
            soil,
            market,
        }
    }

    fn weather(&self) -> Result<&WeatherClient, CoreError> {
        self.weather
            .as_ref()
            .ok_or_else(|| CoreError::FetchFailed("weather API key not configured".to_string()))
    }

    fn market(&self) -> Result<&MarketClient, CoreError> {
        self.market
            .as_ref()
            .ok_or_else(|| CoreError::FetchFailed("market API key not configured".to_string()))
    }
}

#[async_trait]
impl DataFetcher for HttpFetcher {
    async fn current_weather(&self, location: Location) -> Result<WeatherRecord, CoreError> {
        let reading = self
            .weather()?
            .current(location.latitude, location.longitude)
            .await?;
        Ok(weather_record(reading))
    }

    async fn forecast(&self, location: Location, days: u32) -> Result<Vec<WeatherRecord>, CoreError> {
        let readings = self
            .weather()?
            .forecast(location.latitude, location.longitude, days)
            .await?;
        Ok(readings.into_iter().map(weather_record).collect())
    }

    async fn soil(&self, location: Location) -> Result<SoilRecord, CoreError> {
        let profile = self
            .soil
            .properties(location.latitude, location.longitude)
            .await?;
        Ok(soil_record(profile))
    }

    async fn market_prices(
        &self,
        commodity: &str,
        state: Option<&str>,
    ) -> Result<Vec<MarketRecord>, CoreError> {
        let quotes = self.market()?.prices(commodity, state).await?;
        Ok(quotes.into_iter().map(market_record).collect())
    }
}

pub fn weather_record(reading: WeatherReading) -> WeatherRecord {
    WeatherRecord {
        forecast_date: reading.date,
        location_name: reading.location_name,
        temperature_c: reading.temperature_c,
        temp_min_c: reading.temp_min_c,
        temp_max_c: reading.temp_max_c,
        humidity_percent: reading.humidity_percent,
        wind_speed_kmh: reading.wind_speed_kmh,
        precipitation_mm: reading.precipitation_mm,
        rainfall_probability: reading.rainfall_probability,
        condition: reading.condition,
        uv_index: reading.uv_index,
    }
}

/// Soil row for a location-keyed lookup; not tied to any field
pub fn soil_record(profile: SoilProfile) -> SoilRecord {
    SoilRecord {
        source: SOILGRIDS_SOURCE.to_string(),
        soil_classification: profile.texture_class().map(str::to_string),
        ph_level: profile.ph_level,
        organic_carbon: profile.organic_carbon,
        nitrogen_ppm: profile.nitrogen_ppm,
        bulk_density: profile.bulk_density,
        clay_percent: profile.clay_percent,
        sand_percent: profile.sand_percent,
        silt_percent: profile.silt_percent,
        ..SoilRecord::default()
    }
}

pub fn market_record(quote: MarketQuote) -> MarketRecord {
    MarketRecord {
        state: quote.state,
        district: quote.district,
        market_name: quote.market,
        price_per_quintal: quote.modal_price,
        price_date: quote.arrival_date,
        price_change_percent: None,
        volume_traded: None,
        min_price: quote.min_price,
        max_price: quote.max_price,
        trend_30day_avg: None,
        trend_90day_avg: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agri_proxy::RetryPolicy;
    use chrono::NaiveDate;

    #[test]
    fn test_soil_record_carries_texture_class() {
        let record = soil_record(SoilProfile {
            ph_level: Some(6.8),
            clay_percent: Some(45.0),
            sand_percent: Some(20.0),
            silt_percent: Some(35.0),
            ..SoilProfile::default()
        });

        assert_eq!(record.source, SOILGRIDS_SOURCE);
        assert_eq!(record.soil_classification.as_deref(), Some("clay"));
        assert_eq!(record.ph_level, Some(6.8));
        assert_eq!(record.field_id, None);
        assert_eq!(record.phosphorus_ppm, None);
    }

    #[test]
    fn test_market_record_uses_modal_price() {
        let date = NaiveDate::from_ymd_opt(2024, 11, 3).unwrap();
        let record = market_record(MarketQuote {
            state: Some("Punjab".to_string()),
            district: Some("Ludhiana".to_string()),
            market: Some("Khanna".to_string()),
            modal_price: 2275.0,
            min_price: Some(2200.0),
            max_price: Some(2300.0),
            arrival_date: date,
        });

        assert_eq!(record.price_per_quintal, 2275.0);
        assert_eq!(record.price_date, date);
        assert_eq!(record.market_name.as_deref(), Some("Khanna"));
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_without_network() {
        let soil = SoilClient::new("http://127.0.0.1:9", RetryPolicy::none()).unwrap();
        let fetcher = HttpFetcher::new(None, soil, None);
        let location = Location {
            latitude: 28.6,
            longitude: 77.2,
        };

        assert!(matches!(
            fetcher.current_weather(location).await,
            Err(CoreError::FetchFailed(_))
        ));
        assert!(matches!(
            fetcher.market_prices("Wheat", None).await,
            Err(CoreError::FetchFailed(_))
        ));
    }
}
