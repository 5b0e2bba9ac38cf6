//! WeatherAPI.com client

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::client::{ApiClient, ApiClientConfig};
use crate::error::ProxyError;
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "http://api.weatherapi.com/v1";
pub const TIMEOUT: Duration = Duration::from_secs(15);
/// Longest forecast the upstream serves on the free tier
pub const MAX_FORECAST_DAYS: u32 = 7;

/// One day of observed or forecast weather
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    pub date: NaiveDate,
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

#[derive(Debug, Deserialize)]
struct ApiLocation {
    name: Option<String>,
    region: Option<String>,
    /// "YYYY-MM-DD HH:MM" in the location's local time
    localtime: Option<String>,
}

impl ApiLocation {
    fn display_name(&self) -> Option<String> {
        match (&self.name, &self.region) {
            (Some(name), Some(region)) if !region.is_empty() => Some(format!("{}, {}", name, region)),
            (Some(name), _) => Some(name.clone()),
            (None, _) => None,
        }
    }

    fn local_date(&self) -> Option<NaiveDate> {
        let localtime = self.localtime.as_deref()?;
        NaiveDate::parse_from_str(localtime.get(..10)?, "%Y-%m-%d").ok()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiCondition {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiCurrent {
    temp_c: Option<f64>,
    humidity: Option<f64>,
    wind_kph: Option<f64>,
    precip_mm: Option<f64>,
    #[serde(default)]
    condition: ApiCondition,
    uv: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    location: ApiLocation,
    current: ApiCurrent,
}

#[derive(Debug, Deserialize)]
struct ApiDay {
    maxtemp_c: Option<f64>,
    mintemp_c: Option<f64>,
    avghumidity: Option<f64>,
    maxwind_kph: Option<f64>,
    totalprecip_mm: Option<f64>,
    daily_chance_of_rain: Option<f64>,
    #[serde(default)]
    condition: ApiCondition,
    uv: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiForecastDay {
    date: String,
    day: ApiDay,
}

#[derive(Debug, Deserialize)]
struct ApiForecast {
    #[serde(default)]
    forecastday: Vec<ApiForecastDay>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    location: ApiLocation,
    forecast: ApiForecast,
}

/// Client for current conditions and daily forecasts
#[derive(Clone)]
pub struct WeatherClient {
    api: ApiClient,
    api_key: String,
}

impl WeatherClient {
    pub fn new(base_url: &str, api_key: &str, retry: RetryPolicy) -> Result<Self, ProxyError> {
        if api_key.is_empty() {
            return Err(ProxyError::MissingApiKey("WeatherAPI"));
        }
        let api = ApiClient::new(ApiClientConfig::new(base_url, TIMEOUT).with_retry(retry))?;
        Ok(Self {
            api,
            api_key: api_key.to_string(),
        })
    }

    /// Current conditions, dated with the location's local date
    pub async fn current(&self, latitude: f64, longitude: f64) -> Result<WeatherReading, ProxyError> {
        debug!("Fetching current weather for ({}, {})", latitude, longitude);

        let query = [
            ("key", self.api_key.clone()),
            ("q", format!("{},{}", latitude, longitude)),
            ("aqi", "no".to_string()),
        ];
        let response: CurrentResponse = self.api.get_json("current.json", &query).await?;
        Ok(parse_current(response))
    }

    /// Daily forecast for `days` days starting today (at most 7)
    pub async fn forecast(
        &self,
        latitude: f64,
        longitude: f64,
        days: u32,
    ) -> Result<Vec<WeatherReading>, ProxyError> {
        let days = days.clamp(1, MAX_FORECAST_DAYS);
        debug!("Fetching {}-day forecast for ({}, {})", days, latitude, longitude);

        let query = [
            ("key", self.api_key.clone()),
            ("q", format!("{},{}", latitude, longitude)),
            ("days", days.to_string()),
            ("aqi", "no".to_string()),
        ];
        let response: ForecastResponse = self.api.get_json("forecast.json", &query).await?;
        parse_forecast(response)
    }
}

fn parse_current(response: CurrentResponse) -> WeatherReading {
    let date = response
        .location
        .local_date()
        .unwrap_or_else(|| Utc::now().date_naive());
    let current = response.current;

    WeatherReading {
        date,
        location_name: response.location.display_name(),
        temperature_c: current.temp_c,
        temp_min_c: None,
        temp_max_c: None,
        humidity_percent: current.humidity,
        wind_speed_kmh: current.wind_kph,
        precipitation_mm: current.precip_mm,
        // Current conditions carry no rain probability
        rainfall_probability: None,
        condition: current.condition.text,
        uv_index: current.uv,
    }
}

fn parse_forecast(response: ForecastResponse) -> Result<Vec<WeatherReading>, ProxyError> {
    let location_name = response.location.display_name();

    response
        .forecast
        .forecastday
        .into_iter()
        .map(|entry| {
            let date = NaiveDate::parse_from_str(&entry.date, "%Y-%m-%d").map_err(|e| {
                ProxyError::InvalidResponse(format!("bad forecast date '{}': {}", entry.date, e))
            })?;
            let day = entry.day;
            let temperature_c = match (day.maxtemp_c, day.mintemp_c) {
                (Some(max), Some(min)) => Some((max + min) / 2.0),
                _ => None,
            };

            Ok(WeatherReading {
                date,
                location_name: location_name.clone(),
                temperature_c,
                temp_min_c: day.mintemp_c,
                temp_max_c: day.maxtemp_c,
                humidity_percent: day.avghumidity,
                wind_speed_kmh: day.maxwind_kph,
                precipitation_mm: day.totalprecip_mm,
                rainfall_probability: day.daily_chance_of_rain,
                condition: day.condition.text,
                uv_index: day.uv,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_current() {
        let response: CurrentResponse = serde_json::from_value(json!({
            "location": { "name": "New Delhi", "region": "Delhi", "localtime": "2024-06-01 14:05" },
            "current": {
                "temp_c": 41.2, "humidity": 18, "wind_kph": 11.5, "precip_mm": 0.0,
                "condition": { "text": "Sunny" }, "uv": 9.0
            }
        }))
        .unwrap();

        let reading = parse_current(response);
        assert_eq!(reading.date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(reading.location_name.as_deref(), Some("New Delhi, Delhi"));
        assert_eq!(reading.temperature_c, Some(41.2));
        assert_eq!(reading.condition.as_deref(), Some("Sunny"));
        assert!(reading.rainfall_probability.is_none());
    }

    #[test]
    fn test_parse_forecast_averages_temperature() {
        let response: ForecastResponse = serde_json::from_value(json!({
            "location": { "name": "Pune", "region": "", "localtime": "2024-06-01 08:00" },
            "forecast": { "forecastday": [
                { "date": "2024-06-01", "day": {
                    "maxtemp_c": 34.0, "mintemp_c": 24.0, "avghumidity": 60,
                    "maxwind_kph": 20.0, "totalprecip_mm": 3.2, "daily_chance_of_rain": 70,
                    "condition": { "text": "Patchy rain" }, "uv": 7.0 } },
                { "date": "2024-06-02", "day": { "maxtemp_c": 33.0 } }
            ] }
        }))
        .unwrap();

        let readings = parse_forecast(response).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].temperature_c, Some(29.0));
        assert_eq!(readings[0].rainfall_probability, Some(70.0));
        assert_eq!(readings[0].location_name.as_deref(), Some("Pune"));
        assert_eq!(readings[1].temperature_c, None);
        assert_eq!(readings[1].temp_max_c, Some(33.0));
    }

    #[test]
    fn test_parse_forecast_rejects_bad_date() {
        let response: ForecastResponse = serde_json::from_value(json!({
            "location": { "name": "Pune" },
            "forecast": { "forecastday": [ { "date": "June 1", "day": {} } ] }
        }))
        .unwrap();

        assert!(matches!(
            parse_forecast(response),
            Err(ProxyError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let result = WeatherClient::new(DEFAULT_BASE_URL, "", RetryPolicy::default());
        assert!(matches!(result, Err(ProxyError::MissingApiKey(_))));
    }
}
