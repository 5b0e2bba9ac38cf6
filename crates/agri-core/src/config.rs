//! Shared configuration types for the cache-and-sync core
//!
//! These types are shared with the application shell, which loads them from
//! its TOML file and applies environment overrides.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Time-to-live per cache kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTtlConfig {
    #[serde(default = "default_soil_days")]
    pub soil_days: u32,
    #[serde(default = "default_weather_hours")]
    pub weather_hours: u32,
    #[serde(default = "default_market_hours")]
    pub market_hours: u32,
    #[serde(default = "default_recommendation_days")]
    pub recommendation_days: u32,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            soil_days: default_soil_days(),
            weather_hours: default_weather_hours(),
            market_hours: default_market_hours(),
            recommendation_days: default_recommendation_days(),
        }
    }
}

fn default_soil_days() -> u32 {
    30
}

fn default_weather_hours() -> u32 {
    6
}

fn default_market_hours() -> u32 {
    24
}

fn default_recommendation_days() -> u32 {
    7
}

/// Sync queue delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Failed attempts after which an item becomes `failed`
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Base URL of the remote that receives queued mutations; without it
    /// nothing is drained automatically
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            endpoint: None,
        }
    }
}

fn default_retry_limit() -> u32 {
    3
}

/// Connectivity probing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Wait after a failed loop iteration before probing again
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
    /// `host:port` opened by the TCP probe
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    /// Upper bound on waiting for the polling task to stop
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl ConnectivityConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            probe_host: default_probe_host(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_error_backoff_secs() -> u64 {
    60
}

fn default_probe_host() -> String {
    "8.8.8.8:53".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ttl = CacheTtlConfig::default();
        assert_eq!(
            (ttl.soil_days, ttl.weather_hours, ttl.market_hours, ttl.recommendation_days),
            (30, 6, 24, 7)
        );
        assert_eq!(SyncConfig::default().retry_limit, 3);

        let connectivity = ConnectivityConfig::default();
        assert_eq!(connectivity.poll_interval(), Duration::from_secs(300));
        assert_eq!(connectivity.probe_timeout(), Duration::from_secs(5));
        assert_eq!(connectivity.probe_host, "8.8.8.8:53");
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let ttl: CacheTtlConfig = serde_json::from_str(r#"{ "weather_hours": 2 }"#).unwrap();
        assert_eq!(ttl.weather_hours, 2);
        assert_eq!(ttl.soil_days, 30);

        let sync: SyncConfig =
            serde_json::from_str(r#"{ "endpoint": "https://sync.example" }"#).unwrap();
        assert_eq!(sync.retry_limit, 3);
        assert_eq!(sync.endpoint.as_deref(), Some("https://sync.example"));
    }
}
