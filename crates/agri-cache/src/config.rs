//! Configuration loading and management

use agri_core::{CacheTtlConfig, ConnectivityConfig, SyncConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheTtlConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub connectivity: ConnectivityConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Database configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx SQLite URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl DatabaseConfig {
    /// Directory holding the database file, if the URL names one
    pub fn data_dir(&self) -> Option<PathBuf> {
        let path = self
            .url
            .strip_prefix("sqlite://")
            .or_else(|| self.url.strip_prefix("sqlite:"))?;
        let path = path.split('?').next().unwrap_or(path);
        if path.is_empty() || path == ":memory:" {
            return None;
        }
        Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }
}

/// Upstream API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub weather_api_key: Option<String>,
    #[serde(default = "default_weather_base_url")]
    pub weather_base_url: String,
    #[serde(default = "default_soil_base_url")]
    pub soil_base_url: String,
    #[serde(default)]
    pub market_api_key: Option<String>,
    #[serde(default = "default_market_base_url")]
    pub market_base_url: String,
    /// Transport retries per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds; retry n waits `backoff_factor * 2^n`
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            weather_api_key: None,
            weather_base_url: default_weather_base_url(),
            soil_base_url: default_soil_base_url(),
            market_api_key: None,
            market_base_url: default_market_base_url(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Periodic maintenance configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl MaintenanceConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_database_url() -> String {
    "sqlite:data/agri_cache.db?mode=rwc".to_string()
}

fn default_weather_base_url() -> String {
    agri_proxy::weather::DEFAULT_BASE_URL.to_string()
}

fn default_soil_base_url() -> String {
    agri_proxy::soil::DEFAULT_BASE_URL.to_string()
}

fn default_market_base_url() -> String {
    agri_proxy::market::DEFAULT_BASE_URL.to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    0.5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Config {
    /// Load configuration from a file, then apply environment overrides.
    /// A missing file means defaults. Also returns the overrides that were
    /// ignored, for logging once the subscriber is up.
    pub fn load(path: &str) -> Result<(Self, Vec<String>)> {
        let mut config = Self::load_file(path)?;
        let ignored = config.apply_env(|key| std::env::var(key).ok());
        Ok((config, ignored))
    }

    fn load_file(path: &str) -> Result<Self> {
        let config_path = Path::new(path);

        if !config_path.exists() {
            info!("Config file not found at {}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Apply overrides from `lookup`, normally the process environment.
    /// Returns a description of each override ignored as unparseable.
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut ignored = Vec::new();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = text("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(level) = text("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(endpoint) = text("SYNC_ENDPOINT") {
            self.sync.endpoint = Some(endpoint);
        }
        if let Some(key) = text("WEATHER_API_KEY") {
            self.api.weather_api_key = Some(key);
        }
        if let Some(key) = text("AGMARKNET_API_KEY") {
            self.api.market_api_key = Some(key);
        }

        let numbers: [(&str, &mut dyn NumberField); 7] = [
            ("SOIL_CACHE_DAYS", &mut self.cache.soil_days),
            ("WEATHER_CACHE_HOURS", &mut self.cache.weather_hours),
            ("MARKET_CACHE_HOURS", &mut self.cache.market_hours),
            ("RECOMMENDATION_CACHE_DAYS", &mut self.cache.recommendation_days),
            ("CONNECTIVITY_CHECK_INTERVAL", &mut self.connectivity.poll_interval_secs),
            ("CONNECTIVITY_TIMEOUT", &mut self.connectivity.probe_timeout_secs),
            ("SYNC_RETRY_LIMIT", &mut self.sync.retry_limit),
        ];
        for (key, target) in numbers {
            if let Some(raw) = text(key) {
                if !target.set_from(raw.trim()) {
                    ignored.push(format!("Ignoring {}={:?}: not a valid number", key, raw));
                }
            }
        }

        ignored
    }

    /// Save configuration to a file atomically
    pub fn save(&self, path: &str) -> Result<()> {
        let content =
            toml::to_string_pretty(self).with_context(|| "Failed to serialize configuration")?;

        let path_obj = Path::new(path);
        let parent = match path_obj.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {:?}", parent))?;

        let temp_file = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {:?}", parent))?;
        {
            let mut file = temp_file.as_file();
            file.write_all(content.as_bytes())
                .with_context(|| "Failed to write to temp file")?;
            file.sync_all().with_context(|| "Failed to sync temp file")?;
        }

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {}", path))?;

        info!("Saved configuration to {}", path);
        Ok(())
    }
}

/// A numeric setting an environment variable may override
trait NumberField {
    /// Parse `raw` into the field; false leaves it untouched
    fn set_from(&mut self, raw: &str) -> bool;
}

impl<T: FromStr> NumberField for T {
    fn set_from(&mut self, raw: &str) -> bool {
        match raw.parse() {
            Ok(value) => {
                *self = value;
                true
            }
            Err(_) => false,
        }
    }
}
