//! Fetch-or-cache data service

use agri_db::{
    CacheEntry, Location, MarketKey, MarketRecord, RecommendationKey, RecommendationRecord,
    SoilRecord, WeatherKey, WeatherRecord,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::CacheManager;
use crate::error::CoreError;
use crate::fetch::DataFetcher;
use crate::offline::OfflineCoordinator;
use crate::validate;

/// Where a served value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Fetched live just now
    Network,
    /// Fresh cache hit
    Cache,
    /// Expired cache rows, served because the live fetch failed
    Stale,
}

/// A served value with its provenance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fetched<T> {
    pub data: T,
    pub source: DataSource,
    /// For lists, the oldest fetch among the served rows
    pub fetched_at: DateTime<Utc>,
}

impl<T> Fetched<T> {
    fn from_entry(entry: CacheEntry<T>, source: DataSource) -> Self {
        Self {
            fetched_at: entry.fetched_at,
            data: entry.payload,
            source,
        }
    }
}

/// Build a list result; `None` if there are no rows
fn from_entries<T>(entries: Vec<CacheEntry<T>>, source: DataSource) -> Option<Fetched<Vec<T>>> {
    let fetched_at = entries.iter().map(|e| e.fetched_at).min()?;
    Some(Fetched {
        data: entries.into_iter().map(CacheEntry::into_payload).collect(),
        source,
        fetched_at,
    })
}

/// Keep the first row per forecast date (rows arrive newest fetch first),
/// then order by date
fn latest_per_date(entries: Vec<CacheEntry<WeatherRecord>>) -> Vec<CacheEntry<WeatherRecord>> {
    let mut seen = HashSet::new();
    let mut latest: Vec<_> = entries
        .into_iter()
        .filter(|e| seen.insert(e.payload.forecast_date))
        .collect();
    latest.sort_by_key(|e| e.payload.forecast_date);
    latest
}

/// Rows of the most recent fetch only
fn newest_batch<T>(mut entries: Vec<CacheEntry<T>>) -> Vec<CacheEntry<T>> {
    if let Some(newest) = entries.iter().map(|e| e.fetched_at).max() {
        entries.retain(|e| e.fetched_at == newest);
    }
    entries
}

/// Keep the first row per market and price date, preserving order
fn latest_per_market(entries: Vec<CacheEntry<MarketRecord>>) -> Vec<CacheEntry<MarketRecord>> {
    let mut seen: HashSet<(Option<String>, Option<String>, Option<String>, NaiveDate)> =
        HashSet::new();
    entries
        .into_iter()
        .filter(|e| {
            let p = &e.payload;
            seen.insert((
                p.state.clone(),
                p.district.clone(),
                p.market_name.clone(),
                p.price_date,
            ))
        })
        .collect()
}

/// Serves weather, soil, market and recommendation data.
///
/// Each lookup tries a fresh cache hit, then a live fetch (stored on
/// success), then the most recent expired rows. Nothing is invented: when
/// all three come up empty the result is `None`. While effectively offline
/// the live fetch is skipped.
///
/// Only invalid input is an error.
pub struct DataService<F> {
    cache: Arc<CacheManager>,
    fetcher: F,
    offline: Option<Arc<OfflineCoordinator>>,
}

impl<F: DataFetcher> DataService<F> {
    pub fn new(cache: Arc<CacheManager>, fetcher: F) -> Self {
        Self {
            cache,
            fetcher,
            offline: None,
        }
    }

    /// Skip live fetches whenever `offline` reports effective offline
    pub fn with_offline(mut self, offline: Arc<OfflineCoordinator>) -> Self {
        self.offline = Some(offline);
        self
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    async fn live<T, Fut>(&self, what: &str, fetch: Fut) -> Option<T>
    where
        Fut: Future<Output = Result<T, CoreError>>,
    {
        if self.offline.as_ref().is_some_and(|o| o.effective_offline()) {
            debug!("Offline, not fetching {}", what);
            return None;
        }

        match fetch.await {
            Ok(value) => Some(value),
            Err(e) if e.is_transient() => {
                warn!("Live fetch of {} failed, upstream unreachable: {}", what, e);
                None
            }
            Err(e) => {
                error!("Live fetch of {} failed: {}", what, e);
                None
            }
        }
    }

    /// Today's conditions at a location
    pub async fn current_weather(
        &self,
        latitude: f64,
        longitude: f64,
        force_refresh: bool,
    ) -> Result<Option<Fetched<WeatherRecord>>, CoreError> {
        let location = validate::location(latitude, longitude)?;
        let today = self.cache.now().date_naive();
        let today_key = WeatherKey::on(location, today);

        if !force_refresh {
            if let Some(entry) = self.cache.get::<WeatherRecord>(&today_key).await.into_iter().next() {
                info!("Using cached weather for {}", location);
                return Ok(Some(Fetched::from_entry(entry, DataSource::Cache)));
            }
        }

        let fetch = self.fetcher.current_weather(location);
        if let Some(record) = self.live("current weather", fetch).await {
            self.cache
                .put(&WeatherKey::new(location), std::slice::from_ref(&record))
                .await;
            return Ok(Some(Fetched {
                data: record,
                source: DataSource::Network,
                fetched_at: self.cache.now(),
            }));
        }

        let stale = match self.cache.get_stale::<WeatherRecord>(&today_key).await.into_iter().next() {
            Some(entry) => Some(entry),
            None => self
                .cache
                .get_stale::<WeatherRecord>(&WeatherKey::new(location))
                .await
                .into_iter()
                .next(),
        };
        if stale.is_some() {
            warn!("Using expired cached weather for {}", location);
        }
        Ok(stale.map(|entry| Fetched::from_entry(entry, DataSource::Stale)))
    }

    /// Daily forecast, one record per date, at most seven days.
    ///
    /// The cache serves only when it holds fresh rows for at least `days`
    /// distinct dates; a partial hit counts as a miss.
    pub async fn forecast(
        &self,
        latitude: f64,
        longitude: f64,
        days: u32,
        force_refresh: bool,
    ) -> Result<Option<Fetched<Vec<WeatherRecord>>>, CoreError> {
        let location = validate::location(latitude, longitude)?;
        let days = validate::forecast_days(days)?;
        let wanted = days as usize;
        let key = WeatherKey::new(location);

        if !force_refresh {
            let mut cached = latest_per_date(self.cache.get::<WeatherRecord>(&key).await);
            if cached.len() >= wanted {
                info!("Using cached forecast for {}", location);
                cached.truncate(wanted);
                return Ok(from_entries(cached, DataSource::Cache));
            }
            debug!(
                "Cached forecast for {} covers {} of {} days",
                location,
                cached.len(),
                days
            );
        }

        let fetch = self.fetcher.forecast(location, days);
        if let Some(records) = self.live("forecast", fetch).await {
            if !records.is_empty() {
                self.cache.put(&key, &records).await;
                return Ok(Some(Fetched {
                    data: records,
                    source: DataSource::Network,
                    fetched_at: self.cache.now(),
                }));
            }
        }

        let mut stale = latest_per_date(newest_batch(
            self.cache.get_stale::<WeatherRecord>(&key).await,
        ));
        stale.truncate(wanted);
        if !stale.is_empty() {
            warn!("Using expired cached forecast for {}", location);
        }
        Ok(from_entries(stale, DataSource::Stale))
    }

    /// Soil properties at a location
    pub async fn soil(
        &self,
        latitude: f64,
        longitude: f64,
        force_refresh: bool,
    ) -> Result<Option<Fetched<SoilRecord>>, CoreError> {
        let location = validate::location(latitude, longitude)?;

        if !force_refresh {
            if let Some(entry) = self.cache.get::<SoilRecord>(&location).await.into_iter().next() {
                info!("Using cached soil data for {}", location);
                return Ok(Some(Fetched::from_entry(entry, DataSource::Cache)));
            }
        }

        let fetch = self.fetcher.soil(location);
        if let Some(record) = self.live("soil data", fetch).await {
            self.cache.put(&location, std::slice::from_ref(&record)).await;
            return Ok(Some(Fetched {
                data: record,
                source: DataSource::Network,
                fetched_at: self.cache.now(),
            }));
        }

        let stale = self.cache.get_stale::<SoilRecord>(&location).await.into_iter().next();
        if stale.is_some() {
            warn!("Using expired cached soil data for {}", location);
        }
        Ok(stale.map(|entry| Fetched::from_entry(entry, DataSource::Stale)))
    }

    /// Latest mandi prices for a commodity, newest price date first
    pub async fn market_prices(
        &self,
        commodity: &str,
        state: Option<&str>,
        force_refresh: bool,
    ) -> Result<Option<Fetched<Vec<MarketRecord>>>, CoreError> {
        let commodity = validate::commodity(commodity)?;
        let state = validate::state(state);
        let key = MarketKey {
            commodity,
            state,
        };

        if !force_refresh {
            let cached = latest_per_market(self.cache.get::<MarketRecord>(&key).await);
            if !cached.is_empty() {
                info!("Using cached market prices for {}", key.commodity);
                return Ok(from_entries(cached, DataSource::Cache));
            }
        }

        let fetch = self
            .fetcher
            .market_prices(&key.commodity, key.state.as_deref());
        if let Some(mut records) = self.live("market prices", fetch).await {
            if !records.is_empty() {
                records.sort_by(|a, b| b.price_date.cmp(&a.price_date));
                self.cache.put(&key, &records).await;
                return Ok(Some(Fetched {
                    data: records,
                    source: DataSource::Network,
                    fetched_at: self.cache.now(),
                }));
            }
            debug!("No live market prices for {}", key.commodity);
        }

        let stale = latest_per_market(self.cache.get_stale::<MarketRecord>(&key).await);
        if !stale.is_empty() {
            warn!("Using expired cached market prices for {}", key.commodity);
        }
        Ok(from_entries(stale, DataSource::Stale))
    }

    /// Fresh cached recommendations, best rank first. With a field id only
    /// the most recently stored batch for that field is served.
    pub async fn recommendations(
        &self,
        field_id: Option<i64>,
    ) -> Option<Fetched<Vec<RecommendationRecord>>> {
        let mut cached = self
            .cache
            .get::<RecommendationRecord>(&RecommendationKey { field_id })
            .await;

        if field_id.is_some() {
            cached = newest_batch(cached);
        }
        from_entries(cached, DataSource::Cache)
    }

    /// Store recommendations produced elsewhere. Returns rows written.
    pub async fn store_recommendations(
        &self,
        field_id: Option<i64>,
        records: &[RecommendationRecord],
    ) -> Result<u64, CoreError> {
        if records.iter().any(|r| r.crop_name.trim().is_empty()) {
            return Err(CoreError::Validation("crop name is required".to_string()));
        }
        Ok(self
            .cache
            .put(&RecommendationKey { field_id }, records)
            .await)
    }
}
