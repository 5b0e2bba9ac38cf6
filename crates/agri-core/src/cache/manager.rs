//! Expiry cache manager implementation

use agri_db::{CacheEntry, CacheKind, CacheTable, Database};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::policy::TtlPolicy;
use crate::clock::Clock;
use crate::sync::SyncQueue;

/// Keyed expiry cache over the four cache tables
///
/// Storage failures never reach callers: reads degrade to "no rows", writes
/// and sweeps to zero counts, and every such failure is logged.
pub struct CacheManager {
    db: Database,
    ttl: TtlPolicy,
    clock: Arc<dyn Clock>,
}

impl CacheManager {
    /// Create a new cache manager
    pub fn new(db: Database, ttl: TtlPolicy, clock: Arc<dyn Clock>) -> Self {
        info!(
            "Initializing cache manager (soil: {}h, weather: {}h, market: {}h, recommendation: {}h)",
            ttl.ttl(CacheKind::Soil).num_hours(),
            ttl.ttl(CacheKind::Weather).num_hours(),
            ttl.ttl(CacheKind::Market).num_hours(),
            ttl.ttl(CacheKind::Recommendation).num_hours()
        );

        Self { db, ttl, clock }
    }

    pub fn ttl(&self) -> &TtlPolicy {
        &self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fresh rows for `key` (`now < expires_at`). Never deletes anything.
    pub async fn get<T: CacheTable>(&self, key: &T::Key) -> Vec<CacheEntry<T>> {
        let now = self.clock.now();
        match T::select(&self.db, key, Some(now)).await {
            Ok(rows) => {
                debug!("Cache lookup {} {:?}: {} fresh rows", T::KIND, key, rows.len());
                rows
            }
            Err(e) => {
                warn!("Cache read failed for {} {:?}: {}", T::KIND, key, e);
                Vec::new()
            }
        }
    }

    /// Every row for `key` regardless of expiry, most recent first.
    /// Used when a live fetch fails.
    pub async fn get_stale<T: CacheTable>(&self, key: &T::Key) -> Vec<CacheEntry<T>> {
        match T::select(&self.db, key, None).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Stale cache read failed for {} {:?}: {}", T::KIND, key, e);
                Vec::new()
            }
        }
    }

    /// Append one row per record, all expiring at `now + TTL(kind)`.
    /// Returns the number of rows written.
    pub async fn put<T: CacheTable>(&self, key: &T::Key, records: &[T]) -> u64 {
        if records.is_empty() {
            return 0;
        }

        let fetched_at = self.clock.now();
        let expires_at = self.ttl.expires_at(T::KIND, fetched_at);

        match T::insert(&self.db, key, records, fetched_at, expires_at).await {
            Ok(written) => {
                debug!("Cached {} {} rows for {:?} until {}", written, T::KIND, key, expires_at);
                written
            }
            Err(e) => {
                warn!("Cache write failed for {} {:?}: {}", T::KIND, key, e);
                0
            }
        }
    }

    /// Delete rows of `kind` with `expires_at <= now`
    pub async fn sweep(&self, kind: CacheKind) -> u64 {
        let now = self.clock.now();
        match self.db.delete_expired(kind, now).await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!("Swept {} expired {} rows", deleted, kind);
                }
                deleted
            }
            Err(e) => {
                warn!("Sweep of {} cache failed: {}", kind, e);
                0
            }
        }
    }

    /// Sweep every kind in a fixed order
    pub async fn sweep_all(&self) -> BTreeMap<CacheKind, u64> {
        let mut swept = BTreeMap::new();
        for kind in CacheKind::ALL {
            swept.insert(kind, self.sweep(kind).await);
        }
        swept
    }

    /// Row counts per kind; empty if any count fails
    pub async fn stats(&self) -> BTreeMap<CacheKind, i64> {
        let mut stats = BTreeMap::new();
        for kind in CacheKind::ALL {
            match self.db.count_cache_rows(kind).await {
                Ok(count) => {
                    stats.insert(kind, count);
                }
                Err(e) => {
                    warn!("Failed to count {} cache rows: {}", kind, e);
                    return BTreeMap::new();
                }
            }
        }
        stats
    }
}

/// Spawn a background task that sweeps expired cache rows (and purges
/// completed sync items, when a queue is given) every `period` until `stop`
/// flips to true
pub fn spawn_sweep_task(
    cache: Arc<CacheManager>,
    queue: Option<Arc<SyncQueue>>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));
    info!("Starting background cache sweep task (interval: {:?})", period);

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip the first tick (which fires immediately)
        ticker.tick().await;

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            debug!("Running scheduled cache sweep");
            let swept: u64 = cache.sweep_all().await.values().sum();
            let purged = match &queue {
                Some(queue) => queue.purge_completed().await,
                None => 0,
            };
            if swept > 0 || purged > 0 {
                info!(
                    "Scheduled maintenance: {} expired rows swept, {} completed sync items purged",
                    swept, purged
                );
            }
        }

        info!("Cache sweep task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use agri_db::{Location, MarketKey, MarketRecord, WeatherKey, WeatherRecord};
    use chrono::{Duration as ChronoDuration, NaiveDate};

    struct Fixture {
        clock: Arc<ManualClock>,
        cache: CacheManager,
        db: Database,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = CacheManager::new(db.clone(), TtlPolicy::default(), clock.clone());
        Fixture { clock, cache, db }
    }

    fn delhi() -> WeatherKey {
        WeatherKey::new(Location {
            latitude: 28.6,
            longitude: 77.2,
        })
    }

    fn five_days() -> Vec<WeatherRecord> {
        (1..=5)
            .map(|d| WeatherRecord::for_date(NaiveDate::from_ymd_opt(2024, 6, d).unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_weather_ttl_scenario() {
        let f = fixture().await;
        let records = five_days();

        assert_eq!(f.cache.put(&delhi(), &records).await, 5);

        f.clock.advance(ChronoDuration::hours(1));
        let fresh = f.cache.get::<WeatherRecord>(&delhi()).await;
        let payloads: Vec<WeatherRecord> = fresh.into_iter().map(|e| e.payload).collect();
        assert_eq!(payloads, records);

        f.clock.advance(ChronoDuration::hours(6));
        assert!(f.cache.get::<WeatherRecord>(&delhi()).await.is_empty());
        assert_eq!(f.cache.get_stale::<WeatherRecord>(&delhi()).await.len(), 5);
    }

    #[tokio::test]
    async fn test_batch_shares_one_expiry() {
        let f = fixture().await;
        f.cache.put(&delhi(), &five_days()).await;

        let rows = f.cache.get::<WeatherRecord>(&delhi()).await;
        let expiry = rows[0].expires_at;
        assert!(rows.iter().all(|r| r.expires_at == expiry));
        assert!(rows.iter().all(|r| r.expires_at > r.fetched_at));
        assert_eq!(expiry - rows[0].fetched_at, ChronoDuration::hours(6));
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_a_miss() {
        let f = fixture().await;
        f.cache.put(&delhi(), &five_days()).await;

        f.clock.advance(ChronoDuration::hours(6));
        assert!(f.cache.get::<WeatherRecord>(&delhi()).await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_only_removes_expired_and_is_idempotent() {
        let f = fixture().await;
        f.cache.put(&delhi(), &five_days()).await;

        f.clock.advance(ChronoDuration::hours(5));
        let wheat = MarketKey {
            commodity: "Wheat".to_string(),
            state: None,
        };
        let price = MarketRecord {
            state: Some("Punjab".to_string()),
            district: None,
            market_name: None,
            price_per_quintal: 2275.0,
            price_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            price_change_percent: None,
            volume_traded: None,
            min_price: None,
            max_price: None,
            trend_30day_avg: None,
            trend_90day_avg: None,
        };
        f.cache.put(&wheat, &[price]).await;

        // Nothing has expired yet
        assert_eq!(f.cache.sweep(CacheKind::Weather).await, 0);

        f.clock.advance(ChronoDuration::hours(2));
        let swept = f.cache.sweep_all().await;
        assert_eq!(swept.get(&CacheKind::Weather), Some(&5));
        assert_eq!(swept.get(&CacheKind::Market), Some(&0));
        assert_eq!(f.cache.sweep(CacheKind::Weather).await, 0);

        let stats = f.cache.stats().await;
        assert_eq!(stats.get(&CacheKind::Weather), Some(&0));
        assert_eq!(stats.get(&CacheKind::Market), Some(&1));
        assert_eq!(stats.len(), 4);
    }

    #[tokio::test]
    async fn test_reads_do_not_delete() {
        let f = fixture().await;
        f.cache.put(&delhi(), &five_days()).await;
        f.clock.advance(ChronoDuration::days(1));

        assert!(f.cache.get::<WeatherRecord>(&delhi()).await.is_empty());
        assert_eq!(f.db.count_cache_rows(CacheKind::Weather).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_storage_failure_is_neutral() {
        let f = fixture().await;
        f.cache.put(&delhi(), &five_days()).await;
        f.db.close().await;

        assert!(f.cache.get::<WeatherRecord>(&delhi()).await.is_empty());
        assert!(f.cache.get_stale::<WeatherRecord>(&delhi()).await.is_empty());
        assert_eq!(f.cache.put(&delhi(), &five_days()).await, 0);
        assert_eq!(f.cache.sweep(CacheKind::Weather).await, 0);
        assert!(f.cache.stats().await.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_task_stops_on_signal() {
        let f = fixture().await;
        let cache = Arc::new(f.cache);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = spawn_sweep_task(cache, None, Duration::from_millis(10), stop_rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
