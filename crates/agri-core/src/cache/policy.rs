//! Time-to-live policy per cache kind

use agri_db::CacheKind;
use chrono::{DateTime, Duration, Utc};

use crate::config::CacheTtlConfig;
use crate::error::CoreError;

/// Longest TTL accepted for any kind
const MAX_TTL_DAYS: i64 = 3650;

/// Resolved TTL for each cache kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlPolicy {
    soil: Duration,
    weather: Duration,
    market: Duration,
    recommendation: Duration,
}

impl TtlPolicy {
    /// Build from configuration. Every TTL must be positive so that
    /// `expires_at > fetched_at` holds for every stored row, and at most ten
    /// years so the expiry stays representable.
    pub fn from_config(config: &CacheTtlConfig) -> Result<Self, CoreError> {
        let policy = Self {
            soil: Duration::days(i64::from(config.soil_days)),
            weather: Duration::hours(i64::from(config.weather_hours)),
            market: Duration::hours(i64::from(config.market_hours)),
            recommendation: Duration::days(i64::from(config.recommendation_days)),
        };

        for kind in CacheKind::ALL {
            if policy.ttl(kind) <= Duration::zero() {
                return Err(CoreError::Validation(format!("TTL for {} must be positive", kind)));
            }
            if policy.ttl(kind) > Duration::days(MAX_TTL_DAYS) {
                return Err(CoreError::Validation(format!(
                    "TTL for {} must not exceed {} days",
                    kind, MAX_TTL_DAYS
                )));
            }
        }
        Ok(policy)
    }

    pub fn ttl(&self, kind: CacheKind) -> Duration {
        match kind {
            CacheKind::Soil => self.soil,
            CacheKind::Weather => self.weather,
            CacheKind::Market => self.market,
            CacheKind::Recommendation => self.recommendation,
        }
    }

    /// Expiry for a batch fetched at `fetched_at`
    pub fn expires_at(&self, kind: CacheKind, fetched_at: DateTime<Utc>) -> DateTime<Utc> {
        fetched_at + self.ttl(kind)
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            soil: Duration::days(30),
            weather: Duration::hours(6),
            market: Duration::hours(24),
            recommendation: Duration::days(7),
        }
    }
}
