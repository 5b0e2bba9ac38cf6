//! Input validation
//!
//! Everything here runs before any store or network call.

use agri_db::{CacheKind, Location};

use crate::error::CoreError;

/// Longest forecast served
pub const MAX_FORECAST_DAYS: u32 = 7;
const MAX_NAME_LEN: usize = 100;

/// Check coordinates are finite and within WGS84 bounds
pub fn location(latitude: f64, longitude: f64) -> Result<Location, CoreError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(CoreError::Validation(format!(
            "latitude {} is outside [-90, 90]",
            latitude
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(CoreError::Validation(format!(
            "longitude {} is outside [-180, 180]",
            longitude
        )));
    }
    Ok(Location {
        latitude,
        longitude,
    })
}

/// Trimmed, non-empty commodity name
pub fn commodity(name: &str) -> Result<String, CoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("commodity name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::Validation("commodity name is too long".to_string()));
    }
    Ok(name.to_string())
}

/// Optional state filter; blank means no filter
pub fn state(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn cache_kind(kind: &str) -> Result<CacheKind, CoreError> {
    kind.parse()
        .map_err(|e: agri_db::ParseError| CoreError::Validation(e.to_string()))
}

/// Reject zero; clamp to the longest forecast served
pub fn forecast_days(days: u32) -> Result<u32, CoreError> {
    if days == 0 {
        return Err(CoreError::Validation(
            "forecast must cover at least one day".to_string(),
        ));
    }
    Ok(days.min(MAX_FORECAST_DAYS))
}

/// Entity types become URL path segments on the sync remote
pub fn entity_type(name: &str) -> Result<String, CoreError> {
    let name = name.trim();
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(CoreError::Validation(format!(
            "entity type '{}' must be non-empty ASCII letters, digits, '_' or '-'",
            name
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_bounds() {
        assert!(location(28.6, 77.2).is_ok());
        assert!(location(-90.0, 180.0).is_ok());
        assert!(matches!(location(90.1, 0.0), Err(CoreError::Validation(_))));
        assert!(location(0.0, -180.5).is_err());
        assert!(location(f64::NAN, 0.0).is_err());
        assert!(location(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_commodity_and_state() {
        assert_eq!(commodity("  Wheat ").unwrap(), "Wheat");
        assert!(commodity("   ").is_err());
        assert!(commodity(&"x".repeat(101)).is_err());

        assert_eq!(state(Some(" Punjab ")), Some("Punjab".to_string()));
        assert_eq!(state(Some("  ")), None);
        assert_eq!(state(None), None);
    }

    #[test]
    fn test_cache_kind_and_days() {
        assert_eq!(cache_kind("market").unwrap(), CacheKind::Market);
        assert!(matches!(cache_kind("pests"), Err(CoreError::Validation(_))));

        assert!(forecast_days(0).is_err());
        assert_eq!(forecast_days(3).unwrap(), 3);
        assert_eq!(forecast_days(14).unwrap(), 7);
    }

    #[test]
    fn test_entity_type() {
        assert_eq!(entity_type("crop_history").unwrap(), "crop_history");
        assert!(entity_type("").is_err());
        assert!(entity_type("fields/1").is_err());
    }
}
