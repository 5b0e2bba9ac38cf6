//! SoilGrids (ISRIC) client

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::client::{ApiClient, ApiClientConfig};
use crate::error::ProxyError;
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://rest.isric.org/soilgrids/v2.0";
pub const TIMEOUT: Duration = Duration::from_secs(30);

/// Topsoil depth interval queried
const DEPTH: &str = "0-5cm";
const PROPERTIES: [&str; 7] = ["phh2o", "soc", "nitrogen", "clay", "sand", "silt", "bdod"];

/// Topsoil properties at a point, in conventional units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoilProfile {
    pub ph_level: Option<f64>,
    /// g/kg
    pub organic_carbon: Option<f64>,
    /// mg/kg
    pub nitrogen_ppm: Option<f64>,
    pub clay_percent: Option<f64>,
    pub sand_percent: Option<f64>,
    pub silt_percent: Option<f64>,
    /// kg/dm³
    pub bulk_density: Option<f64>,
}

impl SoilProfile {
    /// USDA texture class from the clay/sand/silt split, when all three are known
    pub fn texture_class(&self) -> Option<&'static str> {
        let (clay, sand, silt) = (self.clay_percent?, self.sand_percent?, self.silt_percent?);
        let class = if clay >= 40.0 {
            "clay"
        } else if clay >= 27.0 && sand <= 45.0 {
            "clay loam"
        } else if sand >= 85.0 {
            "sand"
        } else if sand >= 70.0 {
            "loamy sand"
        } else if silt >= 80.0 {
            "silt"
        } else if silt >= 50.0 {
            "silt loam"
        } else if sand >= 52.0 {
            "sandy loam"
        } else {
            "loam"
        };
        Some(class)
    }
}

#[derive(Debug, Deserialize)]
struct UnitMeasure {
    d_factor: f64,
}

#[derive(Debug, Default, Deserialize)]
struct DepthValues {
    mean: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Depth {
    label: String,
    #[serde(default)]
    values: DepthValues,
}

#[derive(Debug, Deserialize)]
struct Layer {
    name: String,
    unit_measure: UnitMeasure,
    #[serde(default)]
    depths: Vec<Depth>,
}

#[derive(Debug, Deserialize)]
struct Properties {
    #[serde(default)]
    layers: Vec<Layer>,
}

#[derive(Debug, Deserialize)]
struct PropertiesResponse {
    properties: Properties,
}

/// Client for the SoilGrids point query
#[derive(Clone)]
pub struct SoilClient {
    api: ApiClient,
}

impl SoilClient {
    pub fn new(base_url: &str, retry: RetryPolicy) -> Result<Self, ProxyError> {
        let api = ApiClient::new(ApiClientConfig::new(base_url, TIMEOUT).with_retry(retry))?;
        Ok(Self { api })
    }

    /// Query topsoil properties at a point
    pub async fn properties(&self, latitude: f64, longitude: f64) -> Result<SoilProfile, ProxyError> {
        debug!("Fetching soil properties for ({}, {})", latitude, longitude);

        let mut query = vec![
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("depth", DEPTH.to_string()),
            ("value", "mean".to_string()),
        ];
        query.extend(PROPERTIES.iter().map(|p| ("property", p.to_string())));

        let response: PropertiesResponse = self.api.get_json("properties/query", &query).await?;
        parse_properties(response)
    }
}

fn parse_properties(response: PropertiesResponse) -> Result<SoilProfile, ProxyError> {
    let mut profile = SoilProfile::default();

    for layer in response.properties.layers {
        let Some(mean) = layer
            .depths
            .iter()
            .find(|d| d.label == DEPTH)
            .and_then(|d| d.values.mean)
        else {
            continue;
        };
        if layer.unit_measure.d_factor <= 0.0 {
            return Err(ProxyError::InvalidResponse(format!(
                "non-positive d_factor for {}",
                layer.name
            )));
        }
        let value = mean / layer.unit_measure.d_factor;

        match layer.name.as_str() {
            "phh2o" => profile.ph_level = Some(value),
            "soc" => profile.organic_carbon = Some(value),
            // g/kg after scaling
            "nitrogen" => profile.nitrogen_ppm = Some(value * 1000.0),
            "clay" => profile.clay_percent = Some(value),
            "sand" => profile.sand_percent = Some(value),
            "silt" => profile.silt_percent = Some(value),
            "bdod" => profile.bulk_density = Some(value),
            _ => {}
        }
    }

    if profile == SoilProfile::default() {
        return Err(ProxyError::InvalidResponse(
            "no soil properties at this location".to_string(),
        ));
    }
    Ok(profile)
}
