//! Agmarknet mandi price client (data.gov.in)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::{ApiClient, ApiClientConfig};
use crate::error::ProxyError;
use crate::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://api.data.gov.in/resource";
/// Daily mandi prices dataset
pub const RESOURCE_ID: &str = "9ef84268-d588-465a-a5c0-3fab19590f2d";
pub const TIMEOUT: Duration = Duration::from_secs(20);
const PAGE_LIMIT: u32 = 100;

/// One market's price for a commodity on a given day (Rs/quintal)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketQuote {
    pub state: Option<String>,
    pub district: Option<String>,
    pub market: Option<String>,
    pub modal_price: f64,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub arrival_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct ApiRecord {
    state: Option<String>,
    district: Option<String>,
    market: Option<String>,
    arrival_date: Option<String>,
    #[serde(default)]
    min_price: serde_json::Value,
    #[serde(default)]
    max_price: serde_json::Value,
    #[serde(default)]
    modal_price: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    #[serde(default)]
    records: Vec<ApiRecord>,
}

/// Client for daily commodity prices
#[derive(Clone)]
pub struct MarketClient {
    api: ApiClient,
    api_key: String,
}

impl MarketClient {
    pub fn new(base_url: &str, api_key: &str, retry: RetryPolicy) -> Result<Self, ProxyError> {
        if api_key.is_empty() {
            return Err(ProxyError::MissingApiKey("Agmarknet"));
        }
        let api = ApiClient::new(ApiClientConfig::new(base_url, TIMEOUT).with_retry(retry))?;
        Ok(Self {
            api,
            api_key: api_key.to_string(),
        })
    }

    /// Latest prices for `commodity`, optionally restricted to one state
    pub async fn prices(
        &self,
        commodity: &str,
        state: Option<&str>,
    ) -> Result<Vec<MarketQuote>, ProxyError> {
        debug!("Fetching market prices for {} ({:?})", commodity, state);

        let mut query = vec![
            ("api-key", self.api_key.clone()),
            ("format", "json".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
            ("filters[commodity]", commodity.to_string()),
        ];
        if let Some(state) = state {
            query.push(("filters[state]", state.to_string()));
        }

        let response: RecordsResponse = self.api.get_json(RESOURCE_ID, &query).await?;
        Ok(parse_records(response))
    }
}

/// Prices arrive as strings or numbers depending on the dataset revision
fn parse_price(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Arrival dates are `dd/mm/yyyy`
fn parse_arrival_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d"))
        .ok()
}

fn parse_records(response: RecordsResponse) -> Vec<MarketQuote> {
    let total = response.records.len();
    let quotes: Vec<MarketQuote> = response
        .records
        .into_iter()
        .filter_map(|record| {
            let modal_price = parse_price(&record.modal_price)?;
            let arrival_date = parse_arrival_date(record.arrival_date.as_deref()?)?;
            Some(MarketQuote {
                state: record.state,
                district: record.district,
                market: record.market,
                modal_price,
                min_price: parse_price(&record.min_price),
                max_price: parse_price(&record.max_price),
                arrival_date,
            })
        })
        .collect();

    if quotes.len() < total {
        warn!("Skipped {} malformed market records", total - quotes.len());
    }
    quotes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_records_accepts_string_and_numeric_prices() {
        let response: RecordsResponse = serde_json::from_value(json!({
            "records": [
                { "state": "Punjab", "district": "Ludhiana", "market": "Khanna",
                  "commodity": "Wheat", "arrival_date": "03/05/2024",
                  "min_price": "2100", "max_price": "2300", "modal_price": "2275" },
                { "state": "Haryana", "market": "Karnal", "arrival_date": "2024-05-02",
                  "modal_price": 2250.5 }
            ]
        }))
        .unwrap();

        let quotes = parse_records(response);
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].modal_price, 2275.0);
        assert_eq!(quotes[0].min_price, Some(2100.0));
        assert_eq!(quotes[0].arrival_date, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
        assert_eq!(quotes[1].modal_price, 2250.5);
        assert_eq!(quotes[1].max_price, None);
    }

    #[test]
    fn test_parse_records_skips_malformed() {
        let response: RecordsResponse = serde_json::from_value(json!({
            "records": [
                { "state": "Punjab", "arrival_date": "03/05/2024", "modal_price": "NR" },
                { "state": "Punjab", "modal_price": "2100" },
                { "state": "Punjab", "arrival_date": "04/05/2024", "modal_price": " 2150 " }
            ]
        }))
        .unwrap();

        let quotes = parse_records(response);
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].modal_price, 2150.0);
    }

    #[test]
    fn test_missing_api_key_is_rejected() {
        let result = MarketClient::new(DEFAULT_BASE_URL, "", RetryPolicy::default());
        assert!(matches!(result, Err(ProxyError::MissingApiKey(_))));
    }
}
