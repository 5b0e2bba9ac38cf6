//! Remote sync endpoint client

use reqwest::Method;
use std::time::Duration;
use tracing::debug;

use crate::client::{ApiClient, ApiClientConfig};
use crate::error::ProxyError;
use crate::retry::RetryPolicy;

pub const TIMEOUT: Duration = Duration::from_secs(30);

/// Pushes queued local mutations to a REST-style remote
///
/// `create → POST {base}/{entity_type}`, `update → PUT {base}/{entity_type}/{id}`,
/// `delete → DELETE {base}/{entity_type}/{id}`.
#[derive(Clone)]
pub struct SyncClient {
    api: ApiClient,
}

impl SyncClient {
    pub fn new(endpoint: &str, retry: RetryPolicy) -> Result<Self, ProxyError> {
        let api = ApiClient::new(ApiClientConfig::new(endpoint, TIMEOUT).with_retry(retry))?;
        Ok(Self { api })
    }

    pub fn endpoint(&self) -> &str {
        self.api.base_url()
    }

    pub async fn create(
        &self,
        entity_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), ProxyError> {
        debug!("Sync create {}", entity_type);
        self.api
            .send_json(Method::POST, &collection_path(entity_type)?, Some(payload))
            .await
    }

    pub async fn update(
        &self,
        entity_type: &str,
        entity_id: i64,
        payload: &serde_json::Value,
    ) -> Result<(), ProxyError> {
        debug!("Sync update {}/{}", entity_type, entity_id);
        self.api
            .send_json(Method::PUT, &item_path(entity_type, entity_id)?, Some(payload))
            .await
    }

    pub async fn delete(&self, entity_type: &str, entity_id: i64) -> Result<(), ProxyError> {
        debug!("Sync delete {}/{}", entity_type, entity_id);
        self.api
            .send_json(Method::DELETE, &item_path(entity_type, entity_id)?, None)
            .await
    }
}

fn collection_path(entity_type: &str) -> Result<String, ProxyError> {
    let valid = !entity_type.is_empty()
        && entity_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(ProxyError::InvalidResponse(format!(
            "entity type '{}' is not a valid path segment",
            entity_type
        )));
    }
    Ok(entity_type.to_string())
}

fn item_path(entity_type: &str, entity_id: i64) -> Result<String, ProxyError> {
    Ok(format!("{}/{}", collection_path(entity_type)?, entity_id))
}
