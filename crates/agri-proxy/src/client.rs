//! Shared upstream HTTP client

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ProxyError;
use crate::retry::RetryPolicy;

const USER_AGENT: &str = concat!("agri-cache/", env!("CARGO_PKG_VERSION"));

/// Upstream client configuration
#[derive(Clone, Debug)]
pub struct ApiClientConfig {
    /// Base URL every request path is joined onto
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
}

impl ApiClientConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// HTTP client with timeout and bounded retries
#[derive(Clone)]
pub struct ApiClient {
    config: ApiClientConfig,
    client: Client,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(config: ApiClientConfig) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        info!(
            "Created API client for {} (timeout {:?})",
            config.base_url, config.timeout
        );

        Ok(Self { config, client })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Join `path` onto the base URL
    pub fn url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// GET `path` and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProxyError> {
        let url = self.url(path);
        debug!("GET {}", url);

        let response = self
            .send_with_retry(|| self.client.get(&url).query(query))
            .await?;
        let response = check_status(response, &url).await?;

        response
            .json::<T>()
            .await
            .map_err(|e| ProxyError::InvalidResponse(e.to_string()))
    }

    /// Send a request with an optional JSON body, discarding the response body
    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<(), ProxyError> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let response = self
            .send_with_retry(|| {
                let request = self.client.request(method.clone(), &url);
                match body {
                    Some(body) => request.json(body),
                    None => request,
                }
            })
            .await?;
        check_status(response, &url).await?;

        Ok(())
    }

    /// Send a request, retrying retryable statuses, timeouts and connection
    /// errors according to the retry policy
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, ProxyError>
    where
        F: Fn() -> RequestBuilder,
    {
        let policy = &self.config.retry;
        let mut retry = 0;

        loop {
            let last = match build().send().await {
                Ok(response) if policy.should_retry_status(response.status()) => {
                    format!("status {}", response.status())
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() || e.is_connect() => e.to_string(),
                Err(e) => return Err(e.into()),
            };

            if retry >= policy.max_retries {
                return Err(ProxyError::RetriesExhausted {
                    attempts: retry + 1,
                    last,
                });
            }

            let delay = policy.delay_for(retry);
            warn!(
                "Request to {} failed ({}), retrying in {:?}",
                self.config.base_url, last, delay
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

/// Map non-success statuses onto proxy errors
async fn check_status(response: Response, url: &str) -> Result<Response, ProxyError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ProxyError::NotFound(url.to_string()));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ProxyError::Unauthorized);
    }

    Err(ProxyError::UpstreamError {
        status: status.as_u16(),
        message: response.text().await.unwrap_or_default(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub(crate) const UNAVAILABLE: &str =
        "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    pub(crate) const OK_JSON: &str = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 11\r\nconnection: close\r\n\r\n{\"ok\":true}";
    pub(crate) const NOT_FOUND: &str =
        "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";

    /// Serve one canned response per connection, in order
    pub(crate) async fn serve(responses: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);

                // Read the full request, body included, before answering
                let mut request = Vec::new();
                let mut buf = [0u8; 4096];
                loop {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                        let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
                        let body_len = head
                            .lines()
                            .find_map(|line| line.strip_prefix("content-length:"))
                            .and_then(|v| v.trim().parse::<usize>().ok())
                            .unwrap_or(0);
                        if request.len() >= end + 4 + body_len {
                            break;
                        }
                    }
                }

                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), hits)
    }

    fn client(base_url: &str, max_retries: u32) -> ApiClient {
        let retry = RetryPolicy {
            max_retries,
            backoff_factor: 0.0,
            ..RetryPolicy::default()
        };
        ApiClient::new(ApiClientConfig::new(base_url, Duration::from_secs(5)).with_retry(retry))
            .unwrap()
    }

    #[test]
    fn test_url_join() {
        let api = client("http://example.test/v1/", 0);
        assert_eq!(api.url("/current.json"), "http://example.test/v1/current.json");
        assert_eq!(api.url("forecast.json"), "http://example.test/v1/forecast.json");
        assert_eq!(api.url(""), "http://example.test/v1");
    }

    #[tokio::test]
    async fn test_retries_retryable_status_then_succeeds() {
        let (url, hits) = serve(vec![UNAVAILABLE, UNAVAILABLE, OK_JSON]).await;
        let api = client(&url, 3);

        let body: serde_json::Value = api.get_json("status", &[]).await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (url, hits) = serve(vec![UNAVAILABLE, UNAVAILABLE, UNAVAILABLE]).await;
        let api = client(&url, 1);

        let err = api
            .get_json::<serde_json::Value>("status", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::RetriesExhausted { attempts: 2, .. }));
        assert!(err.is_transient());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (url, hits) = serve(vec![NOT_FOUND, OK_JSON]).await;
        let api = client(&url, 3);

        let err = api
            .get_json::<serde_json::Value>("missing", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
