//! Proxy error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream not found: {0}")]
    NotFound(String),

    #[error("Upstream unauthorized")]
    Unauthorized,

    #[error("Upstream returned error: {status} - {message}")]
    UpstreamError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Missing API key for {0}")]
    MissingApiKey(&'static str),
}

impl ProxyError {
    /// Transient failures the transport may retry
    pub fn is_transient(&self) -> bool {
        match self {
            ProxyError::Http(e) => e.is_timeout() || e.is_connect(),
            ProxyError::RetriesExhausted { .. } => true,
            _ => false,
        }
    }
}
