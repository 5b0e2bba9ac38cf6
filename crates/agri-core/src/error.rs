//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(#[from] agri_db::DbError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] agri_proxy::ProxyError),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Fetch failed: {0}")]
    FetchFailed(String),
}

impl CoreError {
    /// Network trouble that may clear up on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Proxy(e) if e.is_transient())
    }
}
