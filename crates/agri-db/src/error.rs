//! Database error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database connection error: {0}")]
    Connection(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Payload serialization error: {0}")]
    Payload(#[from] serde_json::Error),
}
