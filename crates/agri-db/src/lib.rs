//! Agri Cache Database Layer
//!
//! This crate provides the persistence layer for Agri Cache, using SQLite
//! via sqlx: the four expiry-cache tables, the offline sync queue, the
//! user settings singleton and the fields table.

pub mod error;
pub mod models;
pub mod repository;
pub mod utils;

pub use error::DbError;
pub use models::*;
pub use repository::{CacheTable, Database, SyncQueueStats};

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;
