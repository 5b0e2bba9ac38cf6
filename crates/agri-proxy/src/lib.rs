//! Agri Cache Upstream Clients
//!
//! This crate provides the HTTP clients for the external data sources
//! (WeatherAPI.com, SoilGrids, Agmarknet) and for pushing queued local
//! mutations to a remote sync endpoint. All requests share one transport
//! with per-API timeouts and bounded retries.

pub mod client;
pub mod error;
pub mod market;
pub mod retry;
pub mod soil;
pub mod sync;
pub mod weather;

pub use client::{ApiClient, ApiClientConfig};
pub use error::ProxyError;
pub use market::{MarketClient, MarketQuote};
pub use retry::RetryPolicy;
pub use soil::{SoilClient, SoilProfile};
pub use sync::SyncClient;
pub use weather::{WeatherClient, WeatherReading};
