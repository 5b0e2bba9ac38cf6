//! Expiry cache module

mod manager;
mod policy;

pub use manager::{CacheManager, spawn_sweep_task};
pub use policy::TtlPolicy;
