//! # Fleet Persistence Library
//!
//! Storage layer for the fleet geofence monitor.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Monitoring Core                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Repository Traits                         │
//! │  (GeofenceRepository, ZoneStateRepository, AlertRepository)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              CachedZoneStateRepository (optional)            │
//! │           cache-first reads, write-around writes             │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                   │
//!                    ▼                   ▼
//! ┌─────────────────────────┐   ┌──────────────────────────────┐
//! │   Membership Cache      │   │  MemoryStore / RedisStore    │
//! │  (LocalCache / Redis)   │   │     (Source of Truth)        │
//! └─────────────────────────┘   └──────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - `redis`: Enable the Redis store and cache (default)

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod error;
pub mod repository;
pub mod strategy;

pub use cache::{LocalCache, MembershipCache};
#[cfg(feature = "redis")]
pub use cache::{CacheClient, CacheConfig, CacheTtl, SharedCacheClient};
pub use error::{PersistenceError, Result};
pub use repository::{
    AlertRepository, AlertRuleRepository, CachedZoneStateRepository, GeofenceEventRepository,
    GeofenceRepository, MemoryStore, Repositories, VehicleStatusRepository, ZoneStateRepository,
};
#[cfg(feature = "redis")]
pub use repository::RedisStore;
pub use strategy::{CacheSync, ReadStrategy, WriteStrategy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Connect to Redis and build a store over the shared connection
///
/// # Errors
///
/// Returns an error if the Redis connection fails.
#[cfg(feature = "redis")]
pub async fn connect_redis(config: CacheConfig) -> Result<(RedisStore, SharedCacheClient)> {
    let client = cache::shared_cache(CacheClient::new(config).await?);
    Ok((RedisStore::new(client.clone()), client))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
