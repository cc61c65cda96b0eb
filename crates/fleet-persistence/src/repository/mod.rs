//! # Repository Module
//!
//! Repository traits and their backends.

pub mod cached;
pub mod memory_impl;
#[cfg(feature = "redis")]
pub mod redis_impl;
pub mod traits;

pub use cached::CachedZoneStateRepository;
pub use memory_impl::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_impl::RedisStore;
pub use traits::{
    AlertRepository, AlertRuleRepository, GeofenceEventRepository, GeofenceRepository,
    Repositories, VehicleStatusRepository, ZoneStateRepository,
};
