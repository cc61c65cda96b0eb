//! # Cache Module
//!
//! Optional read-through cache for vehicle membership. The store behind it
//! stays the single source of truth: entries are populated on read misses
//! and invalidated on every write, never written independently.

pub mod local;
#[cfg(feature = "redis")]
pub mod redis_client;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use fleet_domain::VehicleZoneState;

pub use local::LocalCache;
#[cfg(feature = "redis")]
pub use redis_client::{CacheClient, CacheConfig, CacheTtl, SharedCacheClient, shared_cache};

/// Cache backend for membership rows
#[async_trait]
pub trait MembershipCache: Send + Sync {
    async fn get_membership(
        &self,
        vehicle_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<VehicleZoneState>>;

    async fn put_membership(&self, state: &VehicleZoneState) -> Result<()>;

    async fn invalidate_membership(&self, vehicle_id: Uuid, organization_id: Uuid) -> Result<()>;
}

pub(crate) fn membership_key(organization_id: Uuid, vehicle_id: Uuid) -> String {
    format!("zone:membership:{organization_id}:{vehicle_id}")
}
