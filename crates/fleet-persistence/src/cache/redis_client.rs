//! # Redis Client
//!
//! Redis client wrapper with typed JSON operations. Serves both as the
//! membership cache and as the connection underneath [`crate::RedisStore`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{MembershipCache, membership_key};
use crate::error::Result;
use fleet_domain::VehicleZoneState;

/// Cache TTL configuration
#[derive(Debug, Clone, Copy)]
pub struct CacheTtl {
    pub membership: Duration,
    pub snapshot: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            membership: Duration::from_secs(60),
            snapshot: Duration::from_secs(24 * 3600),
        }
    }
}

/// Redis connection configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub url: String,
    pub ttl: CacheTtl,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            ttl: CacheTtl::default(),
        }
    }
}

/// Redis client over a multiplexed, auto-reconnecting connection
#[derive(Clone)]
pub struct CacheClient {
    conn: ConnectionManager,
    config: CacheConfig,
}

impl CacheClient {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Redis` if the URL is invalid or the
    /// connection cannot be established.
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self { conn, config })
    }

    pub const fn ttl(&self) -> CacheTtl {
        self.config.ttl
    }

    // =========================================================================
    // GENERIC OPERATIONS
    // =========================================================================

    /// Get a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Set a JSON value without expiry
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(value)?;
        let _: () = conn.set(key, json).await?;
        Ok(())
    }

    /// Set a JSON value with TTL
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(value)?;
        let _: () = conn.set_ex(key, json, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    /// Delete a key
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    /// Check if key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    // =========================================================================
    // HASH OPERATIONS
    // =========================================================================

    /// Set one JSON field of a hash
    pub async fn hset_json<T: Serialize>(&self, key: &str, field: &str, value: &T) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(value)?;
        let _: () = conn.hset(key, field, json).await?;
        Ok(())
    }

    /// Get one JSON field of a hash
    pub async fn hget_json<T: DeserializeOwned>(&self, key: &str, field: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// All JSON values of a hash; undecodable entries are skipped
    pub async fn hvals_json<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let mut conn = self.conn.clone();
        let values: Vec<String> = conn.hvals(key).await?;
        Ok(decode_all(key, values))
    }

    // =========================================================================
    // SET OPERATIONS
    // =========================================================================

    pub async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    pub async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(key, member).await?;
        Ok(removed > 0)
    }

    /// Set members parsed as UUIDs; malformed members are skipped
    pub async fn set_members_uuid(&self, key: &str) -> Result<Vec<Uuid>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members
            .into_iter()
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect())
    }

    // =========================================================================
    // LIST OPERATIONS
    // =========================================================================

    /// Push a JSON value at the head of a capped list
    pub async fn list_push_capped<T: Serialize>(&self, key: &str, value: &T, cap: usize) -> Result<()> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(value)?;
        let _: i64 = conn.lpush(key, json).await?;
        let stop = isize::try_from(cap).unwrap_or(isize::MAX).saturating_sub(1);
        let _: () = conn.ltrim(key, 0, stop).await?;
        Ok(())
    }

    /// First `limit` JSON values of a list
    pub async fn list_range_json<T: DeserializeOwned>(&self, key: &str, limit: usize) -> Result<Vec<T>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX).saturating_sub(1);
        let values: Vec<String> = conn.lrange(key, 0, stop).await?;
        Ok(decode_all(key, values))
    }
}

fn decode_all<T: DeserializeOwned>(key: &str, values: Vec<String>) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|json| match serde_json::from_str(&json) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key, error = %e, "Skipping undecodable Redis entry");
                None
            }
        })
        .collect()
}

#[async_trait]
impl MembershipCache for CacheClient {
    async fn get_membership(
        &self,
        vehicle_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<VehicleZoneState>> {
        self.get_json(&membership_key(organization_id, vehicle_id))
            .await
    }

    async fn put_membership(&self, state: &VehicleZoneState) -> Result<()> {
        let key = membership_key(state.organization_id, state.vehicle_id);
        self.set_json(&key, state, self.config.ttl.membership).await
    }

    async fn invalidate_membership(&self, vehicle_id: Uuid, organization_id: Uuid) -> Result<()> {
        self.delete(&membership_key(organization_id, vehicle_id))
            .await?;
        Ok(())
    }
}

/// Shared cache client wrapper
pub type SharedCacheClient = Arc<CacheClient>;

/// Create a shared cache client
pub fn shared_cache(client: CacheClient) -> SharedCacheClient {
    Arc::new(client)
}
