//! Cache-fronted zone-state repository.
//!
//! A key whose last write could not invalidate the cache is read from the
//! store until an invalidation succeeds.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cache::MembershipCache;
use crate::error::Result;
use crate::repository::traits::ZoneStateRepository;
use crate::strategy::{CacheSync, ReadStrategy, WriteStrategy};
use fleet_domain::VehicleZoneState;

type MembershipKey = (Uuid, Uuid);

/// Wraps a zone-state repository with a membership cache
pub struct CachedZoneStateRepository<R: ?Sized> {
    inner: Arc<R>,
    cache: Arc<dyn MembershipCache>,
    read: ReadStrategy,
    write: WriteStrategy,
    /// Keys written since their last confirmed invalidation
    unsettled: Mutex<HashSet<MembershipKey>>,
}

impl<R: ZoneStateRepository + ?Sized> CachedZoneStateRepository<R> {
    pub fn new(inner: Arc<R>, cache: Arc<dyn MembershipCache>) -> Self {
        Self {
            inner,
            cache,
            read: ReadStrategy::default(),
            write: WriteStrategy::default(),
            unsettled: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub const fn with_strategies(mut self, read: ReadStrategy, write: WriteStrategy) -> Self {
        self.read = read;
        self.write = write;
        self
    }

    /// Retry the invalidation of an unsettled key; true once the cache is trustworthy
    async fn settle(&self, vehicle_id: Uuid, organization_id: Uuid) -> bool {
        let key = (organization_id, vehicle_id);
        if !self.unsettled.lock().await.contains(&key) {
            return true;
        }

        match self
            .cache
            .invalidate_membership(vehicle_id, organization_id)
            .await
        {
            Ok(()) => {
                self.unsettled.lock().await.remove(&key);
                true
            }
            Err(e) => {
                tracing::debug!(
                    vehicle_id = %vehicle_id,
                    error = %e,
                    "Cache entry unsettled, reading the store"
                );
                false
            }
        }
    }
}

#[async_trait]
impl<R: ZoneStateRepository + ?Sized> ZoneStateRepository for CachedZoneStateRepository<R> {
    async fn get_membership(
        &self,
        vehicle_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<VehicleZoneState>> {
        if !self.settle(vehicle_id, organization_id).await {
            return self.inner.get_membership(vehicle_id, organization_id).await;
        }

        self.read
            .read(
                || self.cache.get_membership(vehicle_id, organization_id),
                || self.inner.get_membership(vehicle_id, organization_id),
                |state| async move { self.cache.put_membership(&state).await },
            )
            .await
    }

    async fn set_membership(&self, state: &VehicleZoneState) -> Result<()> {
        let key = (state.organization_id, state.vehicle_id);
        // marked before the store write so a dropped call stays unsettled
        self.unsettled.lock().await.insert(key);

        let sync = self
            .write
            .write(
                || self.inner.set_membership(state),
                || {
                    self.cache
                        .invalidate_membership(state.vehicle_id, state.organization_id)
                },
            )
            .await?;

        let mut unsettled = self.unsettled.lock().await;
        match sync {
            CacheSync::Invalidated => unsettled.remove(&key),
            CacheSync::Stale => unsettled.insert(key),
        };
        Ok(())
    }

    async fn list_zone_states(&self, organization_id: Uuid) -> Result<Vec<VehicleZoneState>> {
        self.inner.list_zone_states(organization_id).await
    }
}
