//! In-process membership cache with a fixed time-to-live.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{MembershipCache, membership_key};
use crate::error::Result;
use fleet_domain::VehicleZoneState;

struct Entry {
    state: VehicleZoneState,
    expires_at: Instant,
}

/// `HashMap`-backed cache, useful when no Redis is deployed
pub struct LocalCache {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
}

impl LocalCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl MembershipCache for LocalCache {
    async fn get_membership(
        &self,
        vehicle_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<VehicleZoneState>> {
        let key = membership_key(organization_id, vehicle_id);
        let entries = self.entries.read().await;
        Ok(entries
            .get(&key)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.state.clone()))
    }

    async fn put_membership(&self, state: &VehicleZoneState) -> Result<()> {
        let key = membership_key(state.organization_id, state.vehicle_id);
        self.entries.write().await.insert(
            key,
            Entry {
                state: state.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn invalidate_membership(&self, vehicle_id: Uuid, organization_id: Uuid) -> Result<()> {
        let key = membership_key(organization_id, vehicle_id);
        self.entries.write().await.remove(&key);
        Ok(())
    }
}
