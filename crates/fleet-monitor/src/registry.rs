//! # Geofence Registry
//!
//! Read-through view of geofence definitions. The registry owns no state;
//! every call goes to the [`GeofenceRepository`] under the I/O deadline.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{Result, bounded};
use fleet_domain::Geofence;
use fleet_persistence::GeofenceRepository;

#[derive(Clone)]
pub struct GeofenceRegistry {
    repo: Arc<dyn GeofenceRepository>,
    io_timeout: Duration,
}

impl GeofenceRegistry {
    pub fn new(repo: Arc<dyn GeofenceRepository>, io_timeout: Duration) -> Self {
        Self { repo, io_timeout }
    }

    /// Enabled geofences of an organization
    pub async fn enabled_geofences(&self, organization_id: Uuid) -> Result<Vec<Geofence>> {
        let mut geofences = bounded(
            self.io_timeout,
            "enabled_geofences",
            self.repo.enabled_geofences(organization_id),
        )
        .await?;
        geofences.retain(|g| g.enabled && g.organization_id == organization_id);
        Ok(geofences)
    }

    /// Single geofence, enabled or not
    pub async fn geofence(&self, organization_id: Uuid, geofence_id: Uuid) -> Result<Option<Geofence>> {
        bounded(
            self.io_timeout,
            "get_geofence",
            self.repo.get_geofence(organization_id, geofence_id),
        )
        .await
    }
}
