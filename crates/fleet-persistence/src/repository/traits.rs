//! # Repository Traits
//!
//! Abstract persistence interfaces consumed by the monitoring core.
//! Implementations can be swapped for different backends (Redis, in-memory,
//! an external service, etc.)

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use fleet_domain::{
    Alert, AlertRule, AlertType, Geofence, GeofenceEvent, VehicleSnapshot, VehicleZoneState,
};

// =============================================================================
// GEOFENCE REPOSITORY
// =============================================================================

/// Read-only view of geofence definitions
#[async_trait]
pub trait GeofenceRepository: Send + Sync {
    /// Enabled geofences of an organization
    async fn enabled_geofences(&self, organization_id: Uuid) -> Result<Vec<Geofence>>;

    /// Single geofence by ID (enabled or not)
    async fn get_geofence(&self, organization_id: Uuid, geofence_id: Uuid)
    -> Result<Option<Geofence>>;
}

// =============================================================================
// ZONE STATE REPOSITORY
// =============================================================================

/// Per-vehicle geofence membership
#[async_trait]
pub trait ZoneStateRepository: Send + Sync {
    /// Current membership, `None` if the vehicle was never observed
    async fn get_membership(
        &self,
        vehicle_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<VehicleZoneState>>;

    /// Replace the membership row of a vehicle
    async fn set_membership(&self, state: &VehicleZoneState) -> Result<()>;

    /// All membership rows of an organization
    async fn list_zone_states(&self, organization_id: Uuid) -> Result<Vec<VehicleZoneState>>;
}

// =============================================================================
// GEOFENCE EVENT REPOSITORY
// =============================================================================

/// Append-only transition log
#[async_trait]
pub trait GeofenceEventRepository: Send + Sync {
    /// Record a transition
    async fn create_event(&self, event: &GeofenceEvent) -> Result<()>;

    /// Most recent transition of a vehicle for one geofence
    async fn latest_event(&self, vehicle_id: Uuid, geofence_id: Uuid)
    -> Result<Option<GeofenceEvent>>;

    /// Transitions of a vehicle, newest first
    async fn events_for_vehicle(&self, vehicle_id: Uuid, limit: usize)
    -> Result<Vec<GeofenceEvent>>;
}

// =============================================================================
// ALERT REPOSITORY
// =============================================================================

/// Alert storage
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Persist a new alert
    async fn create_alert(&self, alert: &Alert) -> Result<()>;

    /// Alert by ID
    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>>;

    /// The active alert of a vehicle for a type, if any
    async fn find_active_alert(&self, vehicle_id: Uuid, alert_type: AlertType)
    -> Result<Option<Alert>>;

    /// Newest alert of a vehicle for a type created at or after `since`,
    /// regardless of its state
    async fn find_recent_alert(
        &self,
        vehicle_id: Uuid,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>>;

    /// Overwrite an existing alert
    async fn update_alert(&self, alert: &Alert) -> Result<()>;

    /// Active alerts of an organization, oldest first
    async fn list_active_alerts(&self, organization_id: Uuid, limit: usize) -> Result<Vec<Alert>>;
}

// =============================================================================
// ALERT RULE REPOSITORY
// =============================================================================

/// Read-only view of alert rules
#[async_trait]
pub trait AlertRuleRepository: Send + Sync {
    /// Enabled rules of an organization
    async fn enabled_rules(&self, organization_id: Uuid) -> Result<Vec<AlertRule>>;
}

// =============================================================================
// VEHICLE STATUS REPOSITORY
// =============================================================================

/// Latest status per vehicle
#[async_trait]
pub trait VehicleStatusRepository: Send + Sync {
    /// Store the newest snapshot of a vehicle
    async fn upsert_snapshot(&self, snapshot: &VehicleSnapshot) -> Result<()>;

    /// Snapshots of every vehicle of an organization
    async fn list_snapshots(&self, organization_id: Uuid) -> Result<Vec<VehicleSnapshot>>;

    /// Organizations with at least one known vehicle
    async fn list_organizations(&self) -> Result<Vec<Uuid>>;
}

// =============================================================================
// REPOSITORY SET
// =============================================================================

/// Handles to every repository the monitoring core depends on
#[derive(Clone)]
pub struct Repositories {
    pub geofences: Arc<dyn GeofenceRepository>,
    pub zone_states: Arc<dyn ZoneStateRepository>,
    pub events: Arc<dyn GeofenceEventRepository>,
    pub alerts: Arc<dyn AlertRepository>,
    pub rules: Arc<dyn AlertRuleRepository>,
    pub vehicles: Arc<dyn VehicleStatusRepository>,
}

impl Repositories {
    /// Use one store for every interface
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: GeofenceRepository
            + ZoneStateRepository
            + GeofenceEventRepository
            + AlertRepository
            + AlertRuleRepository
            + VehicleStatusRepository
            + 'static,
    {
        Self {
            geofences: store.clone(),
            zone_states: store.clone(),
            events: store.clone(),
            alerts: store.clone(),
            rules: store.clone(),
            vehicles: store,
        }
    }

    /// Replace the zone-state repository (e.g. with a cached wrapper)
    #[must_use]
    pub fn with_zone_states(mut self, zone_states: Arc<dyn ZoneStateRepository>) -> Self {
        self.zone_states = zone_states;
        self
    }
}
