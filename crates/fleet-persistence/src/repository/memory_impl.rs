//! In-memory repository implementation.
//!
//! Backs the simulator and the test suites. Every interface is served from
//! one `MemoryStore`, guarded by per-table `RwLock`s.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{PersistenceError, Result};
use crate::repository::traits::{
    AlertRepository, AlertRuleRepository, GeofenceEventRepository, GeofenceRepository,
    VehicleStatusRepository, ZoneStateRepository,
};
use fleet_domain::{
    Alert, AlertRule, AlertType, Geofence, GeofenceEvent, VehicleSnapshot, VehicleZoneState,
};

/// Process-local store implementing every repository trait
#[derive(Default)]
pub struct MemoryStore {
    geofences: RwLock<HashMap<Uuid, Geofence>>,
    zone_states: RwLock<HashMap<(Uuid, Uuid), VehicleZoneState>>,
    events: RwLock<Vec<GeofenceEvent>>,
    alerts: RwLock<HashMap<Uuid, Alert>>,
    rules: RwLock<HashMap<Uuid, AlertRule>>,
    snapshots: RwLock<HashMap<Uuid, VehicleSnapshot>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a geofence definition
    pub async fn insert_geofence(&self, geofence: Geofence) {
        self.geofences
            .write()
            .await
            .insert(geofence.geofence_id, geofence);
    }

    /// Create or replace an alert rule
    pub async fn insert_rule(&self, rule: AlertRule) {
        self.rules.write().await.insert(rule.rule_id, rule);
    }

    /// Every stored alert, oldest first
    pub async fn all_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.alerts.read().await.values().cloned().collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts
    }

    /// Every recorded transition in insertion order
    pub async fn all_events(&self) -> Vec<GeofenceEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl GeofenceRepository for MemoryStore {
    async fn enabled_geofences(&self, organization_id: Uuid) -> Result<Vec<Geofence>> {
        let mut geofences: Vec<Geofence> = self
            .geofences
            .read()
            .await
            .values()
            .filter(|g| g.organization_id == organization_id && g.enabled)
            .cloned()
            .collect();
        geofences.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(geofences)
    }

    async fn get_geofence(
        &self,
        organization_id: Uuid,
        geofence_id: Uuid,
    ) -> Result<Option<Geofence>> {
        Ok(self
            .geofences
            .read()
            .await
            .get(&geofence_id)
            .filter(|g| g.organization_id == organization_id)
            .cloned())
    }
}

#[async_trait]
impl ZoneStateRepository for MemoryStore {
    async fn get_membership(
        &self,
        vehicle_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<VehicleZoneState>> {
        Ok(self
            .zone_states
            .read()
            .await
            .get(&(organization_id, vehicle_id))
            .cloned())
    }

    async fn set_membership(&self, state: &VehicleZoneState) -> Result<()> {
        self.zone_states
            .write()
            .await
            .insert((state.organization_id, state.vehicle_id), state.clone());
        Ok(())
    }

    async fn list_zone_states(&self, organization_id: Uuid) -> Result<Vec<VehicleZoneState>> {
        Ok(self
            .zone_states
            .read()
            .await
            .values()
            .filter(|s| s.organization_id == organization_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl GeofenceEventRepository for MemoryStore {
    async fn create_event(&self, event: &GeofenceEvent) -> Result<()> {
        let mut events = self.events.write().await;
        if events.iter().any(|e| e.event_id == event.event_id) {
            return Err(PersistenceError::WriteConflict(format!(
                "event {} already recorded",
                event.event_id
            )));
        }
        events.push(event.clone());
        Ok(())
    }

    async fn latest_event(
        &self,
        vehicle_id: Uuid,
        geofence_id: Uuid,
    ) -> Result<Option<GeofenceEvent>> {
        Ok(self
            .events
            .read()
            .await
            .iter()
            .filter(|e| e.vehicle_id == vehicle_id && e.geofence_id == geofence_id)
            .max_by_key(|e| e.timestamp)
            .cloned())
    }

    async fn events_for_vehicle(
        &self,
        vehicle_id: Uuid,
        limit: usize,
    ) -> Result<Vec<GeofenceEvent>> {
        let mut events: Vec<GeofenceEvent> = self
            .events
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.vehicle_id == vehicle_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        Ok(events)
    }
}

#[async_trait]
impl AlertRepository for MemoryStore {
    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        if alerts.contains_key(&alert.alert_id) {
            return Err(PersistenceError::WriteConflict(format!(
                "alert {} already exists",
                alert.alert_id
            )));
        }
        alerts.insert(alert.alert_id, alert.clone());
        Ok(())
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>> {
        Ok(self.alerts.read().await.get(&alert_id).cloned())
    }

    async fn find_active_alert(
        &self,
        vehicle_id: Uuid,
        alert_type: AlertType,
    ) -> Result<Option<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.vehicle_id == vehicle_id && a.alert_type == alert_type && a.is_active())
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn find_recent_alert(
        &self,
        vehicle_id: Uuid,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| {
                a.vehicle_id == vehicle_id && a.alert_type == alert_type && a.created_at >= since
            })
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn update_alert(&self, alert: &Alert) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        match alerts.get_mut(&alert.alert_id) {
            Some(existing) => {
                *existing = alert.clone();
                Ok(())
            }
            None => Err(PersistenceError::not_found("Alert", alert.alert_id)),
        }
    }

    async fn list_active_alerts(&self, organization_id: Uuid, limit: usize) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.organization_id == organization_id && a.is_active())
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.created_at);
        alerts.truncate(limit);
        Ok(alerts)
    }
}

#[async_trait]
impl AlertRuleRepository for MemoryStore {
    async fn enabled_rules(&self, organization_id: Uuid) -> Result<Vec<AlertRule>> {
        let mut rules: Vec<AlertRule> = self
            .rules
            .read()
            .await
            .values()
            .filter(|r| r.organization_id == organization_id && r.enabled)
            .cloned()
            .collect();
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }
}

#[async_trait]
impl VehicleStatusRepository for MemoryStore {
    async fn upsert_snapshot(&self, snapshot: &VehicleSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        let stale = snapshots
            .get(&snapshot.vehicle_id)
            .is_some_and(|current| current.last_seen > snapshot.last_seen);
        if !stale {
            snapshots.insert(snapshot.vehicle_id, snapshot.clone());
        }
        Ok(())
    }

    async fn list_snapshots(&self, organization_id: Uuid) -> Result<Vec<VehicleSnapshot>> {
        Ok(self
            .snapshots
            .read()
            .await
            .values()
            .filter(|s| s.organization_id == organization_id)
            .cloned()
            .collect())
    }

    async fn list_organizations(&self) -> Result<Vec<Uuid>> {
        let orgs: BTreeSet<Uuid> = self
            .snapshots
            .read()
            .await
            .values()
            .map(|s| s.organization_id)
            .collect();
        Ok(orgs.into_iter().collect())
    }
}
