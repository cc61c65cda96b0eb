//! Redis repository implementation.
//!
//! Key layout:
//!
//! | key | type | content |
//! |---|---|---|
//! | `geofences:{org}` | hash | geofence id → JSON |
//! | `rules:{org}` | hash | rule id → JSON |
//! | `zone:state:{org}:{vehicle}` | string | membership JSON |
//! | `zone:vehicles:{org}` | set | vehicle ids with membership |
//! | `events:{vehicle}` | list | transitions, newest first, capped |
//! | `event:last:{vehicle}:{geofence}` | string | latest transition JSON |
//! | `alert:{id}` | string | alert JSON |
//! | `alert:active:{vehicle}:{type}` | string | active alert id |
//! | `alert:recent:{vehicle}:{type}` | string | newest alert id |
//! | `alerts:active:{org}` | set | active alert ids |
//! | `snapshot:{vehicle}` | string | latest snapshot JSON |
//! | `snapshots:{org}` | set | vehicle ids with a snapshot |
//! | `organizations` | set | organization ids |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cache::SharedCacheClient;
use crate::error::{PersistenceError, Result};
use crate::repository::traits::{
    AlertRepository, AlertRuleRepository, GeofenceEventRepository, GeofenceRepository,
    VehicleStatusRepository, ZoneStateRepository,
};
use fleet_domain::{
    Alert, AlertRule, AlertType, Geofence, GeofenceEvent, VehicleSnapshot, VehicleZoneState,
};

/// Transitions retained per vehicle
const EVENT_HISTORY_CAP: usize = 1000;

/// Store backed by Redis
pub struct RedisStore {
    client: SharedCacheClient,
}

impl RedisStore {
    pub const fn new(client: SharedCacheClient) -> Self {
        Self { client }
    }

    /// Create or replace a geofence definition
    pub async fn put_geofence(&self, geofence: &Geofence) -> Result<()> {
        self.client
            .hset_json(
                &format!("geofences:{}", geofence.organization_id),
                &geofence.geofence_id.to_string(),
                geofence,
            )
            .await
    }

    /// Create or replace an alert rule
    pub async fn put_rule(&self, rule: &AlertRule) -> Result<()> {
        self.client
            .hset_json(
                &format!("rules:{}", rule.organization_id),
                &rule.rule_id.to_string(),
                rule,
            )
            .await
    }

    async fn alert_by_pointer(&self, pointer_key: &str) -> Result<Option<Alert>> {
        let Some(alert_id) = self.client.get_json::<Uuid>(pointer_key).await? else {
            return Ok(None);
        };
        self.get_alert(alert_id).await
    }

    /// Keep the active pointers and org index in line with alert state
    async fn index_alert(&self, alert: &Alert) -> Result<()> {
        let active_key = format!("alert:active:{}:{}", alert.vehicle_id, alert.alert_type);
        let org_key = format!("alerts:active:{}", alert.organization_id);
        let id = alert.alert_id.to_string();

        if alert.is_active() {
            self.client.put_json(&active_key, &alert.alert_id).await?;
            self.client.set_add(&org_key, &id).await?;
        } else {
            let current = self.client.get_json::<Uuid>(&active_key).await?;
            if current == Some(alert.alert_id) {
                self.client.delete(&active_key).await?;
            }
            self.client.set_remove(&org_key, &id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl GeofenceRepository for RedisStore {
    async fn enabled_geofences(&self, organization_id: Uuid) -> Result<Vec<Geofence>> {
        let mut geofences: Vec<Geofence> = self
            .client
            .hvals_json(&format!("geofences:{organization_id}"))
            .await?;
        geofences.retain(|g| g.enabled);
        geofences.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(geofences)
    }

    async fn get_geofence(
        &self,
        organization_id: Uuid,
        geofence_id: Uuid,
    ) -> Result<Option<Geofence>> {
        self.client
            .hget_json(
                &format!("geofences:{organization_id}"),
                &geofence_id.to_string(),
            )
            .await
    }
}

#[async_trait]
impl ZoneStateRepository for RedisStore {
    async fn get_membership(
        &self,
        vehicle_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Option<VehicleZoneState>> {
        self.client
            .get_json(&format!("zone:state:{organization_id}:{vehicle_id}"))
            .await
    }

    async fn set_membership(&self, state: &VehicleZoneState) -> Result<()> {
        self.client
            .put_json(
                &format!("zone:state:{}:{}", state.organization_id, state.vehicle_id),
                state,
            )
            .await?;
        self.client
            .set_add(
                &format!("zone:vehicles:{}", state.organization_id),
                &state.vehicle_id.to_string(),
            )
            .await?;
        Ok(())
    }

    async fn list_zone_states(&self, organization_id: Uuid) -> Result<Vec<VehicleZoneState>> {
        let vehicles = self
            .client
            .set_members_uuid(&format!("zone:vehicles:{organization_id}"))
            .await?;
        let mut states = Vec::with_capacity(vehicles.len());
        for vehicle_id in vehicles {
            if let Some(state) = self.get_membership(vehicle_id, organization_id).await? {
                states.push(state);
            }
        }
        Ok(states)
    }
}

#[async_trait]
impl GeofenceEventRepository for RedisStore {
    async fn create_event(&self, event: &GeofenceEvent) -> Result<()> {
        self.client
            .list_push_capped(&format!("events:{}", event.vehicle_id), event, EVENT_HISTORY_CAP)
            .await?;
        self.client
            .put_json(
                &format!("event:last:{}:{}", event.vehicle_id, event.geofence_id),
                event,
            )
            .await
    }

    async fn latest_event(
        &self,
        vehicle_id: Uuid,
        geofence_id: Uuid,
    ) -> Result<Option<GeofenceEvent>> {
        self.client
            .get_json(&format!("event:last:{vehicle_id}:{geofence_id}"))
            .await
    }

    async fn events_for_vehicle(
        &self,
        vehicle_id: Uuid,
        limit: usize,
    ) -> Result<Vec<GeofenceEvent>> {
        self.client
            .list_range_json(&format!("events:{vehicle_id}"), limit)
            .await
    }
}

#[async_trait]
impl AlertRepository for RedisStore {
    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        let key = format!("alert:{}", alert.alert_id);
        if self.client.exists(&key).await? {
            return Err(PersistenceError::WriteConflict(format!(
                "alert {} already exists",
                alert.alert_id
            )));
        }
        self.client.put_json(&key, alert).await?;
        self.client
            .put_json(
                &format!("alert:recent:{}:{}", alert.vehicle_id, alert.alert_type),
                &alert.alert_id,
            )
            .await?;
        self.index_alert(alert).await
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>> {
        self.client.get_json(&format!("alert:{alert_id}")).await
    }

    async fn find_active_alert(
        &self,
        vehicle_id: Uuid,
        alert_type: AlertType,
    ) -> Result<Option<Alert>> {
        let alert = self
            .alert_by_pointer(&format!("alert:active:{vehicle_id}:{alert_type}"))
            .await?;
        Ok(alert.filter(Alert::is_active))
    }

    async fn find_recent_alert(
        &self,
        vehicle_id: Uuid,
        alert_type: AlertType,
        since: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let alert = self
            .alert_by_pointer(&format!("alert:recent:{vehicle_id}:{alert_type}"))
            .await?;
        Ok(alert.filter(|a| a.created_at >= since))
    }

    async fn update_alert(&self, alert: &Alert) -> Result<()> {
        let key = format!("alert:{}", alert.alert_id);
        if !self.client.exists(&key).await? {
            return Err(PersistenceError::not_found("Alert", alert.alert_id));
        }
        self.client.put_json(&key, alert).await?;
        self.index_alert(alert).await
    }

    async fn list_active_alerts(&self, organization_id: Uuid, limit: usize) -> Result<Vec<Alert>> {
        let ids = self
            .client
            .set_members_uuid(&format!("alerts:active:{organization_id}"))
            .await?;
        let mut alerts = Vec::with_capacity(ids.len());
        for alert_id in ids {
            if let Some(alert) = self.get_alert(alert_id).await? {
                if alert.is_active() {
                    alerts.push(alert);
                }
            }
        }
        alerts.sort_by_key(|a| a.created_at);
        alerts.truncate(limit);
        Ok(alerts)
    }
}

#[async_trait]
impl AlertRuleRepository for RedisStore {
    async fn enabled_rules(&self, organization_id: Uuid) -> Result<Vec<AlertRule>> {
        let mut rules: Vec<AlertRule> = self
            .client
            .hvals_json(&format!("rules:{organization_id}"))
            .await?;
        rules.retain(|r| r.enabled);
        rules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rules)
    }
}

#[async_trait]
impl VehicleStatusRepository for RedisStore {
    async fn upsert_snapshot(&self, snapshot: &VehicleSnapshot) -> Result<()> {
        let key = format!("snapshot:{}", snapshot.vehicle_id);
        let current: Option<VehicleSnapshot> = self.client.get_json(&key).await?;
        if current.is_some_and(|c| c.last_seen > snapshot.last_seen) {
            return Ok(());
        }
        self.client
            .set_json(&key, snapshot, self.client.ttl().snapshot)
            .await?;
        self.client
            .set_add(
                &format!("snapshots:{}", snapshot.organization_id),
                &snapshot.vehicle_id.to_string(),
            )
            .await?;
        self.client
            .set_add("organizations", &snapshot.organization_id.to_string())
            .await?;
        Ok(())
    }

    async fn list_snapshots(&self, organization_id: Uuid) -> Result<Vec<VehicleSnapshot>> {
        let vehicles = self
            .client
            .set_members_uuid(&format!("snapshots:{organization_id}"))
            .await?;
        let mut snapshots = Vec::with_capacity(vehicles.len());
        for vehicle_id in vehicles {
            match self
                .client
                .get_json::<VehicleSnapshot>(&format!("snapshot:{vehicle_id}"))
                .await?
            {
                Some(snapshot) => snapshots.push(snapshot),
                // expired: drop from the index
                None => {
                    self.client
                        .set_remove(
                            &format!("snapshots:{organization_id}"),
                            &vehicle_id.to_string(),
                        )
                        .await?;
                }
            }
        }
        Ok(snapshots)
    }

    async fn list_organizations(&self) -> Result<Vec<Uuid>> {
        self.client.set_members_uuid("organizations").await
    }
}
