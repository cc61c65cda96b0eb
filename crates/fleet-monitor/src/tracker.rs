//! # Vehicle Zone-State Tracker
//!
//! Turns position samples into ENTER/EXIT transitions. Membership per
//! vehicle lives in the [`ZoneStateRepository`]; each sample is compared
//! against it geofence by geofence, and only flips produce events.
//!
//! The first sample ever seen for a vehicle sets its membership silently.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{MonitorError, Result, bounded};
use crate::locks::KeyedLocks;
use crate::registry::GeofenceRegistry;
use fleet_domain::{GeofenceEvent, GeofenceEventType, PositionSample, VehicleZoneState};
use fleet_persistence::{GeofenceEventRepository, ZoneStateRepository};

pub struct ZoneStateTracker {
    registry: GeofenceRegistry,
    zone_states: Arc<dyn ZoneStateRepository>,
    events: Arc<dyn GeofenceEventRepository>,
    locks: KeyedLocks<Uuid>,
    io_timeout: Duration,
}

impl ZoneStateTracker {
    pub fn new(
        registry: GeofenceRegistry,
        zone_states: Arc<dyn ZoneStateRepository>,
        events: Arc<dyn GeofenceEventRepository>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            zone_states,
            events,
            locks: KeyedLocks::new(),
            io_timeout,
        }
    }

    /// Process one sample and return the transitions it caused.
    ///
    /// Samples of the same vehicle are serialized. A transition whose event
    /// cannot be recorded is left out of the stored membership, so the next
    /// sample detects it again.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for out-of-range coordinates; persistence errors or
    /// timeouts when the membership or geofences cannot be loaded.
    pub async fn process_sample(&self, sample: &PositionSample) -> Result<Vec<GeofenceEvent>> {
        sample
            .validate()
            .map_err(|e| MonitorError::InvalidInput(e.to_string()))?;

        let _guard = self.locks.lock(&sample.vehicle_id).await;

        let previous = bounded(
            self.io_timeout,
            "get_membership",
            self.zone_states
                .get_membership(sample.vehicle_id, sample.organization_id),
        )
        .await?;

        if let Some(prev) = &previous {
            if sample.timestamp < prev.last_update {
                tracing::debug!(
                    vehicle_id = %sample.vehicle_id,
                    sample_at = %sample.timestamp,
                    last_update = %prev.last_update,
                    "Skipping stale sample"
                );
                return Ok(Vec::new());
            }
        }

        let geofences = self
            .registry
            .enabled_geofences(sample.organization_id)
            .await?;
        let point = sample.position();

        let mut membership = BTreeSet::new();
        let mut emitted = Vec::new();

        for geofence in &geofences {
            let id = geofence.geofence_id;
            let was_inside = previous.as_ref().is_some_and(|p| p.is_inside(id));

            if let Err(e) = geofence.geometry.validate() {
                tracing::warn!(geofence_id = %id, error = %e, "Skipping malformed geofence");
                if was_inside {
                    membership.insert(id);
                }
                continue;
            }

            let inside = geofence.contains(&point);

            // silent initial state
            if previous.is_none() || inside == was_inside {
                if inside {
                    membership.insert(id);
                }
                continue;
            }

            let event_type = if inside {
                GeofenceEventType::Enter
            } else {
                GeofenceEventType::Exit
            };
            let event = GeofenceEvent::from_sample(sample, id, event_type);

            match bounded(self.io_timeout, "create_event", self.events.create_event(&event)).await {
                Ok(()) => {
                    tracing::info!(
                        vehicle_id = %sample.vehicle_id,
                        geofence_id = %id,
                        geofence = %geofence.name,
                        event = event_type.as_str(),
                        "Zone transition"
                    );
                    if inside {
                        membership.insert(id);
                    }
                    emitted.push(event);
                }
                Err(e) => {
                    tracing::warn!(
                        vehicle_id = %sample.vehicle_id,
                        geofence_id = %id,
                        error = %e,
                        "Failed to record transition, retrying on next sample"
                    );
                    if was_inside {
                        membership.insert(id);
                    }
                }
            }
        }

        let state = VehicleZoneState::new(
            sample.vehicle_id,
            sample.organization_id,
            membership,
            sample.timestamp,
        );
        if let Err(e) = bounded(
            self.io_timeout,
            "set_membership",
            self.zone_states.set_membership(&state),
        )
        .await
        {
            // the recorded events stand; downstream dedup absorbs a repeat
            tracing::warn!(vehicle_id = %sample.vehicle_id, error = %e, "Failed to persist membership");
        }

        Ok(emitted)
    }

    /// Release per-vehicle lock entries nobody holds
    pub async fn prune_locks(&self) {
        self.locks.prune().await;
    }
}
