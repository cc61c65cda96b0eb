//! # Ingestion Pipeline
//!
//! One [`Monitor::tick`] pulls the pending samples, keeps the newest per
//! vehicle, refreshes vehicle snapshots, runs the tracker for every vehicle
//! (bounded concurrency, serialized per vehicle), hands transitions to the
//! engine, sweeps every known organization and fires due escalations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{MonitorConfig, SettingsHandle};
use crate::engine::{AlertEngine, EscalationReport};
use crate::error::{Result, bounded};
use crate::notify::NotificationSink;
use crate::registry::GeofenceRegistry;
use crate::source::PositionSource;
use crate::tracker::ZoneStateTracker;
use fleet_domain::{Alert, GeofenceEvent, PositionSample, VehicleSnapshot};
use fleet_persistence::Repositories;

/// Summary of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Vehicles with a sample this tick
    pub samples: usize,
    pub rejected: usize,
    pub events: usize,
    pub alerts_created: usize,
    pub alerts_resolved: usize,
    pub escalated: usize,
    pub failures: usize,
    /// Monitoring disabled, nothing was done
    pub skipped: bool,
    pub duration_ms: u64,
}

impl TickReport {
    pub fn log(&self) {
        if self.skipped {
            tracing::debug!("Monitoring disabled, tick skipped");
            return;
        }
        tracing::info!(
            samples = self.samples,
            rejected = self.rejected,
            events = self.events,
            alerts_created = self.alerts_created,
            alerts_resolved = self.alerts_resolved,
            escalated = self.escalated,
            failures = self.failures,
            duration_ms = self.duration_ms,
            "Tick complete"
        );
    }
}

#[derive(Default)]
struct VehicleOutcome {
    rejected: bool,
    events: usize,
    alerts: usize,
    failures: usize,
}

/// The assembled monitoring pipeline
pub struct Monitor {
    config: MonitorConfig,
    settings: SettingsHandle,
    repos: Repositories,
    source: Arc<dyn PositionSource>,
    tracker: ZoneStateTracker,
    engine: AlertEngine,
    events_tx: broadcast::Sender<GeofenceEvent>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        repos: Repositories,
        source: Arc<dyn PositionSource>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let settings = SettingsHandle::new(config.settings.clone());
        let registry = GeofenceRegistry::new(repos.geofences.clone(), config.io_timeout);
        let tracker = ZoneStateTracker::new(
            registry,
            repos.zone_states.clone(),
            repos.events.clone(),
            config.io_timeout,
        );
        let engine = AlertEngine::new(&config, repos.clone(), sink, clock, settings.clone());
        let (events_tx, _) = broadcast::channel(config.event_channel_capacity);

        Self {
            config,
            settings,
            repos,
            source,
            tracker,
            engine,
            events_tx,
        }
    }

    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Runtime settings; changes apply from the next tick
    pub const fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    pub const fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    pub const fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Observe every recorded transition
    pub fn subscribe(&self) -> broadcast::Receiver<GeofenceEvent> {
        self.events_tx.subscribe()
    }

    /// Acknowledge an alert on behalf of an operator
    ///
    /// # Errors
    ///
    /// See [`AlertEngine::acknowledge`].
    pub async fn acknowledge(&self, alert_id: Uuid, user: &str) -> Result<Alert> {
        self.engine.acknowledge(alert_id, user).await
    }

    /// Run one full ingestion tick. Never fails; problems are counted in the
    /// report and retried on the next tick.
    pub async fn tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        if !self.settings.get().enabled {
            report.skipped = true;
            return report;
        }

        let samples = match bounded(
            self.config.io_timeout,
            "latest_samples",
            self.source.latest_samples(),
        )
        .await
        {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(error = %e, "Position source unavailable");
                report.failures += 1;
                Vec::new()
            }
        };

        let latest = newest_per_vehicle(samples);
        report.samples = latest.len();

        let outcomes: Vec<VehicleOutcome> = stream::iter(latest)
            .map(|sample| self.process_vehicle(sample))
            .buffer_unordered(self.config.max_concurrent_vehicles)
            .collect()
            .await;
        for outcome in outcomes {
            report.rejected += usize::from(outcome.rejected);
            report.events += outcome.events;
            report.alerts_created += outcome.alerts;
            report.failures += outcome.failures;
        }

        let organizations = match bounded(
            self.config.io_timeout,
            "list_organizations",
            self.repos.vehicles.list_organizations(),
        )
        .await
        {
            Ok(orgs) => orgs,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list organizations");
                report.failures += 1;
                Vec::new()
            }
        };
        for organization_id in organizations {
            let sweep = self.engine.sweep(organization_id).await;
            report.alerts_created += sweep.created;
            report.alerts_resolved += sweep.resolved;
            report.failures += sweep.failures;
        }

        let escalations = self.engine.fire_due_escalations().await;
        report.escalated = escalations.escalated;
        report.failures += escalations.failures;

        self.tracker.prune_locks().await;
        self.engine.prune_locks().await;

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        report
    }

    /// Fire due escalations between ticks
    pub async fn poll_escalations(&self) -> EscalationReport {
        if !self.settings.get().enabled {
            return EscalationReport::default();
        }
        self.engine.fire_due_escalations().await
    }

    async fn process_vehicle(&self, sample: PositionSample) -> VehicleOutcome {
        let mut outcome = VehicleOutcome::default();

        if let Err(e) = sample.validate() {
            tracing::warn!(vehicle_id = %sample.vehicle_id, error = %e, "Rejecting sample");
            outcome.rejected = true;
            return outcome;
        }

        if let Err(e) = bounded(
            self.config.io_timeout,
            "upsert_snapshot",
            self.repos
                .vehicles
                .upsert_snapshot(&VehicleSnapshot::from(&sample)),
        )
        .await
        {
            tracing::warn!(vehicle_id = %sample.vehicle_id, error = %e, "Failed to update vehicle snapshot");
            outcome.failures += 1;
        }

        let events = match self.tracker.process_sample(&sample).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(
                    vehicle_id = %sample.vehicle_id,
                    error = %e,
                    code = e.error_code(),
                    "Sample processing failed"
                );
                outcome.failures += 1;
                return outcome;
            }
        };

        for event in events {
            outcome.events += 1;
            // no subscribers is fine
            let _ = self.events_tx.send(event.clone());

            match self.engine.on_transition(&event).await {
                Ok(Some(_)) => outcome.alerts += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        vehicle_id = %event.vehicle_id,
                        geofence_id = %event.geofence_id,
                        error = %e,
                        "Alert evaluation failed"
                    );
                    outcome.failures += 1;
                }
            }
        }
        outcome
    }
}

/// Keep only the newest sample of each vehicle
pub fn newest_per_vehicle(samples: Vec<PositionSample>) -> Vec<PositionSample> {
    let mut newest: HashMap<Uuid, PositionSample> = HashMap::new();
    for sample in samples {
        match newest.get(&sample.vehicle_id) {
            Some(current) if current.timestamp >= sample.timestamp => {}
            _ => {
                newest.insert(sample.vehicle_id, sample);
            }
        }
    }
    let mut latest: Vec<PositionSample> = newest.into_values().collect();
    latest.sort_by_key(|s| s.vehicle_id);
    latest
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample(vehicle_id: Uuid, minutes: i64, lat: f64) -> PositionSample {
        PositionSample {
            vehicle_id,
            organization_id: Uuid::nil(),
            latitude: lat,
            longitude: 0.0,
            timestamp: Utc::now() + Duration::minutes(minutes),
            speed: None,
            heading: None,
        }
    }

    #[test]
    fn test_newest_per_vehicle() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let latest = newest_per_vehicle(vec![
            sample(a, 2, 2.0),
            sample(b, 0, 5.0),
            sample(a, 5, 3.0),
            sample(a, 1, 1.0),
        ]);

        assert_eq!(latest.len(), 2);
        let newest_a = latest.iter().find(|s| s.vehicle_id == a).unwrap();
        assert!((newest_a.latitude - 3.0).abs() < f64::EPSILON);
    }
}
