//! Fixed-interval driver for the [`Monitor`].
//!
//! Ticks and escalation polls run one at a time on the same task, so a
//! slow tick delays the next one instead of overlapping it. Shutdown is
//! only observed between runs; an in-flight tick always completes.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::ingest::Monitor;

/// Drive the monitor until `shutdown` flips to `true` or its sender drops
pub async fn run(monitor: Arc<Monitor>, mut shutdown: watch::Receiver<bool>) {
    let config = monitor.config();
    let mut ticks = interval(config.tick_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut escalation_polls = interval(config.escalation_poll_interval);
    escalation_polls.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        tick_interval_secs = config.tick_interval.as_secs(),
        escalation_poll_secs = config.escalation_poll_interval.as_secs(),
        max_concurrent_vehicles = config.max_concurrent_vehicles,
        "Monitor started"
    );

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticks.tick() => {
                monitor.tick().await.log();
            }
            _ = escalation_polls.tick() => {
                let report = monitor.poll_escalations().await;
                if report.escalated > 0 || report.failures > 0 {
                    tracing::debug!(
                        escalated = report.escalated,
                        failures = report.failures,
                        "Escalation poll"
                    );
                }
            }
        }
    }

    tracing::info!("Monitor stopped");
}

/// Spawn [`run`] on the runtime
pub fn spawn(monitor: Arc<Monitor>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(run(monitor, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::MonitorConfig;
    use crate::notify::RecordingSink;
    use crate::source::QueueSource;
    use chrono::Utc;
    use fleet_domain::PositionSample;
    use fleet_persistence::{MemoryStore, Repositories, VehicleStatusRepository};
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_runs_ticks_until_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(QueueSource::new());
        let config = MonitorConfig {
            tick_interval: Duration::from_millis(10),
            escalation_poll_interval: Duration::from_millis(5),
            ..MonitorConfig::default()
        };
        let monitor = Arc::new(Monitor::new(
            config,
            Repositories::from_store(store.clone()),
            source.clone(),
            Arc::new(RecordingSink::new()),
            Arc::new(SystemClock),
        ));

        let org = Uuid::new_v4();
        source
            .push(PositionSample {
                vehicle_id: Uuid::new_v4(),
                organization_id: org,
                latitude: 10.0,
                longitude: 10.0,
                timestamp: Utc::now(),
                speed: None,
                heading: None,
            })
            .await;

        let (tx, rx) = watch::channel(false);
        let handle = spawn(monitor, rx);
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.list_snapshots(org).await.unwrap().len(), 1);
    }
}
