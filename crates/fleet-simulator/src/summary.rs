//! Run summary collected from the monitor's broadcast channels.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::{broadcast, watch};

use fleet_domain::{GeofenceEvent, GeofenceEventType};
use fleet_monitor::Notification;

/// What a simulation run produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    pub organizations: usize,
    pub vehicles: usize,
    pub enter_events: usize,
    pub exit_events: usize,
    /// Notifications per channel
    pub notifications: BTreeMap<String, usize>,
    /// Notifications per alert type
    pub alerts: BTreeMap<String, usize>,
    pub active_alerts: usize,
}

/// Counters fed from the event and notification streams
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamTally {
    pub enter_events: usize,
    pub exit_events: usize,
    pub notifications: BTreeMap<String, usize>,
    pub alerts: BTreeMap<String, usize>,
}

impl StreamTally {
    pub fn record_event(&mut self, event: &GeofenceEvent) {
        match event.event_type {
            GeofenceEventType::Enter => self.enter_events += 1,
            GeofenceEventType::Exit => self.exit_events += 1,
        }
    }

    pub fn record_notification(&mut self, notification: &Notification) {
        *self
            .notifications
            .entry(notification.channel.as_str().to_string())
            .or_default() += 1;
        *self
            .alerts
            .entry(notification.alert.alert_type.as_str().to_string())
            .or_default() += 1;
    }
}

/// Count events and notifications until `shutdown` flips or both streams close
pub async fn tally(
    mut events: broadcast::Receiver<GeofenceEvent>,
    mut notifications: broadcast::Receiver<Notification>,
    mut shutdown: watch::Receiver<bool>,
) -> StreamTally {
    let mut tally = StreamTally::default();
    let mut events_open = true;
    let mut notifications_open = true;

    while events_open || notifications_open {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            received = events.recv(), if events_open => match received {
                Ok(event) => tally.record_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event tally lagged");
                }
                Err(broadcast::error::RecvError::Closed) => events_open = false,
            },
            received = notifications.recv(), if notifications_open => match received {
                Ok(notification) => tally.record_notification(&notification),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notification tally lagged");
                }
                Err(broadcast::error::RecvError::Closed) => notifications_open = false,
            },
        }
    }

    tally
}

impl SimulationSummary {
    #[must_use]
    pub fn new(organizations: usize, vehicles: usize, tally: StreamTally, active_alerts: usize) -> Self {
        Self {
            organizations,
            vehicles,
            enter_events: tally.enter_events,
            exit_events: tally.exit_events,
            notifications: tally.notifications,
            alerts: tally.alerts,
            active_alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_domain::{Alert, AlertSeverity, AlertType, NotificationChannel, PositionSample};
    use uuid::Uuid;

    fn event(event_type: GeofenceEventType) -> GeofenceEvent {
        let sample = PositionSample {
            vehicle_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            latitude: 45.0,
            longitude: 7.0,
            timestamp: Utc::now(),
            speed: None,
            heading: None,
        };
        GeofenceEvent::from_sample(&sample, Uuid::new_v4(), event_type)
    }

    #[tokio::test]
    async fn test_tally_counts_until_streams_close() {
        let (event_tx, event_rx) = broadcast::channel(16);
        let (notify_tx, notify_rx) = broadcast::channel(16);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        event_tx.send(event(GeofenceEventType::Enter)).unwrap();
        event_tx.send(event(GeofenceEventType::Exit)).unwrap();
        event_tx.send(event(GeofenceEventType::Exit)).unwrap();

        let alert = Alert::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            AlertType::Speeding,
            AlertSeverity::Medium,
            None,
            "fast",
            Utc::now(),
        );
        notify_tx
            .send(Notification {
                channel: NotificationChannel::Push,
                alert,
                message: "fast".to_string(),
                recipients: Vec::new(),
            })
            .unwrap();

        drop(event_tx);
        drop(notify_tx);

        let tally = tally(event_rx, notify_rx, shutdown_rx).await;
        assert_eq!(tally.enter_events, 1);
        assert_eq!(tally.exit_events, 2);
        assert_eq!(tally.notifications.get("PUSH"), Some(&1));
        assert_eq!(tally.alerts.get("SPEEDING"), Some(&1));
    }

    #[tokio::test]
    async fn test_tally_stops_on_shutdown() {
        let (_event_tx, event_rx) = broadcast::channel::<GeofenceEvent>(4);
        let (_notify_tx, notify_rx) = broadcast::channel::<Notification>(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(tally(event_rx, notify_rx, shutdown_rx));
        shutdown_tx.send(true).unwrap();

        let tally = handle.await.unwrap();
        assert_eq!(tally, StreamTally::default());
    }
}
