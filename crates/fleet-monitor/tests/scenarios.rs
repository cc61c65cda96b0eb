//! End-to-end scenarios driving the full pipeline with an in-memory store,
//! a virtual clock and a recording sink.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use fleet_domain::{
    AlertRule, AlertSeverity, AlertType, ConditionOperator, Coordinates, Geofence,
    GeofenceCategory, GeofenceEventType, GeofenceGeometry, NotificationChannel, PositionSample,
    RuleCondition,
};
use fleet_monitor::{Clock, ManualClock, Monitor, MonitorConfig, QueueSource, RecordingSink};
use fleet_persistence::{AlertRepository, MemoryStore, Repositories, ZoneStateRepository};

const BASE: Coordinates = Coordinates::new(45.07, 7.68);
const AWAY: Coordinates = Coordinates::new(45.12, 7.68);

struct Harness {
    store: Arc<MemoryStore>,
    source: Arc<QueueSource>,
    sink: Arc<RecordingSink>,
    clock: Arc<ManualClock>,
    monitor: Monitor,
    org: Uuid,
    vehicle: Uuid,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let source = Arc::new(QueueSource::new());
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        ));
        let monitor = Monitor::new(
            MonitorConfig::default(),
            Repositories::from_store(store.clone()),
            source.clone(),
            sink.clone(),
            clock.clone(),
        );
        Self {
            store,
            source,
            sink,
            clock,
            monitor,
            org: Uuid::new_v4(),
            vehicle: Uuid::new_v4(),
        }
    }

    async fn add_geofence(&self, name: &str, category: GeofenceCategory, geometry: GeofenceGeometry) -> Geofence {
        let geofence = Geofence::new(self.org, name, category, geometry);
        self.store.insert_geofence(geofence.clone()).await;
        geofence
    }

    async fn add_base(&self) -> Geofence {
        self.add_geofence(
            "Station 7",
            GeofenceCategory::Base,
            GeofenceGeometry::circle(BASE, 400.0),
        )
        .await
    }

    fn sample_at(&self, at: Coordinates, speed: Option<f64>) -> PositionSample {
        PositionSample {
            vehicle_id: self.vehicle,
            organization_id: self.org,
            latitude: at.latitude,
            longitude: at.longitude,
            timestamp: self.clock.now(),
            speed,
            heading: Some(180.0),
        }
    }

    /// Queue one sample at the current virtual time and run a tick
    async fn report(&self, at: Coordinates) -> fleet_monitor::TickReport {
        self.source.push(self.sample_at(at, None)).await;
        self.monitor.tick().await
    }

    async fn membership(&self) -> Vec<Uuid> {
        self.store
            .get_membership(self.vehicle, self.org)
            .await
            .unwrap()
            .map(|s| s.geofence_ids.into_iter().collect())
            .unwrap_or_default()
    }

    async fn alerts_of(&self, alert_type: AlertType) -> Vec<fleet_domain::Alert> {
        self.store
            .all_alerts()
            .await
            .into_iter()
            .filter(|a| a.alert_type == alert_type)
            .collect()
    }
}


fn square() -> GeofenceGeometry {
    GeofenceGeometry::Polygon {
        ring: vec![
            Coordinates::new(10.0, 20.0),
            Coordinates::new(10.0, 20.01),
            Coordinates::new(10.01, 20.01),
            Coordinates::new(10.01, 20.0),
        ],
    }
}

#[tokio::test]
async fn outside_inside_outside_emits_one_enter_then_one_exit() {
    let h = Harness::new();
    let zone = h
        .add_geofence("Depot", GeofenceCategory::Other, square())
        .await;
    let mut events = h.monitor.subscribe();

    let first = h.report(Coordinates::new(10.05, 20.05)).await;
    assert_eq!(first.events, 0);
    assert!(h.membership().await.is_empty());

    h.clock.advance(Duration::seconds(30));
    let entered = h.report(Coordinates::new(10.005, 20.005)).await;
    assert_eq!(entered.events, 1);
    assert_eq!(h.membership().await, vec![zone.geofence_id]);

    h.clock.advance(Duration::seconds(30));
    let left = h.report(Coordinates::new(10.05, 20.05)).await;
    assert_eq!(left.events, 1);
    assert!(h.membership().await.is_empty());

    let log = h.store.all_events().await;
    let kinds: Vec<_> = log.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, vec![GeofenceEventType::Enter, GeofenceEventType::Exit]);

    // observers see the same transitions
    assert_eq!(events.recv().await.unwrap().event_type, GeofenceEventType::Enter);
    assert_eq!(events.recv().await.unwrap().event_type, GeofenceEventType::Exit);
}

#[tokio::test]
async fn first_sample_inside_is_silent() {
    let h = Harness::new();
    let base = h.add_base().await;

    let report = h.report(BASE).await;
    assert_eq!(report.samples, 1);
    assert_eq!(report.events, 0);
    assert_eq!(h.membership().await, vec![base.geofence_id]);
    assert!(h.store.all_events().await.is_empty());
}

#[tokio::test]
async fn replayed_sample_emits_nothing() {
    let h = Harness::new();
    h.add_base().await;
    h.report(BASE).await;
    h.clock.advance(Duration::minutes(1));

    let exit = h.sample_at(AWAY, None);
    h.source.push(exit.clone()).await;
    assert_eq!(h.monitor.tick().await.events, 1);

    h.source.push(exit).await;
    assert_eq!(h.monitor.tick().await.events, 0);
    assert_eq!(h.store.all_events().await.len(), 1);
}

#[tokio::test]
async fn stale_sample_does_not_rewind_membership() {
    let h = Harness::new();
    let base = h.add_base().await;
    h.report(BASE).await;

    let mut old = h.sample_at(AWAY, None);
    old.timestamp -= Duration::minutes(10);
    h.source.push(old).await;

    assert_eq!(h.monitor.tick().await.events, 0);
    assert_eq!(h.membership().await, vec![base.geofence_id]);
}

#[tokio::test]
async fn repeated_ticks_never_duplicate_an_active_alert() {
    let h = Harness::new();
    h.store
        .insert_rule(
            AlertRule::new(h.org, "Speeding", AlertType::Speeding, AlertSeverity::Medium)
                .with_condition(RuleCondition::new("speed", ConditionOperator::Gt, 30.0)),
        )
        .await;

    for _ in 0..5 {
        h.source.push(h.sample_at(AWAY, Some(52.0))).await;
        h.monitor.tick().await;
        h.clock.advance(Duration::seconds(30));
    }

    let speeding = h.alerts_of(AlertType::Speeding).await;
    assert_eq!(speeding.len(), 1);
    assert!(speeding[0].is_active());
    assert_eq!(h.sink.for_alert(speeding[0].alert_id).await.len(), 1);

    // slowing down resolves it
    h.source.push(h.sample_at(AWAY, Some(20.0))).await;
    let report = h.monitor.tick().await;
    assert_eq!(report.alerts_resolved, 1);
}

#[tokio::test]
async fn exit_alert_is_raised_once_per_departure() {
    let h = Harness::new();
    h.add_base().await;
    h.store
        .insert_rule(AlertRule::new(h.org, "Left base", AlertType::Exit, AlertSeverity::Low))
        .await;

    h.report(BASE).await;
    h.clock.advance(Duration::minutes(1));
    let left = h.report(AWAY).await;
    assert_eq!(left.alerts_created, 1);

    for _ in 0..3 {
        h.clock.advance(Duration::minutes(1));
        assert_eq!(h.report(AWAY).await.alerts_created, 0);
    }
    assert_eq!(h.alerts_of(AlertType::Exit).await.len(), 1);
}

#[tokio::test]
async fn acknowledging_before_the_delay_prevents_escalation() {
    let h = Harness::new();
    h.add_base().await;
    let mut rule = AlertRule::new(h.org, "Left base", AlertType::Exit, AlertSeverity::High)
        .with_escalation(15);
    rule.channels = vec![NotificationChannel::Push];
    rule.recipients = vec!["dispatch".to_string()];
    h.store.insert_rule(rule).await;

    h.report(BASE).await;
    h.clock.advance(Duration::minutes(1));
    h.report(AWAY).await;

    let alert = h.alerts_of(AlertType::Exit).await.remove(0);
    h.clock.advance(Duration::minutes(5));
    let acked = h.monitor.acknowledge(alert.alert_id, "operator-1").await.unwrap();
    assert!(acked.acknowledged);

    h.clock.advance(Duration::minutes(30));
    assert_eq!(h.monitor.poll_escalations().await.escalated, 0);
    assert_eq!(h.monitor.tick().await.escalated, 0);

    let stored = h.store.get_alert(alert.alert_id).await.unwrap().unwrap();
    assert_eq!(stored.escalation_level, 0);
    assert_eq!(stored.acknowledged_by.as_deref(), Some("operator-1"));

    let sent = h.sink.for_alert(alert.alert_id).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, NotificationChannel::Push);
}

#[tokio::test]
async fn unacknowledged_alert_escalates_after_the_delay() {
    let h = Harness::new();
    h.add_base().await;
    h.store
        .insert_rule(
            AlertRule::new(h.org, "Left base", AlertType::Exit, AlertSeverity::High)
                .with_escalation(15),
        )
        .await;

    h.report(BASE).await;
    h.clock.advance(Duration::minutes(1));
    h.report(AWAY).await;

    h.clock.advance(Duration::minutes(16));
    assert_eq!(h.monitor.poll_escalations().await.escalated, 1);

    let alert = h.alerts_of(AlertType::Exit).await.remove(0);
    assert_eq!(alert.escalation_level, 1);
    assert_eq!(h.sink.for_alert(alert.alert_id).await.len(), 2);
}

#[tokio::test]
async fn long_stay_outside_alerts_once_within_the_dedup_window() {
    let h = Harness::new();
    h.add_base().await;

    h.report(BASE).await;
    h.clock.advance(Duration::minutes(1));
    h.report(AWAY).await;

    h.clock.advance(Duration::hours(4) - Duration::minutes(1));
    assert_eq!(h.report(AWAY).await.alerts_created, 0);

    h.clock.advance(Duration::minutes(2));
    let report = h.report(AWAY).await;
    assert_eq!(report.alerts_created, 1);

    let long_stays = h.alerts_of(AlertType::LongStayOutside).await;
    assert_eq!(long_stays.len(), 1);
    assert_eq!(long_stays[0].severity, AlertSeverity::Critical);

    // even once acknowledged, nothing new inside 24h
    tokio_test::assert_ok!(
        h.monitor
            .acknowledge(long_stays[0].alert_id, "operator-1")
            .await
    );
    h.clock.advance(Duration::hours(3));
    assert_eq!(h.report(AWAY).await.alerts_created, 0);
    assert_eq!(h.alerts_of(AlertType::LongStayOutside).await.len(), 1);
}

#[tokio::test]
async fn matching_rule_supplies_long_stay_severity() {
    let h = Harness::new();
    h.add_base().await;
    h.store
        .insert_rule(AlertRule::new(
            h.org,
            "Away too long",
            AlertType::LongStayOutside,
            AlertSeverity::Medium,
        ))
        .await;

    h.report(BASE).await;
    h.clock.advance(Duration::minutes(1));
    h.report(AWAY).await;
    h.clock.advance(Duration::hours(5));
    h.monitor.tick().await;

    let long_stays = h.alerts_of(AlertType::LongStayOutside).await;
    assert_eq!(long_stays[0].severity, AlertSeverity::Medium);
    assert!(long_stays[0].rule_id.is_some());
}

#[tokio::test]
async fn returning_home_auto_resolves_long_stay() {
    let h = Harness::new();
    h.add_base().await;

    h.report(BASE).await;
    h.clock.advance(Duration::minutes(1));
    h.report(AWAY).await;
    h.clock.advance(Duration::hours(5));
    assert_eq!(h.report(AWAY).await.alerts_created, 1);

    h.clock.advance(Duration::minutes(10));
    let report = h.report(BASE).await;
    assert_eq!(report.events, 1);
    assert_eq!(report.alerts_resolved, 1);

    let alert = h.alerts_of(AlertType::LongStayOutside).await.remove(0);
    assert!(alert.auto_resolved);
    assert_eq!(alert.resolved_at, Some(h.clock.now()));

    let sent = h.sink.for_alert(alert.alert_id).await;
    assert!(sent.last().unwrap().message.starts_with("Resolved"));
}

#[tokio::test]
async fn long_stay_threshold_follows_runtime_settings() {
    let h = Harness::new();
    h.add_base().await;
    h.monitor
        .settings()
        .update(|s| s.long_stay_outside_hours = 1);

    h.report(BASE).await;
    h.clock.advance(Duration::minutes(1));
    h.report(AWAY).await;
    h.clock.advance(Duration::minutes(61));

    assert_eq!(h.report(AWAY).await.alerts_created, 1);
}

#[tokio::test]
async fn long_stay_notification_can_be_silenced() {
    let h = Harness::new();
    h.add_base().await;
    h.monitor
        .settings()
        .update(|s| s.notify_on_long_stay = false);

    h.report(BASE).await;
    h.clock.advance(Duration::minutes(1));
    h.report(AWAY).await;
    h.clock.advance(Duration::hours(5));
    assert_eq!(h.report(AWAY).await.alerts_created, 1);

    assert!(h.sink.is_empty().await);
}

#[tokio::test]
async fn disabled_monitor_skips_ticks() {
    let h = Harness::new();
    h.add_base().await;
    h.monitor.settings().update(|s| s.enabled = false);

    let report = h.report(BASE).await;
    assert!(report.skipped);
    assert!(h.membership().await.is_empty());

    h.monitor.settings().update(|s| s.enabled = true);
    let report = h.monitor.tick().await;
    assert_eq!(report.samples, 1);
}

#[tokio::test]
async fn invalid_sample_is_rejected_without_side_effects() {
    let h = Harness::new();
    h.add_base().await;

    let report = h.report(Coordinates::new(123.0, 7.0)).await;
    assert_eq!(report.rejected, 1);
    assert!(h.store.get_membership(h.vehicle, h.org).await.unwrap().is_none());
}

#[tokio::test]
async fn long_stay_inside_hospital() {
    let h = Harness::new();
    let hospital = h
        .add_geofence(
            "General Hospital",
            GeofenceCategory::Hospital,
            GeofenceGeometry::rectangle(45.10, 7.60, 45.11, 7.61),
        )
        .await;
    let at_hospital = Coordinates::new(45.105, 7.605);

    h.report(AWAY).await;
    h.clock.advance(Duration::minutes(1));
    assert_eq!(h.report(at_hospital).await.events, 1);

    h.clock.advance(Duration::hours(2) + Duration::minutes(1));
    assert_eq!(h.report(at_hospital).await.alerts_created, 1);

    let alert = h.alerts_of(AlertType::LongStayInside).await.remove(0);
    assert_eq!(alert.geofence_id, Some(hospital.geofence_id));
    assert_eq!(alert.severity, AlertSeverity::High);
}
