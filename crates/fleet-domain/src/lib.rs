//! # Fleet Geofence Monitoring - Domain Model
//!
//! Core domain entities, value objects, and enums for emergency vehicle
//! geofence monitoring. These types are shared by every layer: persistence,
//! tracking, alerting, and simulation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod geometry;
pub mod rules;

pub use geometry::{GeofenceGeometry, GeofenceShape, EARTH_RADIUS_M, haversine_distance_m, inside};
pub use rules::{ConditionOperator, FieldValue, RuleCondition, RuleContext};

// =============================================================================
// VALUE OBJECTS
// =============================================================================

/// Geographic coordinates in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Finite and within ±90 latitude / ±180 longitude
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance to another point in meters (Haversine formula)
    #[must_use]
    pub fn distance_to_m(&self, other: &Self) -> f64 {
        haversine_distance_m(self, other)
    }
}

// =============================================================================
// ENUMS
// =============================================================================

/// Travel context a geofence applies to (informational)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeofenceMode {
    Emergency,
    Routine,
    #[default]
    Any,
}

impl GeofenceMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Emergency => "EMERGENCY",
            Self::Routine => "ROUTINE",
            Self::Any => "ANY",
        }
    }
}

/// What the region represents for the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeofenceCategory {
    /// Home base / park of the vehicle
    Base,
    Hospital,
    Station,
    #[default]
    Other,
}

impl GeofenceCategory {
    #[must_use]
    pub const fn is_home(self) -> bool {
        matches!(self, Self::Base)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Base => "BASE",
            Self::Hospital => "HOSPITAL",
            Self::Station => "STATION",
            Self::Other => "OTHER",
        }
    }
}

/// Zone transition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeofenceEventType {
    Enter,
    Exit,
}

impl GeofenceEventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "ENTER",
            Self::Exit => "EXIT",
        }
    }
}

/// Alert types raised by the rule engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Entry,
    Exit,
    LongStayOutside,
    LongStayInside,
    Speeding,
    Offline,
}

impl AlertType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "ENTRY",
            Self::Exit => "EXIT",
            Self::LongStayOutside => "LONG_STAY_OUTSIDE",
            Self::LongStayInside => "LONG_STAY_INSIDE",
            Self::Speeding => "SPEEDING",
            Self::Offline => "OFFLINE",
        }
    }

    /// Alert type raised by a zone transition
    #[must_use]
    pub const fn from_transition(event_type: GeofenceEventType) -> Self {
        match event_type {
            GeofenceEventType::Enter => Self::Entry,
            GeofenceEventType::Exit => Self::Exit,
        }
    }

    #[must_use]
    pub const fn is_long_stay(self) -> bool {
        matches!(self, Self::LongStayOutside | Self::LongStayInside)
    }

    /// Types evaluated against vehicle snapshots on every sweep
    #[must_use]
    pub const fn is_snapshot_based(self) -> bool {
        matches!(self, Self::Speeding | Self::Offline)
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity levels, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Delivery channel handed to the notification sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationChannel {
    Log,
    Email,
    Sms,
    Push,
    Webhook,
}

impl NotificationChannel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Log => "LOG",
            Self::Email => "EMAIL",
            Self::Sms => "SMS",
            Self::Push => "PUSH",
            Self::Webhook => "WEBHOOK",
        }
    }
}

// =============================================================================
// ENTITY TYPES
// =============================================================================

/// Geofence entity - named region attached to a base or park
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub geofence_id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub mode: GeofenceMode,
    pub category: GeofenceCategory,
    pub enabled: bool,
    pub geometry: GeofenceGeometry,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Geofence {
    pub fn new(
        organization_id: Uuid,
        name: impl Into<String>,
        category: GeofenceCategory,
        geometry: GeofenceGeometry,
    ) -> Self {
        let now = Utc::now();
        Self {
            geofence_id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            mode: GeofenceMode::default(),
            category,
            enabled: true,
            geometry,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub const fn shape(&self) -> GeofenceShape {
        self.geometry.shape()
    }

    /// Containment test; malformed geometry is never inside
    #[must_use]
    pub fn contains(&self, point: &Coordinates) -> bool {
        inside(&self.geometry, point)
    }
}

/// Set of geofences a vehicle currently occupies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleZoneState {
    pub vehicle_id: Uuid,
    pub organization_id: Uuid,
    pub geofence_ids: BTreeSet<Uuid>,
    pub last_update: DateTime<Utc>,
}

impl VehicleZoneState {
    pub const fn new(
        vehicle_id: Uuid,
        organization_id: Uuid,
        geofence_ids: BTreeSet<Uuid>,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self {
            vehicle_id,
            organization_id,
            geofence_ids,
            last_update,
        }
    }

    #[must_use]
    pub fn is_inside(&self, geofence_id: Uuid) -> bool {
        self.geofence_ids.contains(&geofence_id)
    }
}

/// Immutable record of a zone transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceEvent {
    pub event_id: Uuid,
    pub geofence_id: Uuid,
    pub vehicle_id: Uuid,
    pub organization_id: Uuid,
    pub event_type: GeofenceEventType,
    pub timestamp: DateTime<Utc>,
    pub position: Coordinates,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

impl GeofenceEvent {
    /// Build the transition event for a sample crossing a geofence boundary
    #[must_use]
    pub fn from_sample(
        sample: &PositionSample,
        geofence_id: Uuid,
        event_type: GeofenceEventType,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            geofence_id,
            vehicle_id: sample.vehicle_id,
            organization_id: sample.organization_id,
            event_type,
            timestamp: sample.timestamp,
            position: sample.position(),
            speed: sample.speed,
            heading: sample.heading,
        }
    }
}

/// Periodic position report for one vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub vehicle_id: Uuid,
    pub organization_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

impl PositionSample {
    #[must_use]
    pub const fn position(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// Validate coordinates before the sample reaches the tracker
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidCoordinates` for non-finite or
    /// out-of-range positions.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.position().is_valid() {
            Ok(())
        } else {
            Err(DomainError::InvalidCoordinates {
                lat: self.latitude,
                lon: self.longitude,
            })
        }
    }
}

/// Latest known status of a vehicle, input of snapshot rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub vehicle_id: Uuid,
    pub organization_id: Uuid,
    pub position: Coordinates,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub last_seen: DateTime<Utc>,
}

impl From<&PositionSample> for VehicleSnapshot {
    fn from(sample: &PositionSample) -> Self {
        Self {
            vehicle_id: sample.vehicle_id,
            organization_id: sample.organization_id,
            position: sample.position(),
            speed: sample.speed,
            heading: sample.heading,
            last_seen: sample.timestamp,
        }
    }
}

/// Operator-facing alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: Uuid,
    pub organization_id: Uuid,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub vehicle_id: Uuid,
    pub geofence_id: Option<Uuid>,
    pub rule_id: Option<Uuid>,
    pub message: String,

    // Escalation
    pub escalation_level: u32,

    // Acknowledgement
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,

    // Auto-resolution
    pub auto_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Alert {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        organization_id: Uuid,
        vehicle_id: Uuid,
        geofence_id: Option<Uuid>,
        alert_type: AlertType,
        severity: AlertSeverity,
        rule_id: Option<Uuid>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id: Uuid::now_v7(),
            organization_id,
            alert_type,
            severity,
            vehicle_id,
            geofence_id,
            rule_id,
            message: message.into(),
            escalation_level: 0,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            auto_resolved: false,
            resolved_at: None,
            created_at,
        }
    }

    /// Unacknowledged and not auto-resolved
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.acknowledged && !self.auto_resolved
    }

    #[must_use]
    pub const fn key(&self) -> AlertKey {
        AlertKey::new(self.vehicle_id, self.alert_type)
    }

    pub fn acknowledge(&mut self, user: impl Into<String>, at: DateTime<Utc>) {
        self.acknowledged = true;
        self.acknowledged_by = Some(user.into());
        self.acknowledged_at = Some(at);
    }

    pub fn resolve(&mut self, at: DateTime<Utc>) {
        self.auto_resolved = true;
        self.resolved_at = Some(at);
    }
}

/// Deduplication key: one active alert per vehicle and type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertKey {
    pub vehicle_id: Uuid,
    pub alert_type: AlertType,
}

impl AlertKey {
    #[must_use]
    pub const fn new(vehicle_id: Uuid, alert_type: AlertType) -> Self {
        Self {
            vehicle_id,
            alert_type,
        }
    }
}

// =============================================================================
// RULES & ESCALATION
// =============================================================================

/// One step of an escalation policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationLevel {
    /// Minutes after the previous level (or alert creation for level 1)
    pub delay_minutes: u32,
    pub channels: Vec<NotificationChannel>,
    pub recipients: Vec<String>,
}

/// Ordered escalation levels, walked until acknowledged, resolved or exhausted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    pub levels: Vec<EscalationLevel>,
}

impl EscalationPolicy {
    /// Level by 1-based ordinal
    #[must_use]
    pub fn level(&self, ordinal: u32) -> Option<&EscalationLevel> {
        let index = usize::try_from(ordinal).ok()?.checked_sub(1)?;
        self.levels.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Declarative alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub rule_id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub alert_type: AlertType,
    pub conditions: Vec<RuleCondition>,
    pub severity: AlertSeverity,
    pub auto_escalate: bool,
    pub escalate_after_minutes: u32,
    pub channels: Vec<NotificationChannel>,
    pub recipients: Vec<String>,
    pub escalation: Option<EscalationPolicy>,
    pub enabled: bool,
}

impl AlertRule {
    pub fn new(
        organization_id: Uuid,
        name: impl Into<String>,
        alert_type: AlertType,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            rule_id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            alert_type,
            conditions: Vec::new(),
            severity,
            auto_escalate: false,
            escalate_after_minutes: 15,
            channels: vec![NotificationChannel::Log],
            recipients: Vec::new(),
            escalation: None,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn with_escalation(mut self, escalate_after_minutes: u32) -> Self {
        self.auto_escalate = true;
        self.escalate_after_minutes = escalate_after_minutes;
        self
    }

    /// All conditions hold (an empty list always matches)
    ///
    /// # Errors
    ///
    /// Returns `DomainError::RuleEvaluation` when a condition compares
    /// incompatible value types.
    pub fn matches(&self, ctx: &RuleContext) -> Result<bool, DomainError> {
        for condition in &self.conditions {
            if !condition.evaluate(ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Effective escalation policy, `None` unless `auto_escalate` is set
    #[must_use]
    pub fn escalation_policy(&self) -> Option<EscalationPolicy> {
        if !self.auto_escalate {
            return None;
        }
        match &self.escalation {
            Some(policy) if !policy.is_empty() => Some(policy.clone()),
            _ => Some(EscalationPolicy {
                levels: vec![EscalationLevel {
                    delay_minutes: self.escalate_after_minutes,
                    channels: self.channels.clone(),
                    recipients: self.recipients.clone(),
                }],
            }),
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Domain-level errors
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Rule evaluation failed: {0}")]
    RuleEvaluation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(lat: f64, lon: f64) -> PositionSample {
        PositionSample {
            vehicle_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            latitude: lat,
            longitude: lon,
            timestamp: Utc::now(),
            speed: Some(42.0),
            heading: Some(90.0),
        }
    }

    #[test]
    fn test_sample_validation() {
        assert!(sample(40.4168, -3.7038).validate().is_ok());
        assert!(sample(91.0, 0.0).validate().is_err());
        assert!(sample(0.0, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_alert_lifecycle() {
        let now = Utc::now();
        let mut alert = Alert::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            AlertType::LongStayOutside,
            AlertSeverity::Critical,
            None,
            "away from base",
            now,
        );
        assert!(alert.is_active());
        assert_eq!(alert.escalation_level, 0);

        alert.acknowledge("dispatcher", now + Duration::minutes(3));
        assert!(!alert.is_active());
        assert_eq!(alert.acknowledged_by.as_deref(), Some("dispatcher"));

        let mut other = alert.clone();
        other.acknowledged = false;
        other.resolve(now);
        assert!(!other.is_active());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Critical > AlertSeverity::High);
        assert!(AlertSeverity::Medium > AlertSeverity::Low);
    }

    #[test]
    fn test_rule_escalation_policy_fallback() {
        let org = Uuid::new_v4();
        let rule = AlertRule::new(org, "exit base", AlertType::Exit, AlertSeverity::Medium);
        assert!(rule.escalation_policy().is_none());

        let rule = rule.with_escalation(10);
        let policy = rule.escalation_policy().unwrap();
        assert_eq!(policy.len(), 1);
        assert_eq!(policy.level(1).unwrap().delay_minutes, 10);
        assert!(policy.level(0).is_none());
        assert!(policy.level(2).is_none());
    }

    #[test]
    fn test_event_from_sample_copies_motion() {
        let s = sample(10.0, 20.0);
        let geofence_id = Uuid::new_v4();
        let event = GeofenceEvent::from_sample(&s, geofence_id, GeofenceEventType::Enter);
        assert_eq!(event.vehicle_id, s.vehicle_id);
        assert_eq!(event.position, Coordinates::new(10.0, 20.0));
        assert_eq!(event.speed, Some(42.0));
        assert_eq!(event.event_type.as_str(), "ENTER");
    }

    #[test]
    fn test_alert_serializes_screaming_case() {
        let json = serde_json::to_string(&AlertType::LongStayInside).unwrap();
        assert_eq!(json, "\"LONG_STAY_INSIDE\"");
    }
}
