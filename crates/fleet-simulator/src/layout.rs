//! Fleet layout: organizations with their bases, destinations and rules.

use fleet_domain::{
    AlertRule, AlertSeverity, AlertType, ConditionOperator, Coordinates, Geofence,
    GeofenceCategory, GeofenceGeometry, GeofenceMode, NotificationChannel, RuleCondition,
};
use uuid::Uuid;

/// Default operating area (Turin)
pub const DEFAULT_CENTER: Coordinates = Coordinates::new(45.0703, 7.6869);

/// Base geofence radius in meters
const BASE_RADIUS_M: f64 = 400.0;

/// Degrees of latitude between organizations' operating areas
const ORG_SPACING_DEG: f64 = 0.5;

/// One organization's share of the simulated world
#[derive(Debug, Clone)]
pub struct OrganizationLayout {
    pub organization_id: Uuid,
    pub name: String,
    /// Home bases, one per vehicle group
    pub bases: Vec<Geofence>,
    /// Every geofence including the bases
    pub geofences: Vec<Geofence>,
    pub rules: Vec<AlertRule>,
    /// Vehicle id and the base it returns to
    pub vehicles: Vec<(Uuid, Coordinates)>,
}

/// Layout parameters
#[derive(Debug, Clone, Copy)]
pub struct LayoutConfig {
    pub organizations: usize,
    pub vehicles_per_organization: usize,
    pub bases_per_organization: usize,
    /// km/h above which the speeding rule fires
    pub speed_limit_kmh: f64,
    pub center: Coordinates,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            organizations: 1,
            vehicles_per_organization: 8,
            bases_per_organization: 2,
            speed_limit_kmh: 90.0,
            center: DEFAULT_CENTER,
        }
    }
}

/// Build the layout for every organization
#[must_use]
pub fn build(config: &LayoutConfig) -> Vec<OrganizationLayout> {
    (0..config.organizations)
        .map(|index| organization(config, index))
        .collect()
}

fn organization(config: &LayoutConfig, index: usize) -> OrganizationLayout {
    let organization_id = Uuid::new_v4();
    #[allow(clippy::cast_precision_loss)]
    let center = Coordinates::new(
        ORG_SPACING_DEG.mul_add(index as f64, config.center.latitude),
        config.center.longitude,
    );

    let bases: Vec<Geofence> = (0..config.bases_per_organization.max(1))
        .map(|n| {
            #[allow(clippy::cast_precision_loss)]
            let offset = 0.02 * n as f64;
            Geofence::new(
                organization_id,
                format!("Station {}", n + 1),
                GeofenceCategory::Base,
                GeofenceGeometry::circle(
                    Coordinates::new(center.latitude, center.longitude + offset),
                    BASE_RADIUS_M,
                ),
            )
        })
        .collect();

    // ~1 km box, 3 km north of the center
    let hospital = Geofence::new(
        organization_id,
        "General Hospital",
        GeofenceCategory::Hospital,
        GeofenceGeometry::rectangle(
            center.latitude + 0.027,
            center.longitude - 0.006,
            center.latitude + 0.036,
            center.longitude + 0.006,
        ),
    );

    // GeoJSON ring, east of the center; emergency-only zone
    let mut incident_area = Geofence::new(
        organization_id,
        "Incident Area",
        GeofenceCategory::Other,
        GeofenceGeometry::polygon_from_geojson(&[
            [center.longitude + 0.030, center.latitude - 0.006],
            [center.longitude + 0.042, center.latitude - 0.006],
            [center.longitude + 0.042, center.latitude + 0.006],
            [center.longitude + 0.030, center.latitude + 0.006],
            [center.longitude + 0.030, center.latitude - 0.006],
        ]),
    );
    incident_area.mode = GeofenceMode::Emergency;

    let mut geofences = bases.clone();
    geofences.push(hospital);
    geofences.push(incident_area);

    let vehicles = (0..config.vehicles_per_organization)
        .map(|n| {
            let home = base_center(&bases[n % bases.len()]).unwrap_or(center);
            (Uuid::new_v4(), home)
        })
        .collect();

    OrganizationLayout {
        organization_id,
        name: format!("Fleet {}", index + 1),
        bases,
        geofences,
        rules: rules(organization_id, config.speed_limit_kmh),
        vehicles,
    }
}

fn base_center(base: &Geofence) -> Option<Coordinates> {
    match &base.geometry {
        GeofenceGeometry::Circle { center, .. } => Some(*center),
        _ => None,
    }
}

fn rules(organization_id: Uuid, speed_limit_kmh: f64) -> Vec<AlertRule> {
    let mut speeding =
        AlertRule::new(organization_id, "Speeding", AlertType::Speeding, AlertSeverity::Medium)
            .with_condition(RuleCondition::new(
                "speed",
                ConditionOperator::Gt,
                speed_limit_kmh,
            ))
            .with_escalation(10);
    speeding.channels = vec![NotificationChannel::Log, NotificationChannel::Push];

    let left_base = AlertRule::new(organization_id, "Left base", AlertType::Exit, AlertSeverity::Low)
        .with_condition(RuleCondition::new(
            "geofence_category",
            ConditionOperator::Eq,
            GeofenceCategory::Base.as_str(),
        ));

    let mut hospital = AlertRule::new(
        organization_id,
        "Hospital arrival",
        AlertType::Entry,
        AlertSeverity::Low,
    )
    .with_condition(RuleCondition::new(
        "geofence_category",
        ConditionOperator::Eq,
        GeofenceCategory::Hospital.as_str(),
    ));
    hospital.channels = vec![NotificationChannel::Log, NotificationChannel::Webhook];
    hospital.recipients = vec!["dispatch@fleet.local".to_string()];

    let mut offline = AlertRule::new(
        organization_id,
        "Vehicle offline",
        AlertType::Offline,
        AlertSeverity::High,
    )
    .with_escalation(15);
    offline.channels = vec![NotificationChannel::Log, NotificationChannel::Sms];

    vec![speeding, left_base, hospital, offline]
}
