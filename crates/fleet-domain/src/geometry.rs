//! Geometry predicates used for geofence containment.
//!
//! Every predicate is pure and total: malformed geometry or an invalid point
//! yields `false`, never a panic. Callers that want to know *why* a geofence
//! was rejected use [`GeofenceGeometry::validate`].
//!
//! ## Coordinate convention
//!
//! Vertices are [`Coordinates`] with named `latitude` / `longitude` fields.
//! Ray casting treats longitude as `x` and latitude as `y`. The only place an
//! unnamed pair is interpreted is [`GeofenceGeometry::polygon_from_geojson`],
//! which follows GeoJSON `[lng, lat]` order.
//!
//! ## Boundary rules
//!
//! - Circle: a point at exactly `radius_m` is inside.
//! - Rectangle: bounds are inclusive on all four sides.
//! - Polygon: half-open even-odd rule. For an axis-aligned square, points on
//!   the south and west edges are inside, points on the north and east edges
//!   are outside; of the corners only the south-west one is inside.

use serde::{Deserialize, Serialize};

use crate::{Coordinates, DomainError};

/// Mean Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geofence shape discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeofenceShape {
    Circle,
    Polygon,
    Rectangle,
}

/// Geometry payload; the variant fixes which predicate applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeofenceGeometry {
    Circle {
        center: Coordinates,
        radius_m: f64,
    },
    Polygon {
        ring: Vec<Coordinates>,
    },
    Rectangle {
        min_lat: f64,
        min_lng: f64,
        max_lat: f64,
        max_lng: f64,
    },
}

impl GeofenceGeometry {
    #[must_use]
    pub const fn circle(center: Coordinates, radius_m: f64) -> Self {
        Self::Circle { center, radius_m }
    }

    #[must_use]
    pub const fn rectangle(min_lat: f64, min_lng: f64, max_lat: f64, max_lng: f64) -> Self {
        Self::Rectangle {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        }
    }

    /// Build a polygon from GeoJSON positions (`[lng, lat]`)
    #[must_use]
    pub fn polygon_from_geojson(positions: &[[f64; 2]]) -> Self {
        Self::Polygon {
            ring: positions
                .iter()
                .map(|[lng, lat]| Coordinates::new(*lat, *lng))
                .collect(),
        }
    }

    #[must_use]
    pub const fn shape(&self) -> GeofenceShape {
        match self {
            Self::Circle { .. } => GeofenceShape::Circle,
            Self::Polygon { .. } => GeofenceShape::Polygon,
            Self::Rectangle { .. } => GeofenceShape::Rectangle,
        }
    }

    /// Check that the payload can be tested against
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidGeometry` describing the defect.
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            Self::Circle { center, radius_m } => {
                if !center.is_valid() {
                    return Err(DomainError::InvalidGeometry(format!(
                        "circle center out of range: {center:?}"
                    )));
                }
                if !radius_m.is_finite() || *radius_m < 0.0 {
                    return Err(DomainError::InvalidGeometry(format!(
                        "circle radius must be a non-negative number, got {radius_m}"
                    )));
                }
                Ok(())
            }
            Self::Polygon { ring } => {
                if let Some(bad) = ring.iter().find(|v| !v.is_valid()) {
                    return Err(DomainError::InvalidGeometry(format!(
                        "polygon vertex out of range: {bad:?}"
                    )));
                }
                let open = open_ring(ring);
                if open.len() < 3 {
                    return Err(DomainError::InvalidGeometry(format!(
                        "polygon needs at least 3 distinct vertices, got {}",
                        open.len()
                    )));
                }
                Ok(())
            }
            Self::Rectangle {
                min_lat,
                min_lng,
                max_lat,
                max_lng,
            } => {
                let min = Coordinates::new(*min_lat, *min_lng);
                let max = Coordinates::new(*max_lat, *max_lng);
                if !min.is_valid() || !max.is_valid() {
                    return Err(DomainError::InvalidGeometry(
                        "rectangle bounds out of range".to_string(),
                    ));
                }
                if min_lat > max_lat || min_lng > max_lng {
                    return Err(DomainError::InvalidGeometry(
                        "rectangle bounds are inverted".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Great-circle distance between two points in meters
#[must_use]
pub fn haversine_distance_m(a: &Coordinates, b: &Coordinates) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Containment test for any geometry
#[must_use]
pub fn inside(geometry: &GeofenceGeometry, point: &Coordinates) -> bool {
    if !point.is_valid() || geometry.validate().is_err() {
        return false;
    }
    match geometry {
        GeofenceGeometry::Circle { center, radius_m } => point_in_circle(center, *radius_m, point),
        GeofenceGeometry::Polygon { ring } => point_in_polygon(ring, point),
        GeofenceGeometry::Rectangle {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        } => {
            (*min_lat..=*max_lat).contains(&point.latitude)
                && (*min_lng..=*max_lng).contains(&point.longitude)
        }
    }
}

fn point_in_circle(center: &Coordinates, radius_m: f64, point: &Coordinates) -> bool {
    haversine_distance_m(center, point) <= radius_m
}

/// Even-odd ray casting along +longitude
fn point_in_polygon(ring: &[Coordinates], point: &Coordinates) -> bool {
    let ring = open_ring(ring);
    if ring.len() < 3 {
        return false;
    }

    let (x, y) = (point.longitude, point.latitude);
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (xi, yi) = (ring[i].longitude, ring[i].latitude);
        let (xj, yj) = (ring[j].longitude, ring[j].latitude);
        // yi != yj whenever this branch runs, so the division is safe
        if (yi > y) != (yj > y) {
            let x_cross = (xj - xi) * (y - yi) / (yj - yi) + xi;
            if x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Drop an explicit closing vertex
fn open_ring(ring: &[Coordinates]) -> &[Coordinates] {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}
