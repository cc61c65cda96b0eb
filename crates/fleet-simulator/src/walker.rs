//! Random-walk vehicles reporting a position on every pull.
//!
//! Each vehicle parks at its home base, occasionally departs on a noisy
//! walk, then drives straight back. A small chance of going silent for a
//! while exercises the offline rule.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, NormalError};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::layout::OrganizationLayout;
use fleet_domain::{Coordinates, PositionSample};
use fleet_monitor::{Clock, PositionSource, Result};

const KM_PER_DEG_LAT: f64 = 111.32;

/// Walk parameters
#[derive(Debug, Clone, Copy)]
pub struct WalkConfig {
    /// Simulated time between two pulls
    pub step: Duration,
    /// Per-step chance a parked vehicle leaves its base
    pub departure_probability: f64,
    /// Per-step chance a vehicle stops reporting
    pub silence_probability: f64,
    pub cruise_speed_kmh: f64,
    pub speed_stddev_kmh: f64,
    pub heading_stddev_deg: f64,
    pub max_roam_steps: u32,
    pub silent_steps: u32,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(30),
            departure_probability: 0.05,
            silence_probability: 0.002,
            cruise_speed_kmh: 50.0,
            speed_stddev_kmh: 20.0,
            heading_stddev_deg: 25.0,
            max_roam_steps: 240,
            silent_steps: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Parked,
    Roaming { steps_left: u32 },
    Returning,
    Silent { steps_left: u32 },
}

/// One simulated vehicle
#[derive(Debug, Clone)]
pub struct SimulatedVehicle {
    pub vehicle_id: Uuid,
    pub organization_id: Uuid,
    pub home: Coordinates,
    pub position: Coordinates,
    pub heading_deg: f64,
    pub speed_kmh: f64,
    phase: Phase,
}

impl SimulatedVehicle {
    #[must_use]
    pub const fn new(vehicle_id: Uuid, organization_id: Uuid, home: Coordinates) -> Self {
        Self {
            vehicle_id,
            organization_id,
            home,
            position: home,
            heading_deg: 0.0,
            speed_kmh: 0.0,
            phase: Phase::Parked,
        }
    }

    #[must_use]
    pub const fn is_parked(&self) -> bool {
        matches!(self.phase, Phase::Parked)
    }

    #[must_use]
    pub const fn is_silent(&self) -> bool {
        matches!(self.phase, Phase::Silent { .. })
    }

    /// Move `distance_km` along the current heading
    fn advance(&mut self, distance_km: f64) {
        let heading = self.heading_deg.to_radians();
        let lat = self.position.latitude;
        let dlat = distance_km * heading.cos() / KM_PER_DEG_LAT;
        let dlng = distance_km * heading.sin() / (KM_PER_DEG_LAT * lat.to_radians().cos());
        self.position = Coordinates::new((lat + dlat).clamp(-89.9, 89.9), self.position.longitude + dlng);
    }

    /// Heading (0 = north, clockwise) and distance to home
    fn towards_home(&self) -> (f64, f64) {
        let dy = (self.home.latitude - self.position.latitude) * KM_PER_DEG_LAT;
        let dx = (self.home.longitude - self.position.longitude)
            * KM_PER_DEG_LAT
            * self.position.latitude.to_radians().cos();
        (dx.atan2(dy).to_degrees(), dx.hypot(dy))
    }
}

struct WalkState {
    vehicles: Vec<SimulatedVehicle>,
    rng: StdRng,
    speed: Normal<f64>,
    turn: Normal<f64>,
}

/// `Normal::new` only rejects non-finite deviations
fn deviation(value: f64) -> std::result::Result<f64, NormalError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(NormalError::BadVariance)
    }
}

/// Position source backed by a seeded random walk
pub struct SimulatedFleet {
    state: Mutex<WalkState>,
    clock: Arc<dyn Clock>,
    config: WalkConfig,
}

impl SimulatedFleet {
    /// Park every vehicle of `layouts` at its home base
    ///
    /// # Errors
    ///
    /// Returns `NormalError` if a standard deviation is negative or not finite.
    pub fn new(
        layouts: &[OrganizationLayout],
        config: WalkConfig,
        seed: u64,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, NormalError> {
        let vehicles = layouts
            .iter()
            .flat_map(|layout| {
                layout.vehicles.iter().map(|(vehicle_id, home)| {
                    SimulatedVehicle::new(*vehicle_id, layout.organization_id, *home)
                })
            })
            .collect();
        Self::from_vehicles(vehicles, config, seed, clock)
    }

    /// # Errors
    ///
    /// Returns `NormalError` if a standard deviation is negative or not finite.
    pub fn from_vehicles(
        vehicles: Vec<SimulatedVehicle>,
        mut config: WalkConfig,
        seed: u64,
        clock: Arc<dyn Clock>,
    ) -> std::result::Result<Self, NormalError> {
        config.departure_probability = config.departure_probability.clamp(0.0, 1.0);
        config.silence_probability = config.silence_probability.clamp(0.0, 1.0);
        config.max_roam_steps = config.max_roam_steps.max(1);

        Ok(Self {
            state: Mutex::new(WalkState {
                vehicles,
                rng: StdRng::seed_from_u64(seed),
                speed: Normal::new(config.cruise_speed_kmh, deviation(config.speed_stddev_kmh)?)?,
                turn: Normal::new(0.0, deviation(config.heading_stddev_deg)?)?,
            }),
            clock,
            config,
        })
    }

    /// Current state of every vehicle
    pub async fn vehicles(&self) -> Vec<SimulatedVehicle> {
        self.state.lock().await.vehicles.clone()
    }

    /// Advance every vehicle one step; silent vehicles report nothing
    pub async fn step(&self) -> Vec<PositionSample> {
        let now = self.clock.now();
        let step_hours = self.config.step.as_secs_f64() / 3600.0;
        let mut guard = self.state.lock().await;
        let WalkState {
            vehicles,
            rng,
            speed,
            turn,
        } = &mut *guard;

        let mut samples = Vec::with_capacity(vehicles.len());
        for vehicle in vehicles.iter_mut() {
            if !self.step_vehicle(vehicle, rng, speed, turn, step_hours) {
                continue;
            }
            samples.push(PositionSample {
                vehicle_id: vehicle.vehicle_id,
                organization_id: vehicle.organization_id,
                latitude: vehicle.position.latitude,
                longitude: vehicle.position.longitude,
                timestamp: now,
                speed: Some(vehicle.speed_kmh),
                heading: Some(vehicle.heading_deg.rem_euclid(360.0)),
            });
        }
        samples
    }

    /// Returns whether the vehicle reports this step
    fn step_vehicle(
        &self,
        vehicle: &mut SimulatedVehicle,
        rng: &mut StdRng,
        speed: &Normal<f64>,
        turn: &Normal<f64>,
        step_hours: f64,
    ) -> bool {
        if let Phase::Silent { steps_left } = vehicle.phase {
            vehicle.phase = if steps_left <= 1 {
                Phase::Returning
            } else {
                Phase::Silent {
                    steps_left: steps_left - 1,
                }
            };
            return false;
        }
        if rng.gen_bool(self.config.silence_probability) {
            vehicle.phase = Phase::Silent {
                steps_left: self.config.silent_steps,
            };
            return false;
        }

        match vehicle.phase {
            Phase::Parked => {
                vehicle.speed_kmh = 0.0;
                if rng.gen_bool(self.config.departure_probability) {
                    vehicle.heading_deg = rng.gen_range(0.0..360.0);
                    vehicle.phase = Phase::Roaming {
                        steps_left: rng.gen_range(1..=self.config.max_roam_steps),
                    };
                }
            }
            Phase::Roaming { steps_left } => {
                vehicle.heading_deg += turn.sample(rng);
                vehicle.speed_kmh = speed.sample(rng).max(0.0);
                vehicle.advance(vehicle.speed_kmh * step_hours);
                vehicle.phase = if steps_left <= 1 {
                    Phase::Returning
                } else {
                    Phase::Roaming {
                        steps_left: steps_left - 1,
                    }
                };
            }
            Phase::Returning => {
                let (heading, remaining_km) = vehicle.towards_home();
                vehicle.heading_deg = heading;
                vehicle.speed_kmh = self.config.cruise_speed_kmh;
                let distance_km = vehicle.speed_kmh * step_hours;
                if distance_km >= remaining_km {
                    vehicle.position = vehicle.home;
                    vehicle.speed_kmh = 0.0;
                    vehicle.phase = Phase::Parked;
                } else {
                    vehicle.advance(distance_km);
                }
            }
            Phase::Silent { .. } => {}
        }
        true
    }
}

#[async_trait]
impl PositionSource for SimulatedFleet {
    async fn latest_samples(&self) -> Result<Vec<PositionSample>> {
        Ok(self.step().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{LayoutConfig, build};
    use fleet_monitor::SystemClock;

    fn quiet() -> WalkConfig {
        WalkConfig {
            silence_probability: 0.0,
            ..WalkConfig::default()
        }
    }

    #[tokio::test]
    async fn test_parked_vehicles_report_home() {
        let layouts = build(&LayoutConfig::default());
        let fleet = SimulatedFleet::new(
            &layouts,
            WalkConfig {
                departure_probability: 0.0,
                ..quiet()
            },
            7,
            Arc::new(SystemClock),
        )
        .unwrap();

        let samples = fleet.latest_samples().await.unwrap();
        assert_eq!(samples.len(), layouts[0].vehicles.len());
        for sample in &samples {
            assert!(sample.validate().is_ok());
            assert_eq!(sample.speed, Some(0.0));
            assert!(layouts[0].bases.iter().any(|b| b.contains(&sample.position())));
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_walk() {
        let layouts = build(&LayoutConfig::default());
        let a = SimulatedFleet::new(&layouts, quiet(), 42, Arc::new(SystemClock)).unwrap();
        let b = SimulatedFleet::new(&layouts, quiet(), 42, Arc::new(SystemClock)).unwrap();

        for _ in 0..50 {
            let left: Vec<_> = a.step().await.iter().map(PositionSample::position).collect();
            let right: Vec<_> = b.step().await.iter().map(PositionSample::position).collect();
            assert_eq!(left, right);
        }
    }

    #[tokio::test]
    async fn test_returning_vehicle_parks_at_home() {
        let home = Coordinates::new(45.07, 7.68);
        let mut vehicle = SimulatedVehicle::new(Uuid::new_v4(), Uuid::new_v4(), home);
        vehicle.position = Coordinates::new(45.079, 7.68); // ~1 km north
        vehicle.phase = Phase::Returning;

        let fleet = SimulatedFleet::from_vehicles(
            vec![vehicle],
            WalkConfig {
                step: Duration::from_secs(60),
                departure_probability: 0.0,
                ..quiet()
            },
            1,
            Arc::new(SystemClock),
        )
        .unwrap();

        // 50 km/h covers ~0.83 km a minute
        let first = fleet.step().await;
        assert!((first[0].heading.unwrap() - 180.0).abs() < 1.0);
        assert!(!fleet.vehicles().await[0].is_parked());

        fleet.step().await;
        let parked = &fleet.vehicles().await[0];
        assert!(parked.is_parked());
        assert_eq!(parked.position, home);
    }

    #[tokio::test]
    async fn test_silent_vehicle_reports_nothing() {
        let layouts = build(&LayoutConfig {
            vehicles_per_organization: 3,
            ..LayoutConfig::default()
        });
        let fleet = SimulatedFleet::new(
            &layouts,
            WalkConfig {
                silence_probability: 1.0,
                silent_steps: 2,
                ..WalkConfig::default()
            },
            3,
            Arc::new(SystemClock),
        )
        .unwrap();

        assert!(fleet.step().await.is_empty());
        assert!(fleet.vehicles().await.iter().all(SimulatedVehicle::is_silent));
    }

    #[test]
    fn test_negative_stddev_rejected() {
        let result = SimulatedFleet::from_vehicles(
            Vec::new(),
            WalkConfig {
                speed_stddev_kmh: -1.0,
                ..WalkConfig::default()
            },
            0,
            Arc::new(SystemClock),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_or_nan_heading_stddev_rejected() {
        for heading_stddev_deg in [-0.5, f64::NAN] {
            let result = SimulatedFleet::from_vehicles(
                Vec::new(),
                WalkConfig {
                    heading_stddev_deg,
                    ..WalkConfig::default()
                },
                0,
                Arc::new(SystemClock),
            );
            assert!(matches!(result, Err(NormalError::BadVariance)));
        }
    }

    #[test]
    fn test_zero_stddev_is_a_straight_walk() {
        let result = SimulatedFleet::from_vehicles(
            Vec::new(),
            WalkConfig {
                speed_stddev_kmh: 0.0,
                heading_stddev_deg: 0.0,
                ..WalkConfig::default()
            },
            0,
            Arc::new(SystemClock),
        );
        assert!(result.is_ok());
    }
}
