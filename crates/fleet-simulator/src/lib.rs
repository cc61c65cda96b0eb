//! # Fleet Simulator
//!
//! Random-walk vehicle fleet for exercising the geofence monitor end to end.
//!
//! ## Features
//!
//! - Seeded layout of bases, a hospital and an emergency-only polygon per organization
//! - Vehicles that park, roam, return home and occasionally go silent
//! - Reproducible walks from a fixed seed
//! - Run summary from the monitor's event and notification streams

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod layout;
pub mod summary;
pub mod walker;

pub use layout::{LayoutConfig, OrganizationLayout};
pub use summary::{SimulationSummary, StreamTally};
pub use walker::{SimulatedFleet, SimulatedVehicle, WalkConfig};
