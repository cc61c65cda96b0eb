//! # Fleet Monitor
//!
//! Monitoring core: turns a stream of vehicle position samples into geofence
//! transitions and operator alerts.
//!
//! ```text
//!  PositionSource ──► Monitor::tick ──► ZoneStateTracker ──► GeofenceEvent log
//!                          │                   │
//!                          │                   └──► AlertEngine::on_transition
//!                          ├──► AlertEngine::sweep (snapshot rules, long stays,
//!                          │                        auto-resolution)
//!                          └──► AlertEngine::fire_due_escalations
//!                                              │
//!                                              ▼
//!                                     NotificationSink
//! ```
//!
//! All state lives behind the repository traits of `fleet-persistence`;
//! the engine holds only escalation timers and lock entries in memory.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod locks;
pub mod notify;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod timers;
pub mod tracker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MonitorConfig, RuntimeSettings, SettingsHandle};
pub use engine::{AlertEngine, EscalationReport, SweepReport};
pub use error::{MonitorError, Result};
pub use ingest::{Monitor, TickReport};
pub use locks::KeyedLocks;
pub use notify::{BroadcastSink, FanoutSink, LogSink, Notification, NotificationSink, RecordingSink};
pub use registry::GeofenceRegistry;
pub use source::{PositionSource, QueueSource};
pub use timers::{EscalationTimers, PendingEscalation};
pub use tracker::ZoneStateTracker;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
