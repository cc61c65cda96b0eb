//! # Monitor Configuration
//!
//! Environment-based configuration for the monitoring core, plus the
//! runtime-adjustable settings shared through a [`SettingsHandle`].

use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use fleet_domain::AlertType;
use tokio::sync::watch;

/// Static configuration, fixed for the lifetime of the process
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Ingestion tick period
    pub tick_interval: Duration,

    /// Escalation timer poll period between ticks
    pub escalation_poll_interval: Duration,

    /// Deadline for every store, source and sink call
    pub io_timeout: Duration,

    /// Vehicles processed in parallel within a tick
    pub max_concurrent_vehicles: usize,

    /// Window in which a long-stay alert is not raised twice
    pub alert_dedup_window: chrono::Duration,

    /// Silence after which a vehicle counts as offline
    pub offline_after: chrono::Duration,

    /// Active alerts examined per organization and sweep
    pub active_alert_scan_limit: usize,

    /// Buffered transitions per broadcast subscriber
    pub event_channel_capacity: usize,

    /// Initial runtime settings
    pub settings: RuntimeSettings,

    /// Redis URL, used by binaries that opt into the Redis store
    pub redis_url: String,

    /// Logging level
    pub log_level: String,

    /// Emit JSON logs
    pub log_json: bool,
}

impl MonitorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = RuntimeSettings::default();

        Self {
            tick_interval: Duration::from_secs(env_parse("TICK_INTERVAL_SECS", 30_u64).max(1)),
            escalation_poll_interval: Duration::from_secs(
                env_parse("ESCALATION_POLL_SECS", 5_u64).max(1),
            ),
            io_timeout: Duration::from_millis(env_parse("IO_TIMEOUT_MS", 2000_u64).max(1)),
            max_concurrent_vehicles: env_parse("MAX_CONCURRENT_VEHICLES", 16_usize).max(1),
            alert_dedup_window: span(
                env_parse("ALERT_DEDUP_HOURS", 24_i64),
                chrono::Duration::try_hours,
            ),
            offline_after: span(
                env_parse("OFFLINE_AFTER_MINUTES", 15_i64),
                chrono::Duration::try_minutes,
            ),
            active_alert_scan_limit: env_parse("ACTIVE_ALERT_SCAN_LIMIT", 500_usize),
            event_channel_capacity: env_parse("EVENT_CHANNEL_CAPACITY", 1024_usize).max(1),

            settings: RuntimeSettings {
                long_stay_outside_hours: env_parse(
                    "LONG_STAY_OUTSIDE_HOURS",
                    defaults.long_stay_outside_hours,
                ),
                long_stay_inside_hours: env_parse(
                    "LONG_STAY_INSIDE_HOURS",
                    defaults.long_stay_inside_hours,
                ),
                notify_on_entry: env_bool("NOTIFY_ON_ENTRY", defaults.notify_on_entry),
                notify_on_exit: env_bool("NOTIFY_ON_EXIT", defaults.notify_on_exit),
                notify_on_long_stay: env_bool("NOTIFY_ON_LONG_STAY", defaults.notify_on_long_stay),
                enabled: env_bool("MONITOR_ENABLED", defaults.enabled),
            },

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            log_json: env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            escalation_poll_interval: Duration::from_secs(5),
            io_timeout: Duration::from_millis(2000),
            max_concurrent_vehicles: 16,
            alert_dedup_window: chrono::Duration::hours(24),
            offline_after: chrono::Duration::minutes(15),
            active_alert_scan_limit: 500,
            event_channel_capacity: 1024,
            settings: RuntimeSettings::default(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Negative amounts become zero, overflowing ones the longest span
fn span(amount: i64, unit: fn(i64) -> Option<chrono::Duration>) -> chrono::Duration {
    unit(amount.max(0)).unwrap_or(chrono::Duration::MAX)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

// =============================================================================
// RUNTIME SETTINGS
// =============================================================================

/// Settings an operator may change while the monitor runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub long_stay_outside_hours: u32,
    pub long_stay_inside_hours: u32,
    pub notify_on_entry: bool,
    pub notify_on_exit: bool,
    pub notify_on_long_stay: bool,
    /// When false every tick is a no-op
    pub enabled: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            long_stay_outside_hours: 4,
            long_stay_inside_hours: 2,
            notify_on_entry: true,
            notify_on_exit: true,
            notify_on_long_stay: true,
            enabled: true,
        }
    }
}

impl RuntimeSettings {
    /// Whether the creation of an alert of this type is notified
    #[must_use]
    pub const fn notifies_on(&self, alert_type: AlertType) -> bool {
        match alert_type {
            AlertType::Entry => self.notify_on_entry,
            AlertType::Exit => self.notify_on_exit,
            AlertType::LongStayOutside | AlertType::LongStayInside => self.notify_on_long_stay,
            AlertType::Speeding | AlertType::Offline => true,
        }
    }

    #[must_use]
    pub fn long_stay_outside(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.long_stay_outside_hours))
    }

    #[must_use]
    pub fn long_stay_inside(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.long_stay_inside_hours))
    }
}

/// Shared, observable handle to the runtime settings
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    tx: Arc<watch::Sender<RuntimeSettings>>,
}

impl SettingsHandle {
    #[must_use]
    pub fn new(settings: RuntimeSettings) -> Self {
        let (tx, _rx) = watch::channel(settings);
        Self { tx: Arc::new(tx) }
    }

    /// Current settings
    #[must_use]
    pub fn get(&self) -> RuntimeSettings {
        self.tx.borrow().clone()
    }

    /// Apply an operator change; takes effect from the next tick
    pub fn update(&self, change: impl FnOnce(&mut RuntimeSettings)) {
        self.tx.send_modify(change);
        let current = self.get();
        tracing::info!(
            enabled = current.enabled,
            long_stay_outside_hours = current.long_stay_outside_hours,
            long_stay_inside_hours = current.long_stay_inside_hours,
            notify_on_entry = current.notify_on_entry,
            notify_on_exit = current.notify_on_exit,
            notify_on_long_stay = current.notify_on_long_stay,
            "Runtime settings updated"
        );
    }

    /// Observe settings changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RuntimeSettings> {
        self.tx.subscribe()
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(RuntimeSettings::default())
    }
}
