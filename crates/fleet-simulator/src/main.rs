//! Fleet Simulator CLI
//!
//! Drives a random-walk fleet through the geofence monitor until Ctrl+C,
//! SIGTERM or the configured duration, then prints a JSON summary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleet_monitor::{
    BroadcastSink, Clock, FanoutSink, LogSink, Monitor, MonitorConfig, NotificationSink,
    SystemClock, scheduler,
};
use fleet_persistence::{
    CacheConfig, CachedZoneStateRepository, MemoryStore, Repositories, connect_redis,
};
use fleet_simulator::{
    LayoutConfig, OrganizationLayout, SimulatedFleet, SimulationSummary, WalkConfig, layout,
    summary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// In-process store, nothing survives the run
    Memory,
    /// Redis at `REDIS_URL`, with a cached membership layer
    Redis,
}

#[derive(Parser, Debug)]
#[command(name = "fleet-simulator")]
#[command(about = "Simulate a vehicle fleet against the geofence monitor")]
struct Args {
    /// Number of organizations
    #[arg(short, long, default_value = "1")]
    organizations: usize,

    /// Vehicles per organization
    #[arg(short, long, default_value = "8")]
    vehicles: usize,

    /// Home bases per organization
    #[arg(long, default_value = "2")]
    bases: usize,

    /// Tick interval in seconds (overrides TICK_INTERVAL_SECS)
    #[arg(long)]
    tick_secs: Option<u64>,

    /// Simulated seconds of driving per tick
    #[arg(long, default_value = "30")]
    step_secs: u64,

    /// Speeding threshold in km/h
    #[arg(long, default_value = "90")]
    speed_limit: f64,

    /// Per-tick chance a parked vehicle departs
    #[arg(long, default_value = "0.05")]
    departure_probability: f64,

    /// Backing store
    #[arg(long, value_enum, default_value = "memory")]
    store: StoreKind,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Random walk seed
    #[arg(long, default_value = "42")]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut config = MonitorConfig::from_env();
    if let Some(secs) = args.tick_secs {
        config.tick_interval = Duration::from_secs(secs.max(1));
    }

    init_tracing(&config);

    tracing::info!(
        version = fleet_monitor::VERSION,
        organizations = args.organizations,
        vehicles = args.vehicles,
        store = ?args.store,
        seed = args.seed,
        "Starting fleet simulation"
    );

    let layouts = layout::build(&LayoutConfig {
        organizations: args.organizations,
        vehicles_per_organization: args.vehicles,
        bases_per_organization: args.bases,
        speed_limit_kmh: args.speed_limit,
        ..LayoutConfig::default()
    });

    let repos = repositories(args.store, &config, &layouts).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let fleet = SimulatedFleet::new(
        &layouts,
        WalkConfig {
            step: Duration::from_secs(args.step_secs.max(1)),
            departure_probability: args.departure_probability,
            ..WalkConfig::default()
        },
        args.seed,
        clock.clone(),
    )?;

    let broadcast = BroadcastSink::new(config.event_channel_capacity);
    let notifications = broadcast.subscribe();
    let sink: Arc<dyn NotificationSink> =
        Arc::new(FanoutSink::new(vec![Arc::new(LogSink), Arc::new(broadcast)]));

    let monitor = Arc::new(Monitor::new(
        config,
        repos.clone(),
        Arc::new(fleet),
        sink,
        clock,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tally = tokio::spawn(summary::tally(
        monitor.subscribe(),
        notifications,
        shutdown_rx.clone(),
    ));
    let driver = scheduler::spawn(monitor.clone(), shutdown_rx);

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        () = shutdown_signal() => {}
        () = deadline => {
            tracing::info!("Simulation duration reached, shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    driver.await?;
    let tally = tally.await?;

    let limit = monitor.config().active_alert_scan_limit;
    let mut active_alerts = 0;
    for org in &layouts {
        match repos.alerts.list_active_alerts(org.organization_id, limit).await {
            Ok(alerts) => active_alerts += alerts.len(),
            Err(e) => tracing::warn!(
                organization_id = %org.organization_id,
                error = %e,
                "Failed to count active alerts"
            ),
        }
    }

    let vehicles = layouts.iter().map(|l| l.vehicles.len()).sum();
    let summary = SimulationSummary::new(layouts.len(), vehicles, tally, active_alerts);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

fn init_tracing(config: &MonitorConfig) {
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()),
    );
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Build the repositories and load every layout's geofences and rules
async fn repositories(
    store: StoreKind,
    config: &MonitorConfig,
    layouts: &[OrganizationLayout],
) -> Result<Repositories> {
    match store {
        StoreKind::Memory => {
            let store = Arc::new(MemoryStore::new());
            for layout in layouts {
                for geofence in &layout.geofences {
                    store.insert_geofence(geofence.clone()).await;
                }
                for rule in &layout.rules {
                    store.insert_rule(rule.clone()).await;
                }
            }
            Ok(Repositories::from_store(store))
        }
        StoreKind::Redis => {
            tracing::info!(url = %config.redis_url, "Connecting to Redis");
            let (store, cache) = connect_redis(CacheConfig {
                url: config.redis_url.clone(),
                ..CacheConfig::default()
            })
            .await?;
            tracing::info!("Redis connected");

            for layout in layouts {
                for geofence in &layout.geofences {
                    store.put_geofence(geofence).await?;
                }
                for rule in &layout.rules {
                    store.put_rule(rule).await?;
                }
            }

            let store = Arc::new(store);
            let zone_states = Arc::new(CachedZoneStateRepository::new(store.clone(), cache));
            Ok(Repositories::from_store(store).with_zone_states(zone_states))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
