//! # Alert Rule Engine
//!
//! Raises, escalates, acknowledges and auto-resolves alerts.
//!
//! - Transitions from the tracker go through [`AlertEngine::on_transition`].
//! - [`AlertEngine::sweep`] runs once per organization and tick: snapshot
//!   rules (speeding, offline), long-stay detection and auto-resolution.
//! - [`AlertEngine::fire_due_escalations`] walks escalation policies.
//!
//! Every alert lifecycle step for a (vehicle, alert type) pair runs inside
//! that pair's exclusive section, and the alert is re-read from the store
//! before it is changed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{MonitorConfig, RuntimeSettings, SettingsHandle};
use crate::error::{MonitorError, Result, bounded};
use crate::locks::KeyedLocks;
use crate::notify::NotificationSink;
use crate::registry::GeofenceRegistry;
use crate::timers::{EscalationTimers, PendingEscalation};
use fleet_domain::{
    Alert, AlertKey, AlertRule, AlertSeverity, AlertType, EscalationPolicy, Geofence,
    GeofenceEvent, GeofenceEventType, NotificationChannel, RuleContext, VehicleSnapshot,
    VehicleZoneState,
};
use fleet_persistence::Repositories;

// =============================================================================
// REPORTS
// =============================================================================

/// Outcome of one organization sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub created: usize,
    pub resolved: usize,
    pub rearmed: usize,
    pub failures: usize,
}

/// Outcome of one escalation poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationReport {
    pub escalated: usize,
    pub failures: usize,
}

// =============================================================================
// ALERT DRAFT
// =============================================================================

/// Everything needed to raise an alert, before dedup
struct AlertDraft {
    organization_id: Uuid,
    vehicle_id: Uuid,
    geofence_id: Option<Uuid>,
    alert_type: AlertType,
    severity: AlertSeverity,
    rule_id: Option<Uuid>,
    message: String,
    channels: Vec<NotificationChannel>,
    recipients: Vec<String>,
    escalation: Option<EscalationPolicy>,
    /// Also suppress when an alert was created within the dedup window
    windowed: bool,
}

impl AlertDraft {
    fn from_rule(
        rule: &AlertRule,
        vehicle_id: Uuid,
        geofence_id: Option<Uuid>,
        message: String,
    ) -> Self {
        Self {
            organization_id: rule.organization_id,
            vehicle_id,
            geofence_id,
            alert_type: rule.alert_type,
            severity: rule.severity,
            rule_id: Some(rule.rule_id),
            message,
            channels: rule.channels.clone(),
            recipients: rule.recipients.clone(),
            escalation: rule.escalation_policy(),
            windowed: rule.alert_type.is_long_stay(),
        }
    }

    fn builtin(
        organization_id: Uuid,
        vehicle_id: Uuid,
        geofence_id: Option<Uuid>,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
    ) -> Self {
        Self {
            organization_id,
            vehicle_id,
            geofence_id,
            alert_type,
            severity,
            rule_id: None,
            message,
            channels: vec![NotificationChannel::Log],
            recipients: Vec::new(),
            escalation: None,
            windowed: alert_type.is_long_stay(),
        }
    }
}

/// Default severity of long-stay alerts without a matching rule
const fn default_long_stay_severity(alert_type: AlertType) -> AlertSeverity {
    match alert_type {
        AlertType::LongStayOutside => AlertSeverity::Critical,
        _ => AlertSeverity::High,
    }
}

/// Data loaded once per sweep
struct SweepContext {
    organization_id: Uuid,
    now: DateTime<Utc>,
    settings: RuntimeSettings,
    rules: Vec<AlertRule>,
    geofences: HashMap<Uuid, Geofence>,
    states: HashMap<Uuid, VehicleZoneState>,
    snapshots: HashMap<Uuid, VehicleSnapshot>,
}

impl SweepContext {
    fn rule(&self, rule_id: Option<Uuid>) -> Option<&AlertRule> {
        let rule_id = rule_id?;
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    fn rules_of(&self, alert_type: AlertType) -> impl Iterator<Item = &AlertRule> {
        self.rules.iter().filter(move |r| r.alert_type == alert_type)
    }

    fn bases(&self) -> impl Iterator<Item = &Geofence> {
        self.geofences.values().filter(|g| g.category.is_home())
    }

    fn geofence_name(&self, geofence_id: Uuid) -> String {
        self.geofences
            .get(&geofence_id)
            .map_or_else(|| geofence_id.to_string(), |g| g.name.clone())
    }
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct AlertEngine {
    repos: Repositories,
    registry: GeofenceRegistry,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    settings: SettingsHandle,
    timers: EscalationTimers,
    locks: KeyedLocks<AlertKey>,
    io_timeout: Duration,
    dedup_window: chrono::Duration,
    offline_after: chrono::Duration,
    scan_limit: usize,
}

impl AlertEngine {
    pub fn new(
        config: &MonitorConfig,
        repos: Repositories,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            registry: GeofenceRegistry::new(repos.geofences.clone(), config.io_timeout),
            repos,
            sink,
            clock,
            settings,
            timers: EscalationTimers::new(),
            locks: KeyedLocks::new(),
            io_timeout: config.io_timeout,
            dedup_window: config.alert_dedup_window,
            offline_after: config.offline_after,
            scan_limit: config.active_alert_scan_limit,
        }
    }

    pub const fn timers(&self) -> &EscalationTimers {
        &self.timers
    }

    /// Release per-alert lock entries nobody holds
    pub async fn prune_locks(&self) {
        self.locks.prune().await;
    }

    // -------------------------------------------------------------------------
    // Event-driven path
    // -------------------------------------------------------------------------

    /// Raise an ENTRY/EXIT alert for a transition when an enabled rule of
    /// that type matches and no alert of that type is active for the vehicle.
    ///
    /// # Errors
    ///
    /// Persistence errors and timeouts while loading rules or storing the
    /// alert.
    pub async fn on_transition(&self, event: &GeofenceEvent) -> Result<Option<Alert>> {
        let alert_type = AlertType::from_transition(event.event_type);
        let rules = self.enabled_rules(event.organization_id).await?;
        if !rules.iter().any(|r| r.alert_type == alert_type) {
            return Ok(None);
        }

        let geofence = match self
            .registry
            .geofence(event.organization_id, event.geofence_id)
            .await
        {
            Ok(geofence) => geofence,
            Err(e) => {
                tracing::warn!(geofence_id = %event.geofence_id, error = %e, "Geofence lookup failed");
                None
            }
        };

        let ctx = transition_context(event, geofence.as_ref());
        let Some(rule) = first_match(rules.iter().filter(|r| r.alert_type == alert_type), &ctx)
        else {
            return Ok(None);
        };

        let name = geofence.map_or_else(|| event.geofence_id.to_string(), |g| g.name);
        let verb = match event.event_type {
            GeofenceEventType::Enter => "entered",
            GeofenceEventType::Exit => "left",
        };
        let message = format!("Vehicle {} {verb} {name}", event.vehicle_id);

        self.raise(AlertDraft::from_rule(
            rule,
            event.vehicle_id,
            Some(event.geofence_id),
            message,
        ))
        .await
    }

    // -------------------------------------------------------------------------
    // Periodic sweep
    // -------------------------------------------------------------------------

    /// Evaluate snapshot rules, detect long stays and auto-resolve alerts
    /// that no longer apply. Per-item failures are counted, not returned.
    pub async fn sweep(&self, organization_id: Uuid) -> SweepReport {
        let mut report = SweepReport::default();
        let ctx = self.load_sweep_context(organization_id, &mut report).await;

        self.evaluate_snapshot_rules(&ctx, &mut report).await;
        self.detect_long_stays(&ctx, &mut report).await;
        self.resolve_inapplicable(&ctx, &mut report).await;

        tracing::debug!(
            organization_id = %organization_id,
            created = report.created,
            resolved = report.resolved,
            rearmed = report.rearmed,
            failures = report.failures,
            "Sweep finished"
        );
        report
    }

    async fn load_sweep_context(&self, organization_id: Uuid, report: &mut SweepReport) -> SweepContext {
        let rules = self
            .enabled_rules(organization_id)
            .await
            .unwrap_or_else(|e| failed(report, "enabled_rules", &e));

        let geofences = self
            .registry
            .enabled_geofences(organization_id)
            .await
            .unwrap_or_else(|e| failed(report, "enabled_geofences", &e));

        let states = bounded(
            self.io_timeout,
            "list_zone_states",
            self.repos.zone_states.list_zone_states(organization_id),
        )
        .await
        .unwrap_or_else(|e| failed(report, "list_zone_states", &e));

        let snapshots = bounded(
            self.io_timeout,
            "list_snapshots",
            self.repos.vehicles.list_snapshots(organization_id),
        )
        .await
        .unwrap_or_else(|e| failed(report, "list_snapshots", &e));

        SweepContext {
            organization_id,
            now: self.clock.now(),
            settings: self.settings.get(),
            rules,
            geofences: geofences.into_iter().map(|g| (g.geofence_id, g)).collect(),
            states: states.into_iter().map(|s| (s.vehicle_id, s)).collect(),
            snapshots: snapshots.into_iter().map(|s| (s.vehicle_id, s)).collect(),
        }
    }

    async fn evaluate_snapshot_rules(&self, ctx: &SweepContext, report: &mut SweepReport) {
        if !ctx.rules.iter().any(|r| r.alert_type.is_snapshot_based()) {
            return;
        }

        for snapshot in ctx.snapshots.values() {
            let rule_ctx = self.snapshot_context(snapshot, ctx);

            for alert_type in [AlertType::Speeding, AlertType::Offline] {
                if !self.snapshot_precondition(alert_type, snapshot, ctx.now) {
                    continue;
                }
                let Some(rule) = first_match(ctx.rules_of(alert_type), &rule_ctx) else {
                    continue;
                };

                let message = match alert_type {
                    AlertType::Speeding => format!(
                        "Vehicle {} speeding at {:.1}",
                        snapshot.vehicle_id,
                        snapshot.speed.unwrap_or_default()
                    ),
                    _ => format!(
                        "Vehicle {} offline for {} min",
                        snapshot.vehicle_id,
                        (ctx.now - snapshot.last_seen).num_minutes()
                    ),
                };
                let draft = AlertDraft::from_rule(rule, snapshot.vehicle_id, None, message);
                tally(report, self.raise(draft).await);
            }
        }
    }

    fn snapshot_precondition(
        &self,
        alert_type: AlertType,
        snapshot: &VehicleSnapshot,
        now: DateTime<Utc>,
    ) -> bool {
        match alert_type {
            AlertType::Speeding => snapshot.speed.is_some(),
            AlertType::Offline => now - snapshot.last_seen >= self.offline_after,
            _ => false,
        }
    }

    fn snapshot_context(&self, snapshot: &VehicleSnapshot, ctx: &SweepContext) -> RuleContext {
        let (names, ids): (Vec<String>, Vec<String>) = ctx
            .states
            .get(&snapshot.vehicle_id)
            .map(|state| {
                state
                    .geofence_ids
                    .iter()
                    .map(|id| (ctx.geofence_name(*id), id.to_string()))
                    .unzip()
            })
            .unwrap_or_default();

        RuleContext::new()
            .with("vehicle_id", snapshot.vehicle_id.to_string())
            .with_opt("speed", snapshot.speed)
            .with_opt("heading", snapshot.heading)
            .with("minutes_since_seen", minutes_between(snapshot.last_seen, ctx.now))
            .with("is_offline", ctx.now - snapshot.last_seen >= self.offline_after)
            .with("inside_geofences", names)
            .with("inside_geofence_ids", ids)
    }

    async fn detect_long_stays(&self, ctx: &SweepContext, report: &mut SweepReport) {
        let bases: Vec<&Geofence> = ctx.bases().collect();

        for state in ctx.states.values() {
            if !bases.is_empty() && !bases.iter().any(|b| state.is_inside(b.geofence_id)) {
                self.check_long_stay_outside(ctx, state, &bases, report).await;
            }
            self.check_long_stay_inside(ctx, state, report).await;
        }
    }

    /// Most recent home-base transition is an EXIT older than the threshold
    async fn check_long_stay_outside(
        &self,
        ctx: &SweepContext,
        state: &VehicleZoneState,
        bases: &[&Geofence],
        report: &mut SweepReport,
    ) {
        let mut last_home_event: Option<GeofenceEvent> = None;
        for base in bases {
            match self.latest_event(state.vehicle_id, base.geofence_id).await {
                Ok(Some(event)) => {
                    if last_home_event
                        .as_ref()
                        .is_none_or(|last| event.timestamp > last.timestamp)
                    {
                        last_home_event = Some(event);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    failed::<()>(report, "latest_event", &e);
                }
            }
        }

        let Some(exit) = last_home_event else {
            return;
        };
        if exit.event_type != GeofenceEventType::Exit
            || ctx.now - exit.timestamp < ctx.settings.long_stay_outside()
        {
            return;
        }

        let hours = hours_between(exit.timestamp, ctx.now);
        let base_name = ctx.geofence_name(exit.geofence_id);
        let message = format!(
            "Vehicle {} away from {base_name} for {hours:.1}h",
            state.vehicle_id
        );
        let draft = self.long_stay_draft(
            ctx,
            AlertType::LongStayOutside,
            state.vehicle_id,
            exit.geofence_id,
            hours,
            message,
        );
        tally(report, self.raise(draft).await);
    }

    /// Continuously inside a non-home geofence since an ENTER older than the threshold
    async fn check_long_stay_inside(
        &self,
        ctx: &SweepContext,
        state: &VehicleZoneState,
        report: &mut SweepReport,
    ) {
        for geofence_id in &state.geofence_ids {
            let Some(geofence) = ctx.geofences.get(geofence_id) else {
                continue;
            };
            if geofence.category.is_home() {
                continue;
            }

            let enter = match self.latest_event(state.vehicle_id, *geofence_id).await {
                Ok(Some(event)) if event.event_type == GeofenceEventType::Enter => event,
                Ok(_) => continue,
                Err(e) => {
                    failed::<()>(report, "latest_event", &e);
                    continue;
                }
            };
            if ctx.now - enter.timestamp < ctx.settings.long_stay_inside() {
                continue;
            }

            let hours = hours_between(enter.timestamp, ctx.now);
            let message = format!(
                "Vehicle {} inside {} for {hours:.1}h",
                state.vehicle_id, geofence.name
            );
            let draft = self.long_stay_draft(
                ctx,
                AlertType::LongStayInside,
                state.vehicle_id,
                *geofence_id,
                hours,
                message,
            );
            tally(report, self.raise(draft).await);
            // one alert per vehicle and type
            return;
        }
    }

    fn long_stay_draft(
        &self,
        ctx: &SweepContext,
        alert_type: AlertType,
        vehicle_id: Uuid,
        geofence_id: Uuid,
        hours: f64,
        message: String,
    ) -> AlertDraft {
        let rule_ctx = ctx.geofences.get(&geofence_id).map_or_else(
            RuleContext::new,
            |g| geofence_context(RuleContext::new(), g),
        );
        let rule_ctx = rule_ctx
            .with("vehicle_id", vehicle_id.to_string())
            .with("geofence_id", geofence_id.to_string())
            .with("hours", hours);

        match first_match(ctx.rules_of(alert_type), &rule_ctx) {
            Some(rule) => AlertDraft::from_rule(rule, vehicle_id, Some(geofence_id), message),
            None => AlertDraft::builtin(
                ctx.organization_id,
                vehicle_id,
                Some(geofence_id),
                alert_type,
                default_long_stay_severity(alert_type),
                message,
            ),
        }
    }

    async fn resolve_inapplicable(&self, ctx: &SweepContext, report: &mut SweepReport) {
        let active = match bounded(
            self.io_timeout,
            "list_active_alerts",
            self.repos
                .alerts
                .list_active_alerts(ctx.organization_id, self.scan_limit),
        )
        .await
        {
            Ok(alerts) => alerts,
            Err(e) => {
                failed::<()>(report, "list_active_alerts", &e);
                return;
            }
        };

        for alert in active {
            match self.still_applies(&alert, ctx) {
                Some(false) => match self.resolve(&alert, ctx).await {
                    Ok(true) => report.resolved += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(alert_id = %alert.alert_id, error = %e, "Auto-resolution failed");
                        report.failures += 1;
                    }
                },
                Some(true) => match self.rearm_if_missing(&alert, ctx).await {
                    Ok(true) => report.rearmed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(alert_id = %alert.alert_id, error = %e, "Escalation recovery failed");
                        report.failures += 1;
                    }
                },
                None => {}
            }
        }
    }

    /// Whether the condition behind an alert still holds; `None` when it
    /// cannot be decided from the loaded data
    fn still_applies(&self, alert: &Alert, ctx: &SweepContext) -> Option<bool> {
        match alert.alert_type {
            AlertType::Entry | AlertType::LongStayInside => {
                let state = ctx.states.get(&alert.vehicle_id)?;
                Some(state.is_inside(alert.geofence_id?))
            }
            AlertType::Exit => {
                let state = ctx.states.get(&alert.vehicle_id)?;
                Some(!state.is_inside(alert.geofence_id?))
            }
            AlertType::LongStayOutside => {
                let state = ctx.states.get(&alert.vehicle_id)?;
                Some(!ctx.bases().any(|b| state.is_inside(b.geofence_id)))
            }
            AlertType::Speeding | AlertType::Offline => {
                let rule = ctx.rule(alert.rule_id)?;
                let snapshot = ctx.snapshots.get(&alert.vehicle_id)?;
                if !self.snapshot_precondition(alert.alert_type, snapshot, ctx.now) {
                    return Some(false);
                }
                let rule_ctx = self.snapshot_context(snapshot, ctx);
                match rule.matches(&rule_ctx) {
                    Ok(matched) => Some(matched),
                    Err(e) => {
                        tracing::warn!(rule_id = %rule.rule_id, error = %e, "Rule evaluation failed");
                        None
                    }
                }
            }
        }
    }

    async fn resolve(&self, alert: &Alert, ctx: &SweepContext) -> Result<bool> {
        let _guard = self.locks.lock(&alert.key()).await;

        let Some(mut current) = self.get_alert(alert.alert_id).await? else {
            return Ok(false);
        };
        if !current.is_active() {
            return Ok(false);
        }

        current.resolve(ctx.now);
        bounded(
            self.io_timeout,
            "update_alert",
            self.repos.alerts.update_alert(&current),
        )
        .await?;
        self.timers.cancel(current.alert_id).await;

        tracing::info!(
            alert_id = %current.alert_id,
            vehicle_id = %current.vehicle_id,
            alert_type = %current.alert_type,
            "Alert auto-resolved"
        );

        let (channels, recipients) = ctx.rule(current.rule_id).map_or_else(
            || (vec![NotificationChannel::Log], Vec::new()),
            |r| (r.channels.clone(), r.recipients.clone()),
        );
        let message = format!("Resolved: {}", current.message);
        self.dispatch(&channels, &current, &message, &recipients).await;
        Ok(true)
    }

    /// Re-arm the next escalation of an active alert whose timer was lost,
    /// e.g. across a restart
    async fn rearm_if_missing(&self, alert: &Alert, ctx: &SweepContext) -> Result<bool> {
        let Some(policy) = ctx.rule(alert.rule_id).and_then(AlertRule::escalation_policy) else {
            return Ok(false);
        };
        if self.timers.is_armed(alert.alert_id).await {
            return Ok(false);
        }

        let _guard = self.locks.lock(&alert.key()).await;
        let Some(current) = self.get_alert(alert.alert_id).await? else {
            return Ok(false);
        };
        if !current.is_active() || self.timers.is_armed(current.alert_id).await {
            return Ok(false);
        }

        let next = current.escalation_level + 1;
        if policy.level(next).is_none() {
            return Ok(false);
        }
        let elapsed_minutes: i64 = (1..=next)
            .filter_map(|ordinal| policy.level(ordinal))
            .map(|level| i64::from(level.delay_minutes))
            .sum();

        self.timers
            .arm(PendingEscalation {
                alert_id: current.alert_id,
                key: current.key(),
                level: next,
                due_at: current.created_at + chrono::Duration::minutes(elapsed_minutes),
                policy,
            })
            .await;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Escalation
    // -------------------------------------------------------------------------

    /// Fire every escalation due at the clock's current time
    pub async fn fire_due_escalations(&self) -> EscalationReport {
        let mut report = EscalationReport::default();

        for pending in self.timers.take_due(self.clock.now()).await {
            match self.escalate(&pending).await {
                Ok(true) => report.escalated += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        alert_id = %pending.alert_id,
                        level = pending.level,
                        error = %e,
                        "Escalation failed, retrying on next poll"
                    );
                    report.failures += 1;
                    self.timers.arm(pending).await;
                }
            }
        }
        report
    }

    async fn escalate(&self, pending: &PendingEscalation) -> Result<bool> {
        let _guard = self.locks.lock(&pending.key).await;

        let Some(mut alert) = self.get_alert(pending.alert_id).await? else {
            return Ok(false);
        };
        if !alert.is_active() || pending.level != alert.escalation_level + 1 {
            tracing::debug!(alert_id = %alert.alert_id, "Dropping stale escalation");
            return Ok(false);
        }
        let Some(level) = pending.policy.level(pending.level).cloned() else {
            return Ok(false);
        };

        alert.escalation_level = pending.level;
        bounded(
            self.io_timeout,
            "update_alert",
            self.repos.alerts.update_alert(&alert),
        )
        .await?;

        tracing::warn!(
            alert_id = %alert.alert_id,
            vehicle_id = %alert.vehicle_id,
            alert_type = %alert.alert_type,
            level = alert.escalation_level,
            "Alert escalated"
        );

        let message = format!("Escalation level {}: {}", alert.escalation_level, alert.message);
        self.dispatch(&level.channels, &alert, &message, &level.recipients)
            .await;
        self.arm_next(&alert, pending.policy.clone(), self.clock.now())
            .await;
        Ok(true)
    }

    /// Schedule the level after the alert's current one, if the policy has it
    async fn arm_next(&self, alert: &Alert, policy: EscalationPolicy, from: DateTime<Utc>) {
        let next = alert.escalation_level + 1;
        let Some(delay) = policy.level(next).map(|l| l.delay_minutes) else {
            return;
        };
        self.timers
            .arm(PendingEscalation {
                alert_id: alert.alert_id,
                key: alert.key(),
                level: next,
                due_at: from + chrono::Duration::minutes(i64::from(delay)),
                policy,
            })
            .await;
    }

    // -------------------------------------------------------------------------
    // Acknowledgement
    // -------------------------------------------------------------------------

    /// Acknowledge an alert and cancel its pending escalation.
    ///
    /// Acknowledging an alert that is no longer active returns it unchanged.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id; persistence errors and timeouts.
    pub async fn acknowledge(&self, alert_id: Uuid, user: &str) -> Result<Alert> {
        let alert = self
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| MonitorError::not_found("Alert", alert_id))?;

        let _guard = self.locks.lock(&alert.key()).await;
        let mut current = self
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| MonitorError::not_found("Alert", alert_id))?;
        if !current.is_active() {
            return Ok(current);
        }

        self.timers.cancel(alert_id).await;
        current.acknowledge(user, self.clock.now());
        bounded(
            self.io_timeout,
            "update_alert",
            self.repos.alerts.update_alert(&current),
        )
        .await?;

        tracing::info!(
            alert_id = %alert_id,
            vehicle_id = %current.vehicle_id,
            acknowledged_by = user,
            "Alert acknowledged"
        );
        Ok(current)
    }

    // -------------------------------------------------------------------------
    // Shared steps
    // -------------------------------------------------------------------------

    /// Create the alert unless one is active (or, for long stays, recent)
    /// for the same vehicle and type
    async fn raise(&self, draft: AlertDraft) -> Result<Option<Alert>> {
        let key = AlertKey::new(draft.vehicle_id, draft.alert_type);
        let _guard = self.locks.lock(&key).await;
        let now = self.clock.now();

        let active = bounded(
            self.io_timeout,
            "find_active_alert",
            self.repos
                .alerts
                .find_active_alert(draft.vehicle_id, draft.alert_type),
        )
        .await?;
        if active.is_some() {
            tracing::trace!(vehicle_id = %draft.vehicle_id, alert_type = %draft.alert_type, "Active alert exists");
            return Ok(None);
        }

        if draft.windowed {
            let recent = bounded(
                self.io_timeout,
                "find_recent_alert",
                self.repos.alerts.find_recent_alert(
                    draft.vehicle_id,
                    draft.alert_type,
                    now.checked_sub_signed(self.dedup_window)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                ),
            )
            .await?;
            if recent.is_some() {
                tracing::trace!(vehicle_id = %draft.vehicle_id, alert_type = %draft.alert_type, "Alert raised within dedup window");
                return Ok(None);
            }
        }

        let alert = Alert::new(
            draft.organization_id,
            draft.vehicle_id,
            draft.geofence_id,
            draft.alert_type,
            draft.severity,
            draft.rule_id,
            draft.message,
            now,
        );
        bounded(
            self.io_timeout,
            "create_alert",
            self.repos.alerts.create_alert(&alert),
        )
        .await?;

        tracing::info!(
            alert_id = %alert.alert_id,
            vehicle_id = %alert.vehicle_id,
            alert_type = %alert.alert_type,
            severity = alert.severity.as_str(),
            "Alert raised"
        );

        if self.settings.get().notifies_on(alert.alert_type) {
            self.dispatch(&draft.channels, &alert, &alert.message, &draft.recipients)
                .await;
        }
        if let Some(policy) = draft.escalation {
            self.arm_next(&alert, policy, now).await;
        }
        Ok(Some(alert))
    }

    /// Notify every channel; failures are logged and never propagate
    async fn dispatch(
        &self,
        channels: &[NotificationChannel],
        alert: &Alert,
        message: &str,
        recipients: &[String],
    ) {
        for channel in channels {
            if let Err(e) = bounded(
                self.io_timeout,
                "notify",
                self.sink.notify(*channel, alert, message, recipients),
            )
            .await
            {
                tracing::warn!(
                    alert_id = %alert.alert_id,
                    channel = channel.as_str(),
                    error = %e,
                    "Notification failed"
                );
            }
        }
    }

    async fn enabled_rules(&self, organization_id: Uuid) -> Result<Vec<AlertRule>> {
        bounded(
            self.io_timeout,
            "enabled_rules",
            self.repos.rules.enabled_rules(organization_id),
        )
        .await
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>> {
        bounded(
            self.io_timeout,
            "get_alert",
            self.repos.alerts.get_alert(alert_id),
        )
        .await
    }

    async fn latest_event(&self, vehicle_id: Uuid, geofence_id: Uuid) -> Result<Option<GeofenceEvent>> {
        bounded(
            self.io_timeout,
            "latest_event",
            self.repos.events.latest_event(vehicle_id, geofence_id),
        )
        .await
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// First rule whose conditions all hold; rules that fail to evaluate are skipped
fn first_match<'a>(
    rules: impl IntoIterator<Item = &'a AlertRule>,
    ctx: &RuleContext,
) -> Option<&'a AlertRule> {
    rules.into_iter().find(|rule| match rule.matches(ctx) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::warn!(rule_id = %rule.rule_id, rule = %rule.name, error = %e, "Skipping rule");
            false
        }
    })
}

fn transition_context(event: &GeofenceEvent, geofence: Option<&Geofence>) -> RuleContext {
    let ctx = RuleContext::new()
        .with("event_type", event.event_type.as_str())
        .with("vehicle_id", event.vehicle_id.to_string())
        .with("geofence_id", event.geofence_id.to_string())
        .with_opt("speed", event.speed)
        .with_opt("heading", event.heading);
    match geofence {
        Some(g) => geofence_context(ctx, g),
        None => ctx,
    }
}

fn geofence_context(ctx: RuleContext, geofence: &Geofence) -> RuleContext {
    ctx.with("geofence_name", geofence.name.as_str())
        .with("geofence_category", geofence.category.as_str())
        .with("geofence_mode", geofence.mode.as_str())
}

fn tally(report: &mut SweepReport, outcome: Result<Option<Alert>>) {
    match outcome {
        Ok(Some(_)) => report.created += 1,
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(error = %e, code = e.error_code(), "Failed to raise alert");
            report.failures += 1;
        }
    }
}

fn failed<T: Default>(report: &mut SweepReport, operation: &str, error: &MonitorError) -> T {
    tracing::warn!(operation, error = %error, "Sweep step failed");
    report.failures += 1;
    T::default()
}

#[allow(clippy::cast_precision_loss)]
fn minutes_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / 60.0
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    minutes_between(from, to) / 60.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::RecordingSink;
    use chrono::Duration as TimeDelta;
    use fleet_domain::{
        ConditionOperator, Coordinates, EscalationLevel, GeofenceCategory, GeofenceGeometry,
        RuleCondition,
    };
    use fleet_persistence::{AlertRepository, MemoryStore, ZoneStateRepository};
    use std::collections::BTreeSet;

    struct Fixture {
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
        clock: Arc<ManualClock>,
        settings: SettingsHandle,
        engine: AlertEngine,
        org: Uuid,
        vehicle: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let settings = SettingsHandle::default();
        let engine = AlertEngine::new(
            &MonitorConfig::default(),
            Repositories::from_store(store.clone()),
            sink.clone(),
            clock.clone(),
            settings.clone(),
        );
        Fixture {
            store,
            sink,
            clock,
            settings,
            engine,
            org: Uuid::new_v4(),
            vehicle: Uuid::new_v4(),
        }
    }

    fn event(f: &Fixture, geofence_id: Uuid, event_type: GeofenceEventType, at: DateTime<Utc>) -> GeofenceEvent {
        GeofenceEvent {
            event_id: Uuid::now_v7(),
            geofence_id,
            vehicle_id: f.vehicle,
            organization_id: f.org,
            event_type,
            timestamp: at,
            position: Coordinates::new(0.0, 0.0),
            speed: Some(40.0),
            heading: None,
        }
    }

    async fn set_membership(f: &Fixture, geofences: &[Uuid]) {
        let state = VehicleZoneState::new(
            f.vehicle,
            f.org,
            geofences.iter().copied().collect::<BTreeSet<_>>(),
            f.clock.now(),
        );
        f.store.set_membership(&state).await.unwrap();
    }

    #[tokio::test]
    async fn test_transition_without_rule_raises_nothing() {
        let f = fixture();
        let raised = f
            .engine
            .on_transition(&event(&f, Uuid::new_v4(), GeofenceEventType::Exit, f.clock.now()))
            .await
            .unwrap();
        assert!(raised.is_none());
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let f = fixture();
        let slow = AlertRule::new(f.org, "a-slow exit", AlertType::Exit, AlertSeverity::Low)
            .with_condition(RuleCondition::new("speed", ConditionOperator::Lt, 10.0));
        let any = AlertRule::new(f.org, "b-any exit", AlertType::Exit, AlertSeverity::Medium);
        f.store.insert_rule(slow).await;
        f.store.insert_rule(any.clone()).await;

        let alert = f
            .engine
            .on_transition(&event(&f, Uuid::new_v4(), GeofenceEventType::Exit, f.clock.now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.rule_id, Some(any.rule_id));
        assert_eq!(alert.severity, AlertSeverity::Medium);
        assert_eq!(f.sink.len().await, 1);
    }

    #[tokio::test]
    async fn test_rule_type_mismatch_is_skipped() {
        let f = fixture();
        let broken = AlertRule::new(f.org, "a-broken", AlertType::Entry, AlertSeverity::High)
            .with_condition(RuleCondition::new("speed", ConditionOperator::Gt, "fast"));
        let fallback = AlertRule::new(f.org, "b-fallback", AlertType::Entry, AlertSeverity::Low);
        f.store.insert_rule(broken).await;
        f.store.insert_rule(fallback.clone()).await;

        let alert = f
            .engine
            .on_transition(&event(&f, Uuid::new_v4(), GeofenceEventType::Enter, f.clock.now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.rule_id, Some(fallback.rule_id));
    }

    #[tokio::test]
    async fn test_notify_flag_suppresses_creation_notification_only() {
        let f = fixture();
        f.store
            .insert_rule(AlertRule::new(f.org, "entry", AlertType::Entry, AlertSeverity::Low))
            .await;
        f.settings.update(|s| s.notify_on_entry = false);

        let alert = f
            .engine
            .on_transition(&event(&f, Uuid::new_v4(), GeofenceEventType::Enter, f.clock.now()))
            .await
            .unwrap();
        assert!(alert.is_some());
        assert!(f.sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_escalation_walks_levels_then_stops() {
        let f = fixture();
        let mut rule = AlertRule::new(f.org, "exit", AlertType::Exit, AlertSeverity::High);
        rule.auto_escalate = true;
        rule.escalation = Some(EscalationPolicy {
            levels: vec![
                EscalationLevel {
                    delay_minutes: 10,
                    channels: vec![NotificationChannel::Sms],
                    recipients: vec!["supervisor".into()],
                },
                EscalationLevel {
                    delay_minutes: 20,
                    channels: vec![NotificationChannel::Email],
                    recipients: vec!["director".into()],
                },
            ],
        });
        f.store.insert_rule(rule).await;

        let alert = f
            .engine
            .on_transition(&event(&f, Uuid::new_v4(), GeofenceEventType::Exit, f.clock.now()))
            .await
            .unwrap()
            .unwrap();

        f.clock.advance(TimeDelta::minutes(9));
        assert_eq!(f.engine.fire_due_escalations().await.escalated, 0);

        f.clock.advance(TimeDelta::minutes(1));
        assert_eq!(f.engine.fire_due_escalations().await.escalated, 1);

        f.clock.advance(TimeDelta::minutes(20));
        assert_eq!(f.engine.fire_due_escalations().await.escalated, 1);

        f.clock.advance(TimeDelta::hours(5));
        assert_eq!(f.engine.fire_due_escalations().await.escalated, 0);
        assert!(f.engine.timers().is_empty().await);

        let stored = f.store.get_alert(alert.alert_id).await.unwrap().unwrap();
        assert_eq!(stored.escalation_level, 2);

        let sent = f.sink.for_alert(alert.alert_id).await;
        let channels: Vec<_> = sent.iter().map(|n| n.channel).collect();
        assert_eq!(
            channels,
            vec![NotificationChannel::Log, NotificationChannel::Sms, NotificationChannel::Email]
        );
        assert_eq!(sent[2].recipients, vec!["director".to_string()]);
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_alert_is_not_found() {
        let f = fixture();
        let err = f.engine.acknowledge(Uuid::new_v4(), "ops").await.unwrap_err();
        assert!(matches!(err, MonitorError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_acknowledge_twice_keeps_first_acknowledger() {
        let f = fixture();
        f.store
            .insert_rule(AlertRule::new(f.org, "exit", AlertType::Exit, AlertSeverity::Low).with_escalation(5))
            .await;
        let alert = f
            .engine
            .on_transition(&event(&f, Uuid::new_v4(), GeofenceEventType::Exit, f.clock.now()))
            .await
            .unwrap()
            .unwrap();
        assert!(f.engine.timers().is_armed(alert.alert_id).await);

        let first = f.engine.acknowledge(alert.alert_id, "alice").await.unwrap();
        let second = f.engine.acknowledge(alert.alert_id, "bob").await.unwrap();
        assert_eq!(first.acknowledged_by.as_deref(), Some("alice"));
        assert_eq!(second.acknowledged_by.as_deref(), Some("alice"));
        assert!(!f.engine.timers().is_armed(alert.alert_id).await);
    }

    #[tokio::test]
    async fn test_acknowledge_after_timer_taken_drops_escalation() {
        let f = fixture();
        f.store
            .insert_rule(AlertRule::new(f.org, "exit", AlertType::Exit, AlertSeverity::High).with_escalation(5))
            .await;
        let alert = f
            .engine
            .on_transition(&event(&f, Uuid::new_v4(), GeofenceEventType::Exit, f.clock.now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.sink.len().await, 1);

        f.clock.advance(TimeDelta::minutes(6));
        let due = f.engine.timers().take_due(f.clock.now()).await;
        assert_eq!(due.len(), 1);

        f.engine.acknowledge(alert.alert_id, "ops").await.unwrap();
        assert!(!f.engine.escalate(&due[0]).await.unwrap());

        let stored = f.store.get_alert(alert.alert_id).await.unwrap().unwrap();
        assert_eq!(stored.escalation_level, 0);
        assert_eq!(stored.acknowledged_by.as_deref(), Some("ops"));
        assert_eq!(f.sink.len().await, 1);
        assert!(f.engine.timers().is_empty().await);
    }

    #[tokio::test]
    async fn test_long_stay_inside_uses_default_severity() {
        let f = fixture();
        let hospital = Geofence::new(
            f.org,
            "St. Mary",
            GeofenceCategory::Hospital,
            GeofenceGeometry::circle(Coordinates::new(0.0, 0.0), 300.0),
        );
        f.store.insert_geofence(hospital.clone()).await;

        let entered = f.clock.now();
        fleet_persistence::GeofenceEventRepository::create_event(
            f.store.as_ref(),
            &event(&f, hospital.geofence_id, GeofenceEventType::Enter, entered),
        )
        .await
        .unwrap();
        set_membership(&f, &[hospital.geofence_id]).await;

        f.clock.advance(TimeDelta::minutes(119));
        assert_eq!(f.engine.sweep(f.org).await.created, 0);

        f.clock.advance(TimeDelta::minutes(2));
        let report = f.engine.sweep(f.org).await;
        assert_eq!(report.created, 1);

        let alerts = f.store.all_alerts().await;
        assert_eq!(alerts[0].alert_type, AlertType::LongStayInside);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
        assert_eq!(alerts[0].geofence_id, Some(hospital.geofence_id));
    }

    #[tokio::test]
    async fn test_offline_rule_raises_and_resolves() {
        let f = fixture();
        f.store
            .insert_rule(AlertRule::new(f.org, "offline", AlertType::Offline, AlertSeverity::Medium))
            .await;
        let mut snapshot = VehicleSnapshot {
            vehicle_id: f.vehicle,
            organization_id: f.org,
            position: Coordinates::new(0.0, 0.0),
            speed: None,
            heading: None,
            last_seen: f.clock.now(),
        };
        fleet_persistence::VehicleStatusRepository::upsert_snapshot(f.store.as_ref(), &snapshot)
            .await
            .unwrap();

        f.clock.advance(TimeDelta::minutes(10));
        assert_eq!(f.engine.sweep(f.org).await.created, 0);

        f.clock.advance(TimeDelta::minutes(6));
        assert_eq!(f.engine.sweep(f.org).await.created, 1);
        assert_eq!(f.engine.sweep(f.org).await.created, 0);

        snapshot.last_seen = f.clock.now();
        fleet_persistence::VehicleStatusRepository::upsert_snapshot(f.store.as_ref(), &snapshot)
            .await
            .unwrap();
        let report = f.engine.sweep(f.org).await;
        assert_eq!(report.resolved, 1);
        assert!(f.store.list_active_alerts(f.org, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lost_timer_is_rearmed_on_sweep() {
        let f = fixture();
        let base = Uuid::new_v4();
        f.store
            .insert_rule(AlertRule::new(f.org, "exit", AlertType::Exit, AlertSeverity::High).with_escalation(15))
            .await;
        let alert = f
            .engine
            .on_transition(&event(&f, base, GeofenceEventType::Exit, f.clock.now()))
            .await
            .unwrap()
            .unwrap();
        set_membership(&f, &[]).await;

        // simulate a restart losing the in-memory timer
        f.engine.timers().cancel(alert.alert_id).await;

        let report = f.engine.sweep(f.org).await;
        assert_eq!(report.rearmed, 1);
        assert_eq!(
            f.engine.timers().next_due().await,
            Some(alert.created_at + TimeDelta::minutes(15))
        );
    }
}
