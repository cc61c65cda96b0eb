//! # Escalation Timers
//!
//! Cancellable escalation deadlines, one per alert, evaluated against the
//! injected [`Clock`](crate::clock::Clock). The queue holds no tasks of its
//! own: the scheduler polls [`EscalationTimers::take_due`] and hands the
//! expired entries to the alert engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use fleet_domain::{AlertKey, EscalationPolicy};

/// A scheduled escalation of one alert to `level`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEscalation {
    pub alert_id: Uuid,
    pub key: AlertKey,
    /// 1-based level reached when this fires
    pub level: u32,
    pub due_at: DateTime<Utc>,
    pub policy: EscalationPolicy,
}

#[derive(Default)]
pub struct EscalationTimers {
    pending: Mutex<HashMap<Uuid, PendingEscalation>>,
}

impl EscalationTimers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an escalation, replacing any timer already held for the alert
    pub async fn arm(&self, pending: PendingEscalation) {
        tracing::debug!(
            alert_id = %pending.alert_id,
            level = pending.level,
            due_at = %pending.due_at,
            "Escalation armed"
        );
        self.pending.lock().await.insert(pending.alert_id, pending);
    }

    /// Cancel the alert's timer; returns whether one was pending
    pub async fn cancel(&self, alert_id: Uuid) -> bool {
        let cancelled = self.pending.lock().await.remove(&alert_id).is_some();
        if cancelled {
            tracing::debug!(%alert_id, "Escalation cancelled");
        }
        cancelled
    }

    pub async fn is_armed(&self, alert_id: Uuid) -> bool {
        self.pending.lock().await.contains_key(&alert_id)
    }

    /// Remove and return every timer due at `now`, earliest first
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<PendingEscalation> {
        let mut pending = self.pending.lock().await;
        let due_ids: Vec<Uuid> = pending
            .values()
            .filter(|p| p.due_at <= now)
            .map(|p| p.alert_id)
            .collect();

        let mut due: Vec<PendingEscalation> = due_ids
            .into_iter()
            .filter_map(|id| pending.remove(&id))
            .collect();
        due.sort_by_key(|p| p.due_at);
        due
    }

    /// Earliest pending deadline
    pub async fn next_due(&self) -> Option<DateTime<Utc>> {
        self.pending.lock().await.values().map(|p| p.due_at).min()
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fleet_domain::AlertType;

    fn pending(alert_id: Uuid, level: u32, due_at: DateTime<Utc>) -> PendingEscalation {
        PendingEscalation {
            alert_id,
            key: AlertKey::new(Uuid::nil(), AlertType::Exit),
            level,
            due_at,
            policy: EscalationPolicy::default(),
        }
    }

    #[tokio::test]
    async fn test_take_due_returns_only_expired() {
        let timers = EscalationTimers::new();
        let now = Utc::now();
        let (early, late) = (Uuid::new_v4(), Uuid::new_v4());

        timers.arm(pending(late, 1, now + Duration::minutes(10))).await;
        timers.arm(pending(early, 1, now - Duration::minutes(1))).await;

        let due = timers.take_due(now).await;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].alert_id, early);
        assert!(timers.is_armed(late).await);
        assert_eq!(timers.next_due().await, Some(now + Duration::minutes(10)));
    }

    #[tokio::test]
    async fn test_one_timer_per_alert() {
        let timers = EscalationTimers::new();
        let now = Utc::now();
        let id = Uuid::new_v4();

        timers.arm(pending(id, 1, now)).await;
        timers.arm(pending(id, 2, now + Duration::minutes(5))).await;
        assert_eq!(timers.len().await, 1);

        assert!(timers.take_due(now).await.is_empty());
        assert!(timers.cancel(id).await);
        assert!(!timers.cancel(id).await);
        assert!(timers.is_empty().await);
    }
}
