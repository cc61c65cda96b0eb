//! # Notification Sinks
//!
//! Delivery of alert notifications is outside the monitor; a sink only has
//! to accept them. The engine logs sink failures and carries on.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use crate::error::{MonitorError, Result};
use fleet_domain::{Alert, NotificationChannel};

/// A notification as handed to a sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub channel: NotificationChannel,
    pub alert: Alert,
    pub message: String,
    pub recipients: Vec<String>,
}

/// Outbound notification boundary
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        channel: NotificationChannel,
        alert: &Alert,
        message: &str,
        recipients: &[String],
    ) -> Result<()>;
}

// =============================================================================
// LOG SINK
// =============================================================================

/// Writes every notification to the structured log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(
        &self,
        channel: NotificationChannel,
        alert: &Alert,
        message: &str,
        recipients: &[String],
    ) -> Result<()> {
        tracing::info!(
            channel = channel.as_str(),
            alert_id = %alert.alert_id,
            vehicle_id = %alert.vehicle_id,
            alert_type = %alert.alert_type,
            severity = alert.severity.as_str(),
            escalation_level = alert.escalation_level,
            recipients = ?recipients,
            "{message}"
        );
        Ok(())
    }
}

// =============================================================================
// BROADCAST SINK
// =============================================================================

/// Publishes notifications on a broadcast channel for in-process consumers
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn notify(
        &self,
        channel: NotificationChannel,
        alert: &Alert,
        message: &str,
        recipients: &[String],
    ) -> Result<()> {
        let notification = Notification {
            channel,
            alert: alert.clone(),
            message: message.to_string(),
            recipients: recipients.to_vec(),
        };
        self.tx
            .send(notification)
            .map(|_| ())
            .map_err(|_| MonitorError::Notification {
                channel: channel.as_str().to_string(),
                message: "no subscribers".to_string(),
            })
    }
}

// =============================================================================
// RECORDING SINK
// =============================================================================

/// Keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.records.lock().await.clone()
    }

    /// Notifications about one alert, in delivery order
    pub async fn for_alert(&self, alert_id: Uuid) -> Vec<Notification> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|n| n.alert.alert_id == alert_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn clear(&self) {
        self.records.lock().await.clear();
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(
        &self,
        channel: NotificationChannel,
        alert: &Alert,
        message: &str,
        recipients: &[String],
    ) -> Result<()> {
        self.records.lock().await.push(Notification {
            channel,
            alert: alert.clone(),
            message: message.to_string(),
            recipients: recipients.to_vec(),
        });
        Ok(())
    }
}

/// Delivers to several sinks; fails if any of them fails
pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl NotificationSink for FanoutSink {
    async fn notify(
        &self,
        channel: NotificationChannel,
        alert: &Alert,
        message: &str,
        recipients: &[String],
    ) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.notify(channel, alert, message, recipients).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleet_domain::{AlertSeverity, AlertType};

    fn alert() -> Alert {
        Alert::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            None,
            AlertType::Offline,
            AlertSeverity::Medium,
            None,
            "Vehicle offline",
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        let alert = alert();

        sink.notify(NotificationChannel::Push, &alert, "offline", &["ops".to_string()])
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.alert.alert_id, alert.alert_id);
        assert_eq!(received.channel, NotificationChannel::Push);
        assert_eq!(received.recipients, vec!["ops".to_string()]);
    }

    #[tokio::test]
    async fn test_broadcast_sink_without_subscribers_reports_error() {
        let sink = BroadcastSink::new(8);
        let result = sink
            .notify(NotificationChannel::Log, &alert(), "offline", &[])
            .await;
        assert!(matches!(result, Err(MonitorError::Notification { .. })));
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_sink() {
        let a = Arc::new(RecordingSink::new());
        let b = Arc::new(RecordingSink::new());
        let fanout = FanoutSink::new(vec![a.clone(), b.clone(), Arc::new(BroadcastSink::new(1))]);

        let result = fanout
            .notify(NotificationChannel::Email, &alert(), "offline", &[])
            .await;

        // the broadcast sink has no subscriber
        assert!(result.is_err());
        assert_eq!(a.len().await, 1);
        assert_eq!(b.len().await, 1);
    }
}
