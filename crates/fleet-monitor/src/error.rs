//! # Monitor Error Types
//!
//! Errors surfaced by the monitoring core. None of them is fatal to the
//! ingestion loop: callers log and move on to the next item.

use std::future::Future;
use std::time::Duration;

use fleet_domain::DomainError;
use fleet_persistence::PersistenceError;
use thiserror::Error;

/// Monitoring core errors
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Entity not found: {entity_type} with id '{id}'")]
    NotFound { entity_type: String, id: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("Notification via {channel} failed: {message}")]
    Notification { channel: String, message: String },

    #[error("Position source error: {0}")]
    Source(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
}

impl MonitorError {
    pub fn not_found(entity_type: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }

    /// Error code for structured logs
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Domain(_) => "DOMAIN_ERROR",
            Self::Notification { .. } => "NOTIFICATION_ERROR",
            Self::Source(_) => "SOURCE_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

/// Run one external call under a deadline
pub(crate) async fn bounded<T, E, F>(limit: Duration, operation: &'static str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<MonitorError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(MonitorError::Timeout {
            operation,
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
