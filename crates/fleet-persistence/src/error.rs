//! Store and cache errors

use thiserror::Error;

/// Errors raised by repositories and membership caches
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Redis error: {0}")]
    Redis(String),

    /// Stored JSON no longer decodes into the domain type
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: &'static str, id: String },

    /// Injected or backend-specific failure of the primary store
    #[error("Store error: {0}")]
    Backend(String),

    #[error("Membership cache error: {0}")]
    Cache(String),

    /// Create of an id that already exists
    #[error("Write conflict: {0}")]
    WriteConflict(String),
}

impl PersistenceError {
    pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for PersistenceError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = PersistenceError::not_found("Alert", "42");
        assert_eq!(err.to_string(), "Alert not found: 42");
    }

    #[test]
    fn test_decode_failure_is_serialization() {
        let err: PersistenceError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert!(matches!(err, PersistenceError::Serialization(_)));
    }
}
