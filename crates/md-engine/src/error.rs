//! Engine Error Types

use md_gateway::GatewayError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Upstream error: {0}")]
    Upstream(#[from] GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether the underlying cause is a rejected duplicate (unique index).
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Map a sqlx error, turning unique-index violations into conflicts.
pub fn map_insert_error(e: sqlx::Error, what: &str) -> EngineError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            EngineError::conflict(format!("duplicate {what}"))
        }
        _ => EngineError::Database(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_helpers() {
        let e = EngineError::validation("content too long");
        assert!(matches!(e, EngineError::Validation { .. }));

        let e = EngineError::not_found("Mention", 7);
        assert_eq!(e.to_string(), "Mention not found: 7");

        assert!(EngineError::conflict("dup").is_conflict());
        assert!(!EngineError::internal("x").is_conflict());
    }
}
