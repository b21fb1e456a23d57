//! Store error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Could not reach or open the database
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Not found: {entity_type} with id '{identifier}'")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored column held a value the domain types cannot represent
    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PersistenceError {
    pub fn not_found(entity_type: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            identifier: identifier.into(),
        }
    }

    pub fn corrupt(table: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::CorruptRow {
            table,
            reason: reason.to_string(),
        }
    }

    /// HTTP status for API responses
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
