//! Append-only connection event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

/// A stored log entry. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionLog {
    pub id: String,
    pub connection_id: String,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<Value>,
    pub duration_ms: Option<i64>,
    pub response_size: Option<i64>,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A log entry about to be appended
#[derive(Debug, Clone)]
pub struct NewConnectionLog {
    pub connection_id: String,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<Value>,
    pub duration_ms: Option<i64>,
    pub response_size: Option<i64>,
    pub user_id: Option<String>,
}

impl NewConnectionLog {
    pub fn new(connection_id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            level,
            message: message.into(),
            details: None,
            duration_ms: None,
            response_size: None,
            user_id: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_duration(mut self, duration_ms: Option<u64>) -> Self {
        self.duration_ms = duration_ms.and_then(|d| i64::try_from(d).ok());
        self
    }

    pub fn with_response_size(mut self, size: Option<usize>) -> Self {
        self.response_size = size.and_then(|s| i64::try_from(s).ok());
        self
    }

    pub fn by(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(str::to_string);
        self
    }

    pub fn into_log(self, id: String, timestamp: DateTime<Utc>) -> ConnectionLog {
        ConnectionLog {
            id,
            connection_id: self.connection_id,
            level: self.level,
            message: self.message,
            details: self.details,
            duration_ms: self.duration_ms,
            response_size: self.response_size,
            user_id: self.user_id,
            timestamp,
        }
    }
}

/// Warn/error log entry joined with the name of its connection
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionAlert {
    #[serde(flatten)]
    pub log: ConnectionLog,
    pub connection_name: String,
}
