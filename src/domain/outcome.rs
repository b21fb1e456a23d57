//! Value objects returned by provider calls. Never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;

use super::connection::ConnectionType;

/// Outcome of connect, disconnect or test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ConnectionTestResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            response_time_ms: None,
            status_code: None,
            metadata: Map::new(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::ok(message)
        }
    }

    pub fn elapsed_since(mut self, started: Instant) -> Self {
        self.response_time_ms = Some(elapsed_ms(started));
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Failure reason suitable for `last_error`; never empty.
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .filter(|e| !e.is_empty())
            .or_else(|| Some(self.message.clone()).filter(|m| !m.is_empty()))
            .unwrap_or_else(|| "Connection test failed".to_string())
    }
}

/// Outcome of `execute_query`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub rows: Vec<Map<String, Value>>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    pub fn rows(columns: Vec<String>, rows: Vec<Map<String, Value>>, started: Instant) -> Self {
        Self {
            success: true,
            row_count: rows.len(),
            rows,
            columns,
            execution_time_ms: elapsed_ms(started),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, started: Instant) -> Self {
        Self {
            success: false,
            rows: Vec::new(),
            columns: Vec::new(),
            row_count: 0,
            execution_time_ms: elapsed_ms(started),
            error: Some(error.into()),
        }
    }
}

/// Read-only introspection used for the active connections listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub driver: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub is_connected: bool,
}

pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Column names of the first row, in row order.
pub fn columns_of(rows: &[Map<String, Value>]) -> Vec<String> {
    rows.first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_prefers_error_then_message() {
        let r = ConnectionTestResult::failed("Connection failed", "timeout");
        assert_eq!(r.failure_reason(), "timeout");

        let mut r = ConnectionTestResult::failed("Connection failed", "");
        assert_eq!(r.failure_reason(), "Connection failed");

        r.message.clear();
        assert_eq!(r.failure_reason(), "Connection test failed");
    }

    #[test]
    fn test_query_result_counts_rows() {
        let mut row = Map::new();
        row.insert("n".into(), Value::from(1));
        let result = QueryResult::rows(vec!["n".into()], vec![row.clone(), row], Instant::now());
        assert!(result.success);
        assert_eq!(result.row_count, 2);
        assert!(result.error.is_none());
    }
}
