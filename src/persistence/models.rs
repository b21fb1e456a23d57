//! Row mapping between the store and domain types.
//!
//! Timestamps are RFC 3339 text, maps and lists are JSON text, booleans are integers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::domain::{Connection, ConnectionLog, HealthCheckConfig};
use crate::persistence::error::PersistenceError;

pub(crate) const CONNECTION_COLUMNS: &str = "id, user_id, name, description, connection_type, \
    provider, driver, host, port, database_name, username, config, credentials, health_check, \
    status, is_active, tags, category, version, last_connected_at, last_tested_at, \
    last_health_check, last_error, error_count, success_count, created_at, updated_at, \
    created_by, updated_by";

pub(crate) const LOG_COLUMNS: &str =
    "id, connection_id, level, message, details, duration_ms, response_size, user_id, logged_at";

pub(crate) fn ts(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn ts_opt(value: &Option<DateTime<Utc>>) -> Option<String> {
    value.as_ref().map(ts)
}

fn parse_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::corrupt(table, format!("timestamp '{}': {}", raw, e)))
}

fn parse_ts_opt(
    table: &'static str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, PersistenceError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| parse_ts(table, &s))
        .transpose()
}

fn parse_enum<T: std::str::FromStr<Err = String>>(
    table: &'static str,
    raw: &str,
) -> Result<T, PersistenceError> {
    raw.parse().map_err(|e: String| PersistenceError::corrupt(table, e))
}

pub(crate) fn connection_from_row(row: &AnyRow) -> Result<Connection, PersistenceError> {
    const TABLE: &str = "connections";

    let connection_type: String = row.try_get("connection_type")?;
    let status: String = row.try_get("status")?;
    let config: String = row.try_get("config")?;
    let health_check: String = row.try_get("health_check")?;
    let tags: String = row.try_get("tags")?;
    let port: Option<i64> = row.try_get("port")?;
    let is_active: i64 = row.try_get("is_active")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Connection {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        connection_type: parse_enum(TABLE, &connection_type)?,
        provider: row.try_get("provider")?,
        driver: row.try_get("driver")?,
        host: row.try_get("host")?,
        port: port
            .map(u16::try_from)
            .transpose()
            .map_err(|e| PersistenceError::corrupt(TABLE, format!("port: {}", e)))?,
        database_name: row.try_get("database_name")?,
        username: row.try_get("username")?,
        config: serde_json::from_str::<Map<String, Value>>(&config)?,
        credentials: row.try_get("credentials")?,
        health_check: serde_json::from_str::<HealthCheckConfig>(&health_check)?,
        status: parse_enum(TABLE, &status)?,
        is_active: is_active != 0,
        tags: serde_json::from_str(&tags)?,
        category: row.try_get("category")?,
        version: row.try_get("version")?,
        last_connected_at: parse_ts_opt(TABLE, row.try_get("last_connected_at")?)?,
        last_tested_at: parse_ts_opt(TABLE, row.try_get("last_tested_at")?)?,
        last_health_check: parse_ts_opt(TABLE, row.try_get("last_health_check")?)?,
        last_error: row.try_get("last_error")?,
        error_count: row.try_get("error_count")?,
        success_count: row.try_get("success_count")?,
        created_at: parse_ts(TABLE, &created_at)?,
        updated_at: parse_ts(TABLE, &updated_at)?,
        created_by: row.try_get("created_by")?,
        updated_by: row.try_get("updated_by")?,
    })
}

pub(crate) fn log_from_row(row: &AnyRow) -> Result<ConnectionLog, PersistenceError> {
    const TABLE: &str = "connection_logs";

    let level: String = row.try_get("level")?;
    let details: Option<String> = row.try_get("details")?;
    let logged_at: String = row.try_get("logged_at")?;

    Ok(ConnectionLog {
        id: row.try_get("id")?,
        connection_id: row.try_get("connection_id")?,
        level: parse_enum(TABLE, &level)?,
        message: row.try_get("message")?,
        details: details.map(|d| serde_json::from_str(&d)).transpose()?,
        duration_ms: row.try_get("duration_ms")?,
        response_size: row.try_get("response_size")?,
        user_id: row.try_get("user_id")?,
        timestamp: parse_ts(TABLE, &logged_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.000001Z")
            .unwrap()
            .with_timezone(&Utc);
        let later = earlier + chrono::Duration::milliseconds(1);
        assert!(ts(&earlier) < ts(&later));
        assert_eq!(parse_ts("t", &ts(&earlier)).unwrap(), earlier);
    }

    #[test]
    fn test_bad_timestamp_is_reported_as_corrupt() {
        let err = parse_ts("connections", "yesterday").unwrap_err();
        assert!(matches!(err, PersistenceError::CorruptRow { table: "connections", .. }));
        assert_eq!(parse_ts_opt("t", Some(String::new())).unwrap(), None);
    }
}
