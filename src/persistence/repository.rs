//! Connection store port and its sqlx implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::domain::{
    Connection, ConnectionAlert, ConnectionFilter, ConnectionLog, ConnectionStatus, ConnectionType,
    LogLevel, NewConnectionLog, Page,
};
use crate::persistence::error::PersistenceError;
use crate::persistence::models::{
    connection_from_row, log_from_row, ts, ts_opt, CONNECTION_COLUMNS, LOG_COLUMNS,
};
use crate::persistence::pool::ConnectionPool;

/// Result of one connectivity check, as it should be applied to the record
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub success: bool,
    /// Failure reason; required when `success` is false
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
    /// Set for user-initiated tests, which also stamp `last_tested_at`
    pub manual: bool,
}

impl CheckOutcome {
    pub fn success(checked_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            error: None,
            checked_at,
            manual: false,
        }
    }

    pub fn failure(reason: impl Into<String>, checked_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            checked_at,
            manual: false,
        }
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }
}

/// Status before a check together with the record after it
#[derive(Debug, Clone)]
pub struct CheckTransition {
    pub previous: ConnectionStatus,
    pub connection: Connection,
}

impl CheckTransition {
    pub fn changed(&self) -> bool {
        self.previous != self.connection.status
    }
}

#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Connection>, PersistenceError>;

    /// Filtered page ordered by `updated_at` descending, plus the total match count.
    async fn list(
        &self,
        filter: &ConnectionFilter,
        page: Page,
    ) -> Result<(Vec<Connection>, u64), PersistenceError>;

    /// Connections the health monitor scans: `is_active` with status active or error.
    async fn list_monitored(&self) -> Result<Vec<Connection>, PersistenceError>;

    async fn insert(&self, connection: &Connection) -> Result<(), PersistenceError>;

    /// Persist editable fields. Check counters and timestamps are left to `record_check`.
    async fn update(&self, connection: &Connection) -> Result<(), PersistenceError>;

    /// Delete a connection and its logs. Returns false when it did not exist.
    async fn delete(&self, id: &str) -> Result<bool, PersistenceError>;

    /// Apply a check outcome with in-database counter increments.
    /// Returns `None` when the connection no longer exists.
    async fn record_check(
        &self,
        id: &str,
        outcome: &CheckOutcome,
    ) -> Result<Option<CheckTransition>, PersistenceError>;

    async fn append_log(&self, entry: NewConnectionLog) -> Result<ConnectionLog, PersistenceError>;

    async fn list_logs(
        &self,
        connection_id: &str,
        level: Option<LogLevel>,
        page: Page,
    ) -> Result<(Vec<ConnectionLog>, u64), PersistenceError>;

    /// Latest warn and error entries across all connections.
    async fn recent_alerts(&self, limit: u32) -> Result<Vec<ConnectionAlert>, PersistenceError>;

    async fn count_by_status(
        &self,
        active_only: bool,
    ) -> Result<Vec<(ConnectionStatus, u64)>, PersistenceError>;

    async fn count_by_type(&self) -> Result<Vec<(ConnectionType, u64)>, PersistenceError>;

    async fn count_connected_since(&self, since: DateTime<Utc>) -> Result<u64, PersistenceError>;

    /// `is_active` connections whose last health check is older than `before`.
    async fn count_stale(&self, before: DateTime<Utc>) -> Result<u64, PersistenceError>;

    /// Mean of the most recent recorded log durations.
    async fn average_duration_ms(&self) -> Result<Option<f64>, PersistenceError>;
}

const RECENT_DURATION_SAMPLE: i64 = 1000;

pub struct SqlxConnectionRepository {
    pool: ConnectionPool,
}

impl SqlxConnectionRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    fn filter_clause(filter: &ConnectionFilter) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        if let Some(t) = filter.connection_type {
            conditions.push("connection_type = ?".to_string());
            binds.push(t.as_str().to_string());
        }
        if let Some(s) = filter.status {
            conditions.push("status = ?".to_string());
            binds.push(s.as_str().to_string());
        }
        if let Some(provider) = filter.provider.as_deref().filter(|p| !p.is_empty()) {
            conditions.push("LOWER(provider) LIKE ?".to_string());
            binds.push(format!("%{}%", provider.to_lowercase()));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
            conditions.push(
                "(LOWER(name) LIKE ? OR LOWER(COALESCE(description, '')) LIKE ? OR LOWER(provider) LIKE ?)"
                    .to_string(),
            );
            let pattern = format!("%{}%", search.to_lowercase());
            binds.extend(std::iter::repeat(pattern).take(3));
        }

        if conditions.is_empty() {
            (String::new(), binds)
        } else {
            (format!(" WHERE {}", conditions.join(" AND ")), binds)
        }
    }

    async fn count(&self, sql: &str, binds: &[String]) -> Result<u64, PersistenceError> {
        let mut query = sqlx::query(sql);
        for b in binds {
            query = query.bind(b.as_str());
        }
        let row = query.fetch_one(self.pool.pool()).await?;
        count_of(&row)
    }

    async fn fetch_connection(&self, id: &str) -> Result<Option<Connection>, PersistenceError> {
        let sql = format!("SELECT {} FROM connections WHERE id = ?", CONNECTION_COLUMNS);
        sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?
            .as_ref()
            .map(connection_from_row)
            .transpose()
    }
}

fn count_of(row: &AnyRow) -> Result<u64, PersistenceError> {
    let count: i64 = row.try_get("count")?;
    Ok(u64::try_from(count).unwrap_or(0))
}

#[async_trait]
impl ConnectionRepository for SqlxConnectionRepository {
    async fn get(&self, id: &str) -> Result<Option<Connection>, PersistenceError> {
        self.fetch_connection(id).await
    }

    async fn list(
        &self,
        filter: &ConnectionFilter,
        page: Page,
    ) -> Result<(Vec<Connection>, u64), PersistenceError> {
        let (clause, binds) = Self::filter_clause(filter);

        let total = self
            .count(&format!("SELECT COUNT(*) as count FROM connections{}", clause), &binds)
            .await?;

        let sql = format!(
            "SELECT {} FROM connections{} ORDER BY updated_at DESC, id LIMIT ? OFFSET ?",
            CONNECTION_COLUMNS, clause
        );
        let mut query = sqlx::query(&sql);
        for b in &binds {
            query = query.bind(b.as_str());
        }
        let rows = query
            .bind(i64::from(page.limit))
            .bind(page.offset())
            .fetch_all(self.pool.pool())
            .await?;

        let connections = rows.iter().map(connection_from_row).collect::<Result<_, _>>()?;
        Ok((connections, total))
    }

    async fn list_monitored(&self) -> Result<Vec<Connection>, PersistenceError> {
        let sql = format!(
            "SELECT {} FROM connections WHERE is_active = 1 AND status IN (?, ?)",
            CONNECTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(ConnectionStatus::Active.as_str())
            .bind(ConnectionStatus::Error.as_str())
            .fetch_all(self.pool.pool())
            .await?;
        rows.iter().map(connection_from_row).collect()
    }

    async fn insert(&self, c: &Connection) -> Result<(), PersistenceError> {
        let sql = format!(
            "INSERT INTO connections ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            CONNECTION_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&c.id)
            .bind(&c.user_id)
            .bind(&c.name)
            .bind(c.description.clone())
            .bind(c.connection_type.as_str())
            .bind(&c.provider)
            .bind(c.driver.clone())
            .bind(c.host.clone())
            .bind(c.port.map(i64::from))
            .bind(c.database_name.clone())
            .bind(c.username.clone())
            .bind(serde_json::to_string(&c.config)?)
            .bind(c.credentials.clone())
            .bind(serde_json::to_string(&c.health_check)?)
            .bind(c.status.as_str())
            .bind(i64::from(c.is_active))
            .bind(serde_json::to_string(&c.tags)?)
            .bind(c.category.clone())
            .bind(c.version)
            .bind(ts_opt(&c.last_connected_at))
            .bind(ts_opt(&c.last_tested_at))
            .bind(ts_opt(&c.last_health_check))
            .bind(c.last_error.clone())
            .bind(c.error_count)
            .bind(c.success_count)
            .bind(ts(&c.created_at))
            .bind(ts(&c.updated_at))
            .bind(c.created_by.clone())
            .bind(c.updated_by.clone())
            .execute(self.pool.pool())
            .await?;
        Ok(())
    }

    async fn update(&self, c: &Connection) -> Result<(), PersistenceError> {
        let result = sqlx::query(
            "UPDATE connections SET name = ?, description = ?, provider = ?, driver = ?, host = ?, \
             port = ?, database_name = ?, username = ?, config = ?, credentials = ?, \
             health_check = ?, status = ?, is_active = ?, tags = ?, category = ?, version = ?, \
             updated_at = ?, updated_by = ? WHERE id = ?",
        )
        .bind(&c.name)
        .bind(c.description.clone())
        .bind(&c.provider)
        .bind(c.driver.clone())
        .bind(c.host.clone())
        .bind(c.port.map(i64::from))
        .bind(c.database_name.clone())
        .bind(c.username.clone())
        .bind(serde_json::to_string(&c.config)?)
        .bind(c.credentials.clone())
        .bind(serde_json::to_string(&c.health_check)?)
        .bind(c.status.as_str())
        .bind(i64::from(c.is_active))
        .bind(serde_json::to_string(&c.tags)?)
        .bind(c.category.clone())
        .bind(c.version)
        .bind(ts(&c.updated_at))
        .bind(c.updated_by.clone())
        .bind(&c.id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("connection", &c.id));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        let mut tx = self.pool.pool().begin().await?;
        sqlx::query("DELETE FROM connection_logs WHERE connection_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_check(
        &self,
        id: &str,
        outcome: &CheckOutcome,
    ) -> Result<Option<CheckTransition>, PersistenceError> {
        let mut tx = self.pool.pool().begin().await?;

        let Some(row) = sqlx::query("SELECT status FROM connections WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let previous: String = row.try_get("status")?;
        let previous: ConnectionStatus = previous
            .parse()
            .map_err(|e: String| PersistenceError::corrupt("connections", e))?;

        let checked_at = ts(&outcome.checked_at);
        let tested_at = outcome.manual.then(|| checked_at.clone());

        if outcome.success {
            sqlx::query(
                "UPDATE connections SET status = ?, last_error = NULL, \
                 success_count = success_count + 1, last_connected_at = ?, \
                 last_health_check = ?, last_tested_at = COALESCE(?, last_tested_at) WHERE id = ?",
            )
            .bind(ConnectionStatus::Active.as_str())
            .bind(&checked_at)
            .bind(&checked_at)
            .bind(tested_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        } else {
            let reason = outcome
                .error
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "Connection test failed".to_string());
            sqlx::query(
                "UPDATE connections SET status = ?, last_error = ?, \
                 error_count = error_count + 1, last_health_check = ?, \
                 last_tested_at = COALESCE(?, last_tested_at) WHERE id = ?",
            )
            .bind(ConnectionStatus::Error.as_str())
            .bind(reason)
            .bind(&checked_at)
            .bind(tested_at)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        let sql = format!("SELECT {} FROM connections WHERE id = ?", CONNECTION_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_one(&mut *tx).await?;
        let connection = connection_from_row(&row)?;
        tx.commit().await?;

        Ok(Some(CheckTransition {
            previous,
            connection,
        }))
    }

    async fn append_log(&self, entry: NewConnectionLog) -> Result<ConnectionLog, PersistenceError> {
        let log = entry.into_log(uuid::Uuid::new_v4().to_string(), Utc::now());
        let details = log.details.as_ref().map(serde_json::to_string).transpose()?;

        let sql = format!(
            "INSERT INTO connection_logs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            LOG_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&log.id)
            .bind(&log.connection_id)
            .bind(log.level.as_str())
            .bind(&log.message)
            .bind(details)
            .bind(log.duration_ms)
            .bind(log.response_size)
            .bind(log.user_id.clone())
            .bind(ts(&log.timestamp))
            .execute(self.pool.pool())
            .await?;
        Ok(log)
    }

    async fn list_logs(
        &self,
        connection_id: &str,
        level: Option<LogLevel>,
        page: Page,
    ) -> Result<(Vec<ConnectionLog>, u64), PersistenceError> {
        let mut binds = vec![connection_id.to_string()];
        let mut clause = String::from(" WHERE connection_id = ?");
        if let Some(level) = level {
            clause.push_str(" AND level = ?");
            binds.push(level.as_str().to_string());
        }

        let total = self
            .count(&format!("SELECT COUNT(*) as count FROM connection_logs{}", clause), &binds)
            .await?;

        let sql = format!(
            "SELECT {} FROM connection_logs{} ORDER BY logged_at DESC, id LIMIT ? OFFSET ?",
            LOG_COLUMNS, clause
        );
        let mut query = sqlx::query(&sql);
        for b in &binds {
            query = query.bind(b.as_str());
        }
        let rows = query
            .bind(i64::from(page.limit))
            .bind(page.offset())
            .fetch_all(self.pool.pool())
            .await?;

        let logs = rows.iter().map(log_from_row).collect::<Result<_, _>>()?;
        Ok((logs, total))
    }

    async fn recent_alerts(&self, limit: u32) -> Result<Vec<ConnectionAlert>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT l.id, l.connection_id, l.level, l.message, l.details, l.duration_ms, \
             l.response_size, l.user_id, l.logged_at, c.name AS connection_name \
             FROM connection_logs l LEFT JOIN connections c ON c.id = l.connection_id \
             WHERE l.level IN (?, ?) ORDER BY l.logged_at DESC, l.id LIMIT ?",
        )
        .bind(LogLevel::Error.as_str())
        .bind(LogLevel::Warn.as_str())
        .bind(i64::from(limit))
        .fetch_all(self.pool.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let name: Option<String> = row.try_get("connection_name")?;
                Ok(ConnectionAlert {
                    log: log_from_row(row)?,
                    connection_name: name.unwrap_or_else(|| "Unknown".to_string()),
                })
            })
            .collect()
    }

    async fn count_by_status(
        &self,
        active_only: bool,
    ) -> Result<Vec<(ConnectionStatus, u64)>, PersistenceError> {
        let sql = if active_only {
            "SELECT status, COUNT(*) as count FROM connections WHERE is_active = 1 GROUP BY status"
        } else {
            "SELECT status, COUNT(*) as count FROM connections GROUP BY status"
        };
        let rows = sqlx::query(sql).fetch_all(self.pool.pool()).await?;
        rows.iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                let status = status
                    .parse()
                    .map_err(|e: String| PersistenceError::corrupt("connections", e))?;
                Ok((status, count_of(row)?))
            })
            .collect()
    }

    async fn count_by_type(&self) -> Result<Vec<(ConnectionType, u64)>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT connection_type, COUNT(*) as count FROM connections GROUP BY connection_type",
        )
        .fetch_all(self.pool.pool())
        .await?;
        rows.iter()
            .map(|row| {
                let t: String = row.try_get("connection_type")?;
                let t = t
                    .parse()
                    .map_err(|e: String| PersistenceError::corrupt("connections", e))?;
                Ok((t, count_of(row)?))
            })
            .collect()
    }

    async fn count_connected_since(&self, since: DateTime<Utc>) -> Result<u64, PersistenceError> {
        self.count(
            "SELECT COUNT(*) as count FROM connections WHERE last_connected_at >= ?",
            &[ts(&since)],
        )
        .await
    }

    async fn count_stale(&self, before: DateTime<Utc>) -> Result<u64, PersistenceError> {
        self.count(
            "SELECT COUNT(*) as count FROM connections WHERE is_active = 1 AND last_health_check < ?",
            &[ts(&before)],
        )
        .await
    }

    async fn average_duration_ms(&self) -> Result<Option<f64>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT duration_ms FROM connection_logs WHERE duration_ms IS NOT NULL \
             ORDER BY logged_at DESC LIMIT ?",
        )
        .bind(RECENT_DURATION_SAMPLE)
        .fetch_all(self.pool.pool())
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        let mut total = 0f64;
        for row in &rows {
            let d: i64 = row.try_get("duration_ms")?;
            total += d as f64;
        }
        Ok(Some(total / rows.len() as f64))
    }
}
