//! Schema migrations for the connection store

use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use sqlx::Row;

const MIGRATION_001_CONNECTIONS: &str = r#"
CREATE TABLE IF NOT EXISTS connections (
    id VARCHAR(64) PRIMARY KEY,
    user_id VARCHAR(255) NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    connection_type VARCHAR(32) NOT NULL,
    provider TEXT NOT NULL,
    driver TEXT,
    host TEXT,
    port BIGINT,
    database_name TEXT,
    username TEXT,
    config TEXT NOT NULL,
    credentials TEXT,
    health_check TEXT NOT NULL,
    status VARCHAR(32) NOT NULL,
    is_active BIGINT NOT NULL DEFAULT 1,
    tags TEXT NOT NULL,
    category TEXT,
    version BIGINT NOT NULL DEFAULT 1,
    last_connected_at TEXT,
    last_tested_at TEXT,
    last_health_check TEXT,
    last_error TEXT,
    error_count BIGINT NOT NULL DEFAULT 0,
    success_count BIGINT NOT NULL DEFAULT 0,
    created_at VARCHAR(64) NOT NULL,
    updated_at VARCHAR(64) NOT NULL,
    created_by TEXT,
    updated_by TEXT
);

CREATE INDEX idx_connections_user ON connections(user_id);
CREATE INDEX idx_connections_status ON connections(status);
CREATE INDEX idx_connections_type ON connections(connection_type);
CREATE INDEX idx_connections_updated ON connections(updated_at)
"#;

const MIGRATION_002_CONNECTION_LOGS: &str = r#"
CREATE TABLE IF NOT EXISTS connection_logs (
    id VARCHAR(64) PRIMARY KEY,
    connection_id VARCHAR(64) NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    level VARCHAR(16) NOT NULL,
    message TEXT NOT NULL,
    details TEXT,
    duration_ms BIGINT,
    response_size BIGINT,
    user_id TEXT,
    logged_at VARCHAR(64) NOT NULL
);

CREATE INDEX idx_connection_logs_connection ON connection_logs(connection_id, logged_at);
CREATE INDEX idx_connection_logs_level ON connection_logs(level, logged_at)
"#;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

fn migrations() -> [Migration; 2] {
    [
        Migration {
            name: "001_connections",
            sql: MIGRATION_001_CONNECTIONS,
        },
        Migration {
            name: "002_connection_logs",
            sql: MIGRATION_002_CONNECTION_LOGS,
        },
    ]
}

pub struct MigrationRunner {
    pool: ConnectionPool,
}

impl MigrationRunner {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Apply every migration not yet recorded in `_conduit_migrations`.
    pub async fn migrate_up(&self) -> Result<MigrationResult, PersistenceError> {
        self.ensure_migrations_table().await?;

        let mut result = MigrationResult::default();
        for migration in migrations() {
            if self.is_applied(migration.name).await? {
                tracing::debug!("Migration '{}' already applied, skipping", migration.name);
                result.skipped += 1;
                continue;
            }

            tracing::info!("Applying migration: {}", migration.name);
            for statement in migration.sql.split(';').map(str::trim) {
                if statement.is_empty() {
                    continue;
                }
                sqlx::query(statement)
                    .execute(self.pool.pool())
                    .await
                    .map_err(|e| {
                        PersistenceError::Migration(format!("'{}' failed: {}", migration.name, e))
                    })?;
            }
            self.record(migration.name).await?;
            result.applied += 1;
        }

        Ok(result)
    }

    /// Names of applied migrations in application order.
    pub async fn applied(&self) -> Result<Vec<String>, PersistenceError> {
        self.ensure_migrations_table().await?;
        let rows = sqlx::query("SELECT name FROM _conduit_migrations ORDER BY name")
            .fetch_all(self.pool.pool())
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(Into::into))
            .collect()
    }

    async fn ensure_migrations_table(&self) -> Result<(), PersistenceError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _conduit_migrations (
                name VARCHAR(255) PRIMARY KEY,
                applied_at VARCHAR(64) NOT NULL
            )",
        )
        .execute(self.pool.pool())
        .await
        .map_err(|e| PersistenceError::Migration(format!("Failed to create migrations table: {}", e)))?;
        Ok(())
    }

    async fn is_applied(&self, name: &str) -> Result<bool, PersistenceError> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM _conduit_migrations WHERE name = ?")
            .bind(name)
            .fetch_one(self.pool.pool())
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count > 0)
    }

    async fn record(&self, name: &str) -> Result<(), PersistenceError> {
        sqlx::query("INSERT INTO _conduit_migrations (name, applied_at) VALUES (?, ?)")
            .bind(name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(self.pool.pool())
            .await?;
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationResult {
    pub applied: usize,
    pub skipped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let pool = ConnectionPool::in_memory().await.unwrap();
        let runner = MigrationRunner::new(pool);

        let first = runner.migrate_up().await.unwrap();
        assert_eq!(first, MigrationResult { applied: 2, skipped: 0 });

        let second = runner.migrate_up().await.unwrap();
        assert_eq!(second, MigrationResult { applied: 0, skipped: 2 });

        assert_eq!(
            runner.applied().await.unwrap(),
            vec!["001_connections".to_string(), "002_connection_logs".to_string()]
        );
    }
}
