//! Store connection pool

use crate::persistence::error::PersistenceError;
use sqlx::{any::AnyPoolOptions, AnyPool};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
    Mysql,
}

impl DatabaseBackend {
    pub fn from_url(url: &str) -> Result<Self, PersistenceError> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            other => Err(PersistenceError::Connection(format!(
                "Unsupported store URL scheme '{}'; expected sqlite, postgres or mysql",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sqlite => "SQLite",
            Self::Postgres => "PostgreSQL",
            Self::Mysql => "MySQL",
        }
    }
}

fn is_in_memory(url: &str) -> bool {
    url.starts_with("sqlite::memory:") || url.contains("mode=memory")
}

/// `AnyPool` plus the backend it points at
#[derive(Clone)]
pub struct ConnectionPool {
    pool: AnyPool,
    backend: DatabaseBackend,
}

impl ConnectionPool {
    pub async fn new(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, PersistenceError> {
        sqlx::any::install_default_drivers();

        let backend = DatabaseBackend::from_url(url)?;

        // Each in-memory SQLite connection is its own database, so pin exactly one.
        let options = if is_in_memory(url) {
            AnyPoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            AnyPoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = options
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;

        tracing::info!(
            backend = backend.name(),
            max_connections,
            "Connected to connection store"
        );

        Ok(Self { pool, backend })
    }

    /// Fresh private in-memory SQLite store.
    pub async fn in_memory() -> Result<Self, PersistenceError> {
        Self::new("sqlite::memory:", 1, Duration::from_secs(5)).await
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    pub async fn ping(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::Connection(format!("Store ping failed: {}", e)))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(DatabaseBackend::from_url("sqlite://c.db").unwrap(), DatabaseBackend::Sqlite);
        assert_eq!(DatabaseBackend::from_url("sqlite::memory:").unwrap(), DatabaseBackend::Sqlite);
        assert_eq!(
            DatabaseBackend::from_url("postgresql://localhost/db").unwrap(),
            DatabaseBackend::Postgres
        );
        assert_eq!(DatabaseBackend::from_url("mariadb://h/db").unwrap(), DatabaseBackend::Mysql);
        assert!(DatabaseBackend::from_url("redis://localhost").is_err());
    }

    #[test]
    fn test_in_memory_detection() {
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://file:x?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://conduit.db"));
    }

    #[tokio::test]
    async fn test_in_memory_pool_answers_ping() {
        let pool = ConnectionPool::in_memory().await.unwrap();
        assert_eq!(pool.backend(), DatabaseBackend::Sqlite);
        pool.ping().await.unwrap();
    }
}
