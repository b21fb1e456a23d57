//! Connection store backed by sqlx `AnyPool` (SQLite, PostgreSQL or MySQL).
//!
//! - `DataStore`: owns the pool and hands out the repository
//! - `ConnectionRepository`: connections and their append-only logs
//! - `MigrationRunner`: schema migrations

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod repository;

pub use error::PersistenceError;
pub use migrations::{MigrationResult, MigrationRunner};
pub use pool::{ConnectionPool, DatabaseBackend};
pub use repository::{CheckOutcome, CheckTransition, ConnectionRepository, SqlxConnectionRepository};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// `sqlite://conduit.db?mode=rwc`, `sqlite::memory:`, `postgres://...` or `mysql://...`
    #[serde(default = "default_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_url() -> String {
    "sqlite://conduit.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_auto_migrate() -> bool {
    true
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            auto_migrate: default_auto_migrate(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

pub struct DataStore {
    pool: ConnectionPool,
    connections: Arc<SqlxConnectionRepository>,
}

impl DataStore {
    pub async fn new(config: &PersistenceConfig) -> Result<Self, PersistenceError> {
        let pool = ConnectionPool::new(
            &config.url,
            config.max_connections,
            Duration::from_secs(config.acquire_timeout_secs),
        )
        .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: ConnectionPool) -> Self {
        let connections = Arc::new(SqlxConnectionRepository::new(pool.clone()));
        Self { pool, connections }
    }

    /// Migrated private in-memory store.
    pub async fn in_memory() -> Result<Self, PersistenceError> {
        let store = Self::from_pool(ConnectionPool::in_memory().await?);
        store.migrate().await?;
        Ok(store)
    }

    pub fn connections(&self) -> Arc<dyn ConnectionRepository> {
        self.connections.clone()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.pool.backend()
    }

    pub async fn migrate(&self) -> Result<MigrationResult, PersistenceError> {
        MigrationRunner::new(self.pool.clone()).migrate_up().await
    }
}
