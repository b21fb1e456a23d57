//! PostgreSQL, MySQL and SQLite through the sqlx `Any` driver

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

use super::{metadata, param_text, truncate_error, ConnectionProvider, ProviderTarget};
use crate::domain::{ConnectionTestResult, ConnectionType, ProviderInfo, QueryResult};

const POSTGRES_PARAMS: &[&str] = &["sslmode", "sslrootcert", "options", "application_name"];
const MYSQL_PARAMS: &[&str] = &["ssl-mode", "charset"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Postgres,
    Mysql,
    Sqlite,
}

impl Dialect {
    fn of(connection_type: ConnectionType) -> Option<Self> {
        match connection_type {
            ConnectionType::Postgresql => Some(Self::Postgres),
            ConnectionType::Mysql => Some(Self::Mysql),
            ConnectionType::Sqlite => Some(Self::Sqlite),
            _ => None,
        }
    }

    fn driver(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::Mysql => Some(3306),
            Self::Sqlite => None,
        }
    }

    fn probe(&self) -> &'static str {
        match self {
            Self::Postgres => {
                "SELECT version() AS version, current_database()::text AS database, \
                 current_user::text AS user_name"
            }
            Self::Mysql => {
                "SELECT VERSION() AS version, DATABASE() AS `database`, CURRENT_USER() AS user_name"
            }
            Self::Sqlite => "SELECT sqlite_version() AS version",
        }
    }
}

pub struct RelationalProvider {
    target: ProviderTarget,
    dialect: Dialect,
    pool: RwLock<Option<AnyPool>>,
    connected: AtomicBool,
}

impl RelationalProvider {
    pub fn new(target: ProviderTarget) -> Self {
        let dialect = Dialect::of(target.connection.connection_type).unwrap_or(Dialect::Sqlite);
        Self {
            target,
            dialect,
            pool: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Connection URL, preferring an explicit `connection_string`.
    pub fn connection_url(&self) -> String {
        if let Some(url) = self
            .target
            .credential("connection_string")
            .or_else(|| self.target.config("connection_string"))
        {
            return url.to_string();
        }

        let conn = &self.target.connection;
        match self.dialect {
            Dialect::Sqlite => {
                let path = conn
                    .database_name
                    .as_deref()
                    .or_else(|| conn.config_str("path"))
                    .unwrap_or(":memory:");
                if path == ":memory:" {
                    "sqlite::memory:".to_string()
                } else {
                    let mode = conn.config_str("mode").unwrap_or("ro");
                    format!("sqlite://{}?mode={}", path, mode)
                }
            }
            Dialect::Postgres | Dialect::Mysql => {
                let mut url = format!("{}://", self.dialect.driver());
                if let Some(user) = self.target.username() {
                    url.push_str(&urlencoding::encode(user));
                    if let Some(password) = self.target.credential("password") {
                        url.push(':');
                        url.push_str(&urlencoding::encode(password));
                    }
                    url.push('@');
                }
                url.push_str(conn.host.as_deref().unwrap_or("localhost"));
                if let Some(port) = conn.port.or(self.dialect.default_port()) {
                    url.push_str(&format!(":{}", port));
                }
                if let Some(db) = &conn.database_name {
                    url.push('/');
                    url.push_str(&urlencoding::encode(db));
                }
                let query = self.url_params();
                if !query.is_empty() {
                    url.push('?');
                    url.push_str(&query);
                }
                url
            }
        }
    }

    fn url_params(&self) -> String {
        let allowed = match self.dialect {
            Dialect::Postgres => POSTGRES_PARAMS,
            Dialect::Mysql => MYSQL_PARAMS,
            Dialect::Sqlite => return String::new(),
        };
        let mut params: Vec<String> = allowed
            .iter()
            .filter_map(|key| {
                self.target
                    .config(key)
                    .map(|v| format!("{}={}", key, urlencoding::encode(v)))
            })
            .collect();
        if self.dialect == Dialect::Postgres && self.target.config("sslmode").is_none() {
            params.insert(0, "sslmode=prefer".to_string());
        }
        params.join("&")
    }

    fn ssl_mode(&self) -> Option<&str> {
        match self.dialect {
            Dialect::Postgres => Some(self.target.config("sslmode").unwrap_or("prefer")),
            Dialect::Mysql => self.target.config("ssl-mode"),
            Dialect::Sqlite => None,
        }
    }

    fn base_metadata(&self) -> Map<String, Value> {
        let conn = &self.target.connection;
        metadata([
            ("driver", Some(Value::from(self.dialect.driver()))),
            ("host", conn.host.clone().map(Value::from)),
            (
                "port",
                conn.port.or(self.dialect.default_port()).map(Value::from),
            ),
            ("database", conn.database_name.clone().map(Value::from)),
            ("ssl_mode", self.ssl_mode().map(Value::from)),
        ])
    }

    fn pool_size(&self) -> u32 {
        if self.connection_url().starts_with("sqlite::memory:") {
            return 1;
        }
        self.target
            .connection
            .config_u64("pool_size")
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(5)
            .max(1)
    }

    async fn ensure_pool(&self) -> Result<AnyPool, String> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }

        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(self.pool_size())
            .acquire_timeout(self.target.call_timeout)
            .connect(&self.connection_url())
            .await
            .map_err(truncate_error)?;

        *guard = Some(pool.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(pool)
    }
}

#[async_trait]
impl ConnectionProvider for RelationalProvider {
    async fn connect(&self) -> ConnectionTestResult {
        let started = Instant::now();
        match self.ensure_pool().await {
            Ok(_) => ConnectionTestResult::ok(format!(
                "Connected to {} database",
                self.dialect.driver()
            ))
            .elapsed_since(started)
            .with_metadata(self.base_metadata()),
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.target.connection.id,
                    driver = self.dialect.driver(),
                    error = %e,
                    "Database connect failed"
                );
                ConnectionTestResult::failed("Database connection failed", e)
                    .elapsed_since(started)
                    .with_metadata(self.base_metadata())
            }
        }
    }

    async fn disconnect(&self) -> ConnectionTestResult {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        ConnectionTestResult::ok("Disconnected")
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        let pool = match self.ensure_pool().await {
            Ok(pool) => pool,
            Err(e) => {
                return ConnectionTestResult::failed("Database connection failed", e)
                    .elapsed_since(started)
                    .with_metadata(self.base_metadata())
            }
        };

        match sqlx::query(self.dialect.probe()).fetch_one(&pool).await {
            Ok(row) => {
                let probe = row_to_json(&row);
                let mut meta = self.base_metadata();
                if let Some(version) = probe.get("version").cloned() {
                    meta.insert("server_version".to_string(), version);
                }
                ConnectionTestResult::ok("Database connection successful")
                    .elapsed_since(started)
                    .with_metadata(meta)
                    .with_data(Value::Object(probe))
            }
            Err(e) => ConnectionTestResult::failed("Database test query failed", truncate_error(e))
                .elapsed_since(started)
                .with_metadata(self.base_metadata()),
        }
    }

    async fn execute_query(&self, query: &str, params: &[Value]) -> QueryResult {
        let started = Instant::now();
        let pool = match self.ensure_pool().await {
            Ok(pool) => pool,
            Err(e) => return QueryResult::failed(e, started),
        };

        let mut statement = sqlx::query(query);
        for param in params {
            statement = match param {
                Value::Null => statement.bind(Option::<String>::None),
                Value::Bool(b) => statement.bind(*b),
                Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(i), _) => statement.bind(i),
                    (None, Some(f)) => statement.bind(f),
                    _ => statement.bind(n.to_string()),
                },
                other => statement.bind(param_text(other)),
            };
        }

        match statement.fetch_all(&pool).await {
            Ok(rows) => {
                let columns = rows
                    .first()
                    .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
                    .unwrap_or_default();
                let rows = rows.iter().map(row_to_json).collect();
                QueryResult::rows(columns, rows, started)
            }
            Err(e) => QueryResult::failed(truncate_error(e), started),
        }
    }

    fn connection_info(&self) -> ProviderInfo {
        self.target.info(
            Some(self.dialect.driver()),
            self.connected.load(Ordering::SeqCst),
        )
    }
}

/// Decode a row by probing the `Any` value kinds in turn.
fn row_to_json(row: &AnyRow) -> Map<String, Value> {
    let mut out = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            v.map(|f| json!(f))
        } else if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            v.map(Value::from)
        } else {
            None
        };
        out.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    out
}
