//! Provider abstraction: one implementation per connection type.
//!
//! Providers never return errors. Every failure comes back as a
//! `ConnectionTestResult` or `QueryResult` with `success == false`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::domain::{Connection, ConnectionTestResult, CredentialMap, ProviderInfo, QueryResult};

pub mod athena;
pub mod bigquery;
pub mod http_api;
pub mod relational;
pub mod snowflake;
pub mod storage;

pub use athena::AthenaProvider;
pub use bigquery::BigQueryProvider;
pub use http_api::HttpApiProvider;
pub use relational::RelationalProvider;
pub use snowflake::SnowflakeProvider;
pub use storage::ObjectStoreProvider;

const MAX_ERROR_LEN: usize = 500;

#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Establish a session. Idempotent when already connected.
    async fn connect(&self) -> ConnectionTestResult;

    /// Release the session. Safe when never connected.
    async fn disconnect(&self) -> ConnectionTestResult;

    /// Connect if needed, then perform a read-only roundtrip.
    async fn test_connection(&self) -> ConnectionTestResult;

    async fn execute_query(&self, query: &str, params: &[Value]) -> QueryResult;

    fn connection_info(&self) -> ProviderInfo;
}

/// The stored record plus its decrypted credentials, handed to a provider at build time
#[derive(Clone)]
pub struct ProviderTarget {
    pub connection: Connection,
    pub credentials: CredentialMap,
    pub call_timeout: Duration,
}

impl std::fmt::Debug for ProviderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderTarget")
            .field("connection_id", &self.connection.id)
            .field("type", &self.connection.connection_type)
            .field("credential_keys", &self.credentials.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderTarget {
    pub fn new(connection: Connection, credentials: CredentialMap, call_timeout: Duration) -> Self {
        Self {
            connection,
            credentials,
            call_timeout,
        }
    }

    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn config(&self, key: &str) -> Option<&str> {
        self.connection.config_str(key)
    }

    /// Username from credentials, falling back to the record's endpoint field.
    pub fn username(&self) -> Option<&str> {
        self.credential("username")
            .or(self.connection.username.as_deref())
    }

    /// Bearer/OAuth access token under any of the usual credential keys.
    pub fn access_token(&self) -> Option<&str> {
        self.credential("bearer_token")
            .or_else(|| self.credential("access_token"))
            .or_else(|| self.credential("token"))
    }

    pub fn info(&self, driver: Option<&str>, is_connected: bool) -> ProviderInfo {
        let c = &self.connection;
        ProviderInfo {
            name: c.name.clone(),
            connection_type: c.connection_type,
            driver: c.driver.clone().or_else(|| driver.map(str::to_string)),
            host: c.host.clone(),
            port: c.port,
            database: c.database_name.clone(),
            is_connected,
        }
    }

    /// HTTP client bounded by the per-call timeout.
    pub fn http_client(&self) -> Result<reqwest::Client, String> {
        reqwest::Client::builder()
            .timeout(self.call_timeout)
            .user_agent(concat!("conduit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))
    }
}

/// Metadata map from `(key, value)` pairs, skipping `None` values.
pub(crate) fn metadata<I, V>(pairs: I) -> Map<String, Value>
where
    I: IntoIterator<Item = (&'static str, Option<V>)>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v.into())))
        .collect()
}

pub(crate) fn truncate_error(error: impl std::fmt::Display) -> String {
    let text = error.to_string();
    if text.chars().count() <= MAX_ERROR_LEN {
        return text;
    }
    text.chars().take(MAX_ERROR_LEN).collect()
}

/// JSON scalar to a display string for providers that bind text parameters.
pub(crate) fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
