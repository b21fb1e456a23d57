//! Connection records and the value types that describe them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decrypted credential material. The `type` key names the authentication type.
pub type CredentialMap = Map<String, Value>;

/// Kind of external system a connection points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Postgresql,
    Mysql,
    Sqlite,
    AwsAthena,
    Snowflake,
    Bigquery,
    AwsS3,
    Api,
    Mongodb,
    Redshift,
    Custom,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
            Self::Sqlite => "sqlite",
            Self::AwsAthena => "aws_athena",
            Self::Snowflake => "snowflake",
            Self::Bigquery => "bigquery",
            Self::AwsS3 => "aws_s3",
            Self::Api => "api",
            Self::Mongodb => "mongodb",
            Self::Redshift => "redshift",
            Self::Custom => "custom",
        }
    }

    pub fn all() -> &'static [ConnectionType] {
        &[
            Self::Postgresql,
            Self::Mysql,
            Self::Sqlite,
            Self::AwsAthena,
            Self::Snowflake,
            Self::Bigquery,
            Self::AwsS3,
            Self::Api,
            Self::Mongodb,
            Self::Redshift,
            Self::Custom,
        ]
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("Invalid connection type: {}", s))
    }
}

/// Lifecycle status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Pending,
    Testing,
    Active,
    Error,
    Inactive,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Testing => "testing",
            Self::Active => "active",
            Self::Error => "error",
            Self::Inactive => "inactive",
        }
    }

    pub fn all() -> &'static [ConnectionStatus] {
        &[
            Self::Pending,
            Self::Testing,
            Self::Active,
            Self::Error,
            Self::Inactive,
        ]
    }

    /// Statuses the health monitor keeps re-checking.
    pub fn is_monitored(&self) -> bool {
        matches!(self, Self::Active | Self::Error)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "testing" => Ok(Self::Testing),
            "active" => Ok(Self::Active),
            "error" => Ok(Self::Error),
            "inactive" => Ok(Self::Inactive),
            _ => Err(format!("Invalid connection status: {}", s)),
        }
    }
}

/// Per-connection health check settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: i64,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: Option<u16>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: Option<u64>,
}

fn default_enabled() -> bool {
    true
}

fn default_interval_minutes() -> i64 {
    5
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> Option<u16> {
    Some(200)
}

fn default_timeout_seconds() -> Option<u64> {
    Some(10)
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_minutes: default_interval_minutes(),
            endpoint: None,
            method: default_method(),
            expected_status: default_expected_status(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// A registered external data-source endpoint.
///
/// `credentials` holds the vault ciphertext and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub provider: String,
    pub driver: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_name: Option<String>,
    pub username: Option<String>,
    pub config: Map<String, Value>,
    #[serde(skip)]
    pub credentials: Option<String>,
    pub health_check: HealthCheckConfig,
    pub status: ConnectionStatus,
    pub is_active: bool,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub version: i64,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_tested_at: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub error_count: i64,
    pub success_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl Connection {
    /// Build a fresh, not yet persisted record owned by `owner`.
    pub fn from_draft(draft: ConnectionDraft, owner: &str, credentials: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: owner.to_string(),
            name: draft.name,
            description: draft.description,
            connection_type: draft.connection_type,
            provider: draft.provider,
            driver: draft.driver,
            host: draft.host,
            port: draft.port,
            database_name: draft.database_name,
            username: draft.username,
            config: draft.config,
            credentials,
            health_check: draft.health_check.unwrap_or_default(),
            status: ConnectionStatus::Pending,
            is_active: draft.is_active.unwrap_or(true),
            tags: draft.tags,
            category: draft.category,
            version: 1,
            last_connected_at: None,
            last_tested_at: None,
            last_health_check: None,
            last_error: None,
            error_count: 0,
            success_count: 0,
            created_at: now,
            updated_at: now,
            created_by: Some(owner.to_string()),
            updated_by: Some(owner.to_string()),
        }
    }

    /// String config value, ignoring empty strings.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        match self.config.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn config_u64(&self, key: &str) -> Option<u64> {
        match self.config.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// Body of a create request, also used for unsaved test requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub provider: String,
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub credentials: Option<CredentialMap>,
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Partial update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub provider: Option<String>,
    pub driver: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_name: Option<String>,
    pub username: Option<String>,
    pub config: Option<Map<String, Value>>,
    pub credentials: Option<CredentialMap>,
    pub health_check: Option<HealthCheckConfig>,
    pub status: Option<ConnectionStatus>,
    pub is_active: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub category: Option<String>,
}

impl ConnectionPatch {
    /// Names of the fields this patch sets.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        macro_rules! track {
            ($($field:ident),*) => {
                $(if self.$field.is_some() { fields.push(stringify!($field)); })*
            };
        }
        track!(
            name,
            description,
            provider,
            driver,
            host,
            port,
            database_name,
            username,
            config,
            credentials,
            health_check,
            status,
            is_active,
            tags,
            category
        );
        fields
    }

    /// Apply every field except `credentials`, which must go through the vault first.
    pub fn apply_to(self, connection: &mut Connection) {
        if let Some(v) = self.name {
            connection.name = v;
        }
        if let Some(v) = self.description {
            connection.description = Some(v);
        }
        if let Some(v) = self.provider {
            connection.provider = v;
        }
        if let Some(v) = self.driver {
            connection.driver = Some(v);
        }
        if let Some(v) = self.host {
            connection.host = Some(v);
        }
        if let Some(v) = self.port {
            connection.port = Some(v);
        }
        if let Some(v) = self.database_name {
            connection.database_name = Some(v);
        }
        if let Some(v) = self.username {
            connection.username = Some(v);
        }
        if let Some(v) = self.config {
            connection.config = v;
        }
        if let Some(v) = self.health_check {
            connection.health_check = v;
        }
        if let Some(v) = self.status {
            connection.status = v;
        }
        if let Some(v) = self.is_active {
            connection.is_active = v;
        }
        if let Some(v) = self.tags {
            connection.tags = v;
        }
        if let Some(v) = self.category {
            connection.category = Some(v);
        }
    }
}

/// Filters accepted by the listing endpoint
#[derive(Debug, Clone, Default)]
pub struct ConnectionFilter {
    pub connection_type: Option<ConnectionType>,
    pub status: Option<ConnectionStatus>,
    pub provider: Option<String>,
    pub search: Option<String>,
}

/// 1-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    /// Clamp page to >= 1 and limit to 1..=max, falling back to `default_limit`.
    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32, max_limit: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, max_limit),
        }
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_type_round_trips_through_str() {
        for t in ConnectionType::all() {
            assert_eq!(t.as_str().parse::<ConnectionType>().unwrap(), *t);
        }
        assert!("oracle".parse::<ConnectionType>().is_err());
    }

    #[test]
    fn test_health_check_defaults_fill_missing_fields() {
        let hc: HealthCheckConfig = serde_json::from_value(json!({ "interval_minutes": 15 })).unwrap();
        assert!(hc.enabled);
        assert_eq!(hc.interval_minutes, 15);
        assert_eq!(hc.method, "GET");
        assert_eq!(hc.expected_status, Some(200));
        assert_eq!(hc.timeout_seconds, Some(10));
    }

    #[test]
    fn test_draft_becomes_pending_connection() {
        let draft: ConnectionDraft = serde_json::from_value(json!({
            "name": "warehouse",
            "type": "postgresql",
            "provider": "PostgreSQL",
            "host": "db.internal",
            "port": 5432
        }))
        .unwrap();

        let conn = Connection::from_draft(draft, "user-1", Some("cipher".into()));
        assert_eq!(conn.status, ConnectionStatus::Pending);
        assert!(conn.is_active);
        assert_eq!(conn.user_id, "user-1");
        assert_eq!(conn.created_by.as_deref(), Some("user-1"));
        assert_eq!(conn.success_count, 0);
        assert_eq!(conn.version, 1);
    }

    #[test]
    fn test_serialized_connection_omits_ciphertext() {
        let draft: ConnectionDraft = serde_json::from_value(json!({
            "name": "x", "type": "sqlite", "provider": "SQLite"
        }))
        .unwrap();
        let conn = Connection::from_draft(draft, "u", Some("secret-cipher".into()));
        let value = serde_json::to_value(&conn).unwrap();
        assert!(value.get("credentials").is_none());
        assert_eq!(value["type"], "sqlite");
    }

    #[test]
    fn test_patch_tracks_and_applies_fields() {
        let draft: ConnectionDraft = serde_json::from_value(json!({
            "name": "x", "type": "sqlite", "provider": "SQLite"
        }))
        .unwrap();
        let mut conn = Connection::from_draft(draft, "u", None);

        let patch = ConnectionPatch {
            name: Some("renamed".into()),
            is_active: Some(false),
            ..Default::default()
        };
        assert_eq!(patch.field_names(), vec!["name", "is_active"]);

        patch.apply_to(&mut conn);
        assert_eq!(conn.name, "renamed");
        assert!(!conn.is_active);
    }

    #[test]
    fn test_page_clamps_bounds() {
        let page = Page::new(Some(0), Some(500), 20, 100);
        assert_eq!(page, Page { page: 1, limit: 100 });
        assert_eq!(Page::new(None, None, 20, 100).limit, 20);
        assert_eq!(Page::new(Some(3), Some(10), 20, 100).offset(), 20);
    }

    #[test]
    fn test_zero_page_offset_starts_at_first_row() {
        assert_eq!(Page { page: 0, limit: 25 }.offset(), 0);
    }
}
