//! Built-in catalog of starter configurations.

use serde::Serialize;
use serde_json::{json, Value};

use super::connection::{ConnectionType, HealthCheckConfig};

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub provider: &'static str,
    pub category: &'static str,
    pub icon: &'static str,
    pub auth_type: &'static str,
    pub required_credentials: &'static [&'static str],
    pub default_config: Value,
    pub default_health_check: HealthCheckConfig,
    pub is_popular: bool,
    pub is_official: bool,
    pub tags: &'static [&'static str],
    pub setup_instructions: &'static str,
}

pub fn catalog() -> Vec<ConnectionTemplate> {
    vec![
        ConnectionTemplate {
            id: "postgresql-db",
            name: "PostgreSQL Database",
            description: "Connect to a PostgreSQL database",
            connection_type: ConnectionType::Postgresql,
            provider: "postgresql",
            category: "Database",
            icon: "database",
            auth_type: "basic_auth",
            required_credentials: &["username", "password"],
            default_config: json!({ "sslmode": "prefer", "pool_size": 2 }),
            default_health_check: HealthCheckConfig::default(),
            is_popular: true,
            is_official: true,
            tags: &["database", "postgresql", "sql"],
            setup_instructions: "1. Make sure the server accepts connections from this host\n2. Enter host, port, database and credentials\n3. Test the connection",
        },
        ConnectionTemplate {
            id: "mysql-db",
            name: "MySQL Database",
            description: "Connect to a MySQL or MariaDB database",
            connection_type: ConnectionType::Mysql,
            provider: "mysql",
            category: "Database",
            icon: "database",
            auth_type: "basic_auth",
            required_credentials: &["username", "password"],
            default_config: json!({ "pool_size": 2 }),
            default_health_check: HealthCheckConfig::default(),
            is_popular: true,
            is_official: true,
            tags: &["database", "mysql", "sql"],
            setup_instructions: "1. Create a read-only user\n2. Enter host, port, database and credentials\n3. Test the connection",
        },
        ConnectionTemplate {
            id: "sqlite-file",
            name: "SQLite File",
            description: "Open a local SQLite database file",
            connection_type: ConnectionType::Sqlite,
            provider: "sqlite",
            category: "Database",
            icon: "file",
            auth_type: "none",
            required_credentials: &[],
            default_config: json!({ "mode": "ro" }),
            default_health_check: HealthCheckConfig::default(),
            is_popular: false,
            is_official: true,
            tags: &["database", "sqlite", "sql", "local"],
            setup_instructions: "1. Put the database file path in database_name\n2. Test the connection",
        },
        ConnectionTemplate {
            id: "aws-athena",
            name: "Amazon Athena",
            description: "Query data in S3 with Amazon Athena",
            connection_type: ConnectionType::AwsAthena,
            provider: "aws",
            category: "Analytics",
            icon: "cloud",
            auth_type: "aws_access_key",
            required_credentials: &["access_key_id", "secret_access_key"],
            default_config: json!({
                "region": "us-east-1",
                "workgroup": "primary",
                "s3_output_location": "s3://my-athena-results/"
            }),
            default_health_check: HealthCheckConfig {
                interval_minutes: 15,
                timeout_seconds: Some(60),
                ..HealthCheckConfig::default()
            },
            is_popular: true,
            is_official: true,
            tags: &["analytics", "aws", "athena", "sql"],
            setup_instructions: "1. Create an IAM user with Athena and S3 access\n2. Choose a workgroup and result location\n3. Enter the access key pair",
        },
        ConnectionTemplate {
            id: "snowflake-warehouse",
            name: "Snowflake",
            description: "Connect to a Snowflake warehouse through the SQL API",
            connection_type: ConnectionType::Snowflake,
            provider: "snowflake",
            category: "Data Warehouse",
            icon: "snowflake",
            auth_type: "bearer_token",
            required_credentials: &["bearer_token"],
            default_config: json!({
                "account": "myorg-myaccount",
                "warehouse": "COMPUTE_WH",
                "schema": "PUBLIC",
                "token_type": "OAUTH"
            }),
            default_health_check: HealthCheckConfig {
                interval_minutes: 15,
                timeout_seconds: Some(30),
                ..HealthCheckConfig::default()
            },
            is_popular: true,
            is_official: true,
            tags: &["warehouse", "snowflake", "sql"],
            setup_instructions: "1. Create an OAuth integration or key pair JWT\n2. Enter account, warehouse and database\n3. Paste the token",
        },
        ConnectionTemplate {
            id: "google-bigquery",
            name: "Google BigQuery",
            description: "Run queries against Google BigQuery",
            connection_type: ConnectionType::Bigquery,
            provider: "google",
            category: "Data Warehouse",
            icon: "bar-chart",
            auth_type: "bearer_token",
            required_credentials: &["bearer_token"],
            default_config: json!({ "project_id": "my-project", "location": "US" }),
            default_health_check: HealthCheckConfig {
                interval_minutes: 15,
                timeout_seconds: Some(30),
                ..HealthCheckConfig::default()
            },
            is_popular: true,
            is_official: true,
            tags: &["warehouse", "google", "bigquery", "sql"],
            setup_instructions: "1. Create a service account with BigQuery Job User\n2. Mint an OAuth access token for it\n3. Enter the project and token",
        },
        ConnectionTemplate {
            id: "aws-s3",
            name: "Amazon S3",
            description: "Browse objects in an S3 bucket",
            connection_type: ConnectionType::AwsS3,
            provider: "aws",
            category: "Storage",
            icon: "archive",
            auth_type: "aws_access_key",
            required_credentials: &["access_key_id", "secret_access_key"],
            default_config: json!({ "bucket": "my-bucket", "region": "us-east-1", "prefix": "" }),
            default_health_check: HealthCheckConfig::default(),
            is_popular: true,
            is_official: true,
            tags: &["storage", "aws", "s3"],
            setup_instructions: "1. Create an IAM user with s3:ListBucket and s3:GetObject\n2. Enter bucket and region\n3. Enter the access key pair",
        },
        ConnectionTemplate {
            id: "rest-api",
            name: "REST API",
            description: "Monitor an HTTP API endpoint",
            connection_type: ConnectionType::Api,
            provider: "http",
            category: "API",
            icon: "globe",
            auth_type: "api_key",
            required_credentials: &["api_key"],
            default_config: json!({ "base_url": "https://api.example.com", "api_key_header": "X-API-Key" }),
            default_health_check: HealthCheckConfig {
                endpoint: Some("/health".to_string()),
                ..HealthCheckConfig::default()
            },
            is_popular: false,
            is_official: true,
            tags: &["api", "http", "rest"],
            setup_instructions: "1. Enter the base URL\n2. Set the health endpoint and expected status\n3. Add the API key",
        },
    ]
}

/// Sorted, de-duplicated values of one template field.
pub fn distinct<F>(templates: &[ConnectionTemplate], field: F) -> Vec<&'static str>
where
    F: Fn(&ConnectionTemplate) -> &'static str,
{
    let mut values: Vec<&'static str> = templates.iter().map(field).collect();
    values.sort_unstable();
    values.dedup();
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_ids_are_unique() {
        let templates = catalog();
        let ids = distinct(&templates, |t| t.id);
        assert_eq!(ids.len(), templates.len());
    }

    #[test]
    fn test_distinct_categories_are_sorted() {
        let templates = catalog();
        let categories = distinct(&templates, |t| t.category);
        let mut sorted = categories.clone();
        sorted.sort();
        assert_eq!(categories, sorted);
        assert!(categories.contains(&"Database"));
    }
}
