//! Snowflake through the SQL API (`/api/v2/statements`)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::{metadata, param_text, truncate_error, ConnectionProvider, ProviderTarget};
use crate::adapters::vault;
use crate::domain::{ConnectionTestResult, ProviderInfo, QueryResult};

const DEFAULT_SCHEMA: &str = "PUBLIC";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
    #[serde(default)]
    statement_status_url: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<ColumnType>,
}

#[derive(Debug, Deserialize)]
struct ColumnType {
    name: String,
}

struct Tabular {
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

pub struct SnowflakeProvider {
    target: ProviderTarget,
    client: Result<reqwest::Client, String>,
    connected: AtomicBool,
}

impl SnowflakeProvider {
    pub fn new(target: ProviderTarget) -> Self {
        let client = target.http_client();
        Self {
            target,
            client,
            connected: AtomicBool::new(false),
        }
    }

    fn account(&self) -> Option<&str> {
        self.target.config("account").or_else(|| {
            self.target
                .connection
                .host
                .as_deref()
                .and_then(|h| h.split('.').next())
        })
    }

    fn warehouse(&self) -> Option<&str> {
        self.target.config("warehouse")
    }

    fn database(&self) -> Option<&str> {
        self.target
            .connection
            .database_name
            .as_deref()
            .or_else(|| self.target.config("database"))
    }

    fn schema(&self) -> &str {
        self.target.config("schema").unwrap_or(DEFAULT_SCHEMA)
    }

    fn role(&self) -> Option<&str> {
        self.target.config("role")
    }

    fn base_url(&self) -> Result<String, String> {
        if let Some(endpoint) = self.target.config("endpoint") {
            return Ok(endpoint.trim_end_matches('/').to_string());
        }
        self.account()
            .map(|account| format!("https://{}.snowflakecomputing.com", account))
            .ok_or_else(|| "Snowflake connection requires config.account".to_string())
    }

    /// Bearer token and the SQL API token type it represents.
    fn token(&self) -> Result<(&str, &'static str), String> {
        let token_type = match vault::auth_type_of(&self.target.credentials) {
            "jwt" => "KEYPAIR_JWT",
            _ => "OAUTH",
        };
        self.target
            .access_token()
            .map(|token| (token, token_type))
            .ok_or_else(|| {
                "Snowflake SQL API requires an OAuth access token or key-pair JWT".to_string()
            })
    }

    fn base_metadata(&self) -> Map<String, Value> {
        metadata([
            ("account", self.account()),
            ("warehouse", self.warehouse()),
            ("database", self.database()),
            ("schema", Some(self.schema())),
            ("role", self.role()),
        ])
    }

    fn statement_body(&self, statement: &str, params: &[Value]) -> Value {
        let mut body = json!({
            "statement": statement,
            "timeout": self.target.call_timeout.as_secs().max(1),
            "schema": self.schema(),
        });
        for (key, value) in [
            ("warehouse", self.warehouse()),
            ("database", self.database()),
            ("role", self.role()),
        ] {
            if let Some(value) = value {
                body[key] = Value::from(value);
            }
        }
        if !params.is_empty() {
            let bindings: Map<String, Value> = params
                .iter()
                .enumerate()
                .map(|(i, value)| {
                    let kind = match value {
                        Value::Bool(_) => "BOOLEAN",
                        Value::Number(n) if n.is_i64() || n.is_u64() => "FIXED",
                        Value::Number(_) => "REAL",
                        _ => "TEXT",
                    };
                    (
                        (i + 1).to_string(),
                        json!({ "type": kind, "value": param_text(value) }),
                    )
                })
                .collect();
            body["bindings"] = Value::Object(bindings);
        }
        body
    }

    async fn run(&self, statement: &str, params: &[Value]) -> Result<Tabular, String> {
        let client = self.client.as_ref().map_err(Clone::clone)?;
        let base = self.base_url()?;
        let (token, token_type) = self.token()?;

        let send = |request: reqwest::RequestBuilder| {
            request
                .bearer_auth(token)
                .header("X-Snowflake-Authorization-Token-Type", token_type)
                .header("Accept", "application/json")
                .send()
        };

        let mut response = send(
            client
                .post(format!("{}/api/v2/statements", base))
                .json(&self.statement_body(statement, params)),
        )
        .await
        .map_err(truncate_error)?;

        let deadline = Instant::now() + self.target.call_timeout;
        loop {
            let status = response.status();
            let body: StatementResponse = if status.is_success() {
                response.json().await.map_err(truncate_error)?
            } else {
                let text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<StatementResponse>(&text)
                    .ok()
                    .and_then(|r| r.message)
                    .unwrap_or(text);
                return Err(truncate_error(format!("HTTP {}: {}", status.as_u16(), message)));
            };

            if status.as_u16() != 202 {
                return Ok(tabulate(body));
            }

            let status_url = body
                .statement_status_url
                .ok_or_else(|| "Statement accepted without a status URL".to_string())?;
            if Instant::now() >= deadline {
                return Err("Timed out waiting for statement to complete".to_string());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            response = send(client.get(format!("{}{}", base, status_url)))
                .await
                .map_err(truncate_error)?;
        }
    }
}

fn tabulate(body: StatementResponse) -> Tabular {
    let columns: Vec<String> = body
        .result_set_meta_data
        .unwrap_or_default()
        .row_type
        .into_iter()
        .map(|c| c.name)
        .collect();
    let rows = body
        .data
        .into_iter()
        .map(|values| columns.iter().cloned().zip(values).collect())
        .collect();
    Tabular { columns, rows }
}

#[async_trait]
impl ConnectionProvider for SnowflakeProvider {
    async fn connect(&self) -> ConnectionTestResult {
        let started = Instant::now();
        let ready = self
            .client
            .as_ref()
            .map_err(Clone::clone)
            .and_then(|_| self.base_url())
            .and_then(|_| self.token().map(|_| ()));
        match ready {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                ConnectionTestResult::ok("Snowflake client configured")
                    .elapsed_since(started)
                    .with_metadata(self.base_metadata())
            }
            Err(e) => ConnectionTestResult::failed("Snowflake connection failed", e)
                .elapsed_since(started)
                .with_metadata(self.base_metadata()),
        }
    }

    async fn disconnect(&self) -> ConnectionTestResult {
        self.connected.store(false, Ordering::SeqCst);
        ConnectionTestResult::ok("Disconnected")
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        match self.run("SELECT CURRENT_VERSION() AS VERSION", &[]).await {
            Ok(table) => {
                self.connected.store(true, Ordering::SeqCst);
                let mut meta = self.base_metadata();
                if let Some(version) = table.rows.first().and_then(|r| r.get("VERSION")) {
                    meta.insert("server_version".into(), version.clone());
                }
                ConnectionTestResult::ok("Snowflake connection successful")
                    .elapsed_since(started)
                    .with_metadata(meta)
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.target.connection.id,
                    account = ?self.account(),
                    error = %e,
                    "Snowflake test failed"
                );
                ConnectionTestResult::failed("Snowflake connection failed", e)
                    .elapsed_since(started)
                    .with_metadata(self.base_metadata())
            }
        }
    }

    async fn execute_query(&self, query: &str, params: &[Value]) -> QueryResult {
        let started = Instant::now();
        match self.run(query, params).await {
            Ok(table) => QueryResult::rows(table.columns, table.rows, started),
            Err(e) => QueryResult::failed(e, started),
        }
    }

    fn connection_info(&self) -> ProviderInfo {
        let mut info = self
            .target
            .info(Some("snowflake_sql_api"), self.connected.load(Ordering::SeqCst));
        if info.database.is_none() {
            info.database = self.database().map(str::to_string);
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::test_support::{serve, target};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    async fn mock_snowflake(pending_polls: usize) -> String {
        let polls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                "/api/v2/statements",
                post(move |headers: HeaderMap, Json(body): Json<Value>| async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer good-token");
                    if !authorized {
                        return (
                            StatusCode::UNAUTHORIZED,
                            Json(json!({ "message": "Invalid OAuth access token" })),
                        );
                    }
                    if pending_polls > 0 {
                        return (
                            StatusCode::ACCEPTED,
                            Json(json!({ "statementStatusUrl": "/api/v2/statements/h-1" })),
                        );
                    }
                    (
                        StatusCode::OK,
                        Json(json!({
                            "resultSetMetaData": { "rowType": [{ "name": "VERSION" }] },
                            "data": [["8.40.1"]],
                            "echo": body["warehouse"]
                        })),
                    )
                }),
            )
            .route(
                "/api/v2/statements/h-1",
                get(move || {
                    let polls = polls.clone();
                    async move {
                        if polls.fetch_add(1, Ordering::SeqCst) + 1 < pending_polls {
                            return (
                                StatusCode::ACCEPTED,
                                Json(json!({ "statementStatusUrl": "/api/v2/statements/h-1" })),
                            );
                        }
                        (
                            StatusCode::OK,
                            Json(json!({
                                "resultSetMetaData": { "rowType": [{ "name": "N" }, { "name": "LABEL" }] },
                                "data": [["1", "one"], ["2", null]]
                            })),
                        )
                    }
                }),
            );
        serve(router).await
    }

    fn provider(endpoint: &str, token: &str) -> SnowflakeProvider {
        SnowflakeProvider::new(target(
            json!({
                "name": "wh", "type": "snowflake", "provider": "Snowflake",
                "database_name": "ANALYTICS",
                "config": { "account": "acme-xy12345", "warehouse": "COMPUTE_WH", "endpoint": endpoint }
            }),
            json!({ "type": "oauth2", "client_id": "c", "client_secret": "s", "access_token": token }),
        ))
    }

    #[tokio::test]
    async fn test_roundtrip_reports_version_and_metadata() {
        let base = mock_snowflake(0).await;
        let result = provider(&base, "good-token").test_connection().await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.metadata["server_version"], "8.40.1");
        assert_eq!(result.metadata["warehouse"], "COMPUTE_WH");
        assert_eq!(result.metadata["schema"], DEFAULT_SCHEMA);
    }

    #[tokio::test]
    async fn test_rejected_token_surfaces_api_message() {
        let base = mock_snowflake(0).await;
        let result = provider(&base, "bad-token").test_connection().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Invalid OAuth access token"));
    }

    #[tokio::test]
    async fn test_accepted_statement_is_polled_to_completion() {
        let base = mock_snowflake(2).await;
        let result = provider(&base, "good-token")
            .execute_query("SELECT N, LABEL FROM T", &[])
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.columns, vec!["N", "LABEL"]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.rows[1]["LABEL"], Value::Null);
    }

    #[test]
    fn test_missing_token_is_configuration_error() {
        let p = SnowflakeProvider::new(target(
            json!({ "name": "wh", "type": "snowflake", "provider": "Snowflake", "config": { "account": "acme" } }),
            json!({ "type": "basic_auth", "username": "u", "password": "p" }),
        ));
        assert!(p.token().is_err());
        assert_eq!(p.base_url().unwrap(), "https://acme.snowflakecomputing.com");
    }

    #[test]
    fn test_bindings_are_positional() {
        let p = provider("http://unused", "t");
        let body = p.statement_body("SELECT ?", &[json!(7), json!("x")]);
        assert_eq!(body["bindings"]["1"]["type"], "FIXED");
        assert_eq!(body["bindings"]["1"]["value"], "7");
        assert_eq!(body["bindings"]["2"]["type"], "TEXT");
        assert_eq!(body["warehouse"], "COMPUTE_WH");
    }
}
