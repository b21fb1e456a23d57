//! Amazon Athena via `aws-sdk-athena`

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_athena::error::DisplayErrorContext;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration};
use aws_sdk_athena::Client;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{metadata, truncate_error, ConnectionProvider, ProviderTarget};
use crate::domain::{ConnectionTestResult, ProviderInfo, QueryResult};

const DEFAULT_REGION: &str = "us-east-1";
const DEFAULT_WORKGROUP: &str = "primary";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct AthenaProvider {
    target: ProviderTarget,
    client: RwLock<Option<Client>>,
    connected: AtomicBool,
}

impl AthenaProvider {
    pub fn new(target: ProviderTarget) -> Self {
        Self {
            target,
            client: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn region(&self) -> &str {
        self.target.config("region").unwrap_or(DEFAULT_REGION)
    }

    fn workgroup(&self) -> &str {
        self.target.config("workgroup").unwrap_or(DEFAULT_WORKGROUP)
    }

    fn database(&self) -> Option<&str> {
        self.target
            .connection
            .database_name
            .as_deref()
            .or_else(|| self.target.config("database"))
    }

    fn output_location(&self) -> Option<&str> {
        self.target.config("s3_output_location")
    }

    fn base_metadata(&self) -> Map<String, Value> {
        metadata([
            ("region", Some(self.region())),
            ("workgroup", Some(self.workgroup())),
            ("database", self.database()),
            ("output_location", self.output_location()),
        ])
    }

    async fn build_client(&self) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region().to_string()));

        if let (Some(key_id), Some(secret)) = (
            self.target.credential("access_key_id"),
            self.target.credential("secret_access_key"),
        ) {
            let credentials = aws_sdk_athena::config::Credentials::new(
                key_id,
                secret,
                self.target.credential("session_token").map(str::to_string),
                None,
                "conduit-connection",
            );
            loader = loader.credentials_provider(credentials);
        }
        if let Some(endpoint) = self.target.config("endpoint") {
            loader = loader.endpoint_url(endpoint);
        }

        Client::new(&loader.load().await)
    }

    async fn ensure_client(&self) -> Client {
        if let Some(client) = self.client.read().await.as_ref() {
            return client.clone();
        }
        let mut guard = self.client.write().await;
        if let Some(client) = guard.as_ref() {
            return client.clone();
        }
        let client = self.build_client().await;
        *guard = Some(client.clone());
        self.connected.store(true, Ordering::SeqCst);
        client
    }

    async fn run(
        &self,
        query: &str,
        params: &[Value],
    ) -> Result<(Vec<String>, Vec<Map<String, Value>>), String> {
        let client = self.ensure_client().await;

        let mut request = client
            .start_query_execution()
            .query_string(query)
            .work_group(self.workgroup());
        if let Some(db) = self.database() {
            request = request
                .query_execution_context(QueryExecutionContext::builder().database(db).build());
        }
        if let Some(location) = self.output_location() {
            request = request.result_configuration(
                ResultConfiguration::builder().output_location(location).build(),
            );
        }
        for param in params {
            request = request.execution_parameters(sql_literal(param));
        }

        let started = request
            .send()
            .await
            .map_err(|e| truncate_error(DisplayErrorContext(&e)))?;
        let execution_id = started
            .query_execution_id()
            .ok_or_else(|| "Athena returned no query execution id".to_string())?
            .to_string();

        let deadline = Instant::now() + self.target.call_timeout;
        loop {
            let execution = client
                .get_query_execution()
                .query_execution_id(&execution_id)
                .send()
                .await
                .map_err(|e| truncate_error(DisplayErrorContext(&e)))?;
            let status = execution.query_execution().and_then(|q| q.status());
            match status.and_then(|s| s.state()) {
                Some(QueryExecutionState::Succeeded) => break,
                Some(state @ (QueryExecutionState::Failed | QueryExecutionState::Cancelled)) => {
                    let reason = status
                        .and_then(|s| s.state_change_reason())
                        .unwrap_or("no reason given");
                    return Err(truncate_error(format!("Query {}: {}", state.as_str(), reason)));
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(format!("Timed out waiting for query {}", execution_id));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let output = client
            .get_query_results()
            .query_execution_id(&execution_id)
            .send()
            .await
            .map_err(|e| truncate_error(DisplayErrorContext(&e)))?;

        let Some(result_set) = output.result_set() else {
            return Ok((Vec::new(), Vec::new()));
        };
        let columns: Vec<String> = result_set
            .result_set_metadata()
            .map(|m| m.column_info().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let raw: Vec<Vec<Value>> = result_set
            .rows()
            .iter()
            .map(|row| {
                row.data()
                    .iter()
                    .map(|d| d.var_char_value().map(Value::from).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok((columns.clone(), rows_after_header(&columns, raw)))
    }
}

/// Athena repeats the column names as the first row of a SELECT result.
fn rows_after_header(columns: &[String], raw: Vec<Vec<Value>>) -> Vec<Map<String, Value>> {
    let mut rows = raw.into_iter().peekable();
    let is_header = rows.peek().is_some_and(|first| {
        first.len() == columns.len()
            && first.iter().zip(columns).all(|(v, c)| v.as_str() == Some(c.as_str()))
    });
    if is_header {
        rows.next();
    }
    rows.map(|values| columns.iter().cloned().zip(values).collect())
        .collect()
}

/// Execution parameters are substituted as SQL literals.
fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

#[async_trait]
impl ConnectionProvider for AthenaProvider {
    async fn connect(&self) -> ConnectionTestResult {
        let started = Instant::now();
        self.ensure_client().await;
        ConnectionTestResult::ok("Athena client configured")
            .elapsed_since(started)
            .with_metadata(self.base_metadata())
    }

    async fn disconnect(&self) -> ConnectionTestResult {
        self.client.write().await.take();
        self.connected.store(false, Ordering::SeqCst);
        ConnectionTestResult::ok("Disconnected")
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        match self.run("SELECT 1", &[]).await {
            Ok(_) => ConnectionTestResult::ok("Athena connection successful")
                .elapsed_since(started)
                .with_metadata(self.base_metadata()),
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.target.connection.id,
                    region = self.region(),
                    workgroup = self.workgroup(),
                    error = %e,
                    "Athena test failed"
                );
                ConnectionTestResult::failed("Athena connection failed", e)
                    .elapsed_since(started)
                    .with_metadata(self.base_metadata())
            }
        }
    }

    async fn execute_query(&self, query: &str, params: &[Value]) -> QueryResult {
        let started = Instant::now();
        match self.run(query, params).await {
            Ok((columns, rows)) => QueryResult::rows(columns, rows, started),
            Err(e) => QueryResult::failed(e, started),
        }
    }

    fn connection_info(&self) -> ProviderInfo {
        let mut info = self
            .target
            .info(Some("athena"), self.connected.load(Ordering::SeqCst));
        if info.host.is_none() {
            info.host = Some(format!("athena.{}.amazonaws.com", self.region()));
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::test_support::target;
    use serde_json::json;

    fn provider(config: Value) -> AthenaProvider {
        AthenaProvider::new(target(
            json!({ "name": "lake", "type": "aws_athena", "provider": "AWS", "database_name": "logs", "config": config }),
            json!({ "type": "aws_access_key", "access_key_id": "AKIAEXAMPLE", "secret_access_key": "secret" }),
        ))
    }

    #[test]
    fn test_metadata_defaults() {
        let p = provider(json!({ "s3_output_location": "s3://results/" }));
        let meta = p.base_metadata();
        assert_eq!(meta["region"], DEFAULT_REGION);
        assert_eq!(meta["workgroup"], DEFAULT_WORKGROUP);
        assert_eq!(meta["database"], "logs");
        assert_eq!(meta["output_location"], "s3://results/");
    }

    #[test]
    fn test_header_row_is_dropped() {
        let columns = vec!["id".to_string(), "name".to_string()];
        let raw = vec![
            vec![json!("id"), json!("name")],
            vec![json!("1"), json!("alpha")],
        ];
        let rows = rows_after_header(&columns, raw);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "alpha");

        let data_only = vec![vec![json!("2"), json!("beta")]];
        assert_eq!(rows_after_header(&columns, data_only).len(), 1);
    }

    #[test]
    fn test_sql_literal_quotes_strings() {
        assert_eq!(sql_literal(&json!("o'brien")), "'o''brien'");
        assert_eq!(sql_literal(&json!(3)), "3");
        assert_eq!(sql_literal(&Value::Null), "NULL");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_structured_failure() {
        let p = provider(json!({ "endpoint": "http://127.0.0.1:1" }));
        let result = p.test_connection().await;
        assert!(!result.success);
        assert_eq!(result.message, "Athena connection failed");
        assert_eq!(result.metadata["workgroup"], DEFAULT_WORKGROUP);
    }
}
