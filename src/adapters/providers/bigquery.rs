//! Google BigQuery through the REST `jobs.query` endpoint.
//!
//! Authenticates with an OAuth access token from the credentials, or mints one
//! from a service account key (`client_email` + `private_key`).

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::{metadata, param_text, truncate_error, ConnectionProvider, ProviderTarget};
use crate::domain::{ConnectionTestResult, ProviderInfo, QueryResult};

const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_LOCATION: &str = "US";
const SCOPE: &str = "https://www.googleapis.com/auth/bigquery.readonly";
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: Option<bool>,
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type", default)]
    field_type: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

pub struct BigQueryProvider {
    target: ProviderTarget,
    client: Result<reqwest::Client, String>,
    token: RwLock<Option<String>>,
    connected: AtomicBool,
}

impl BigQueryProvider {
    pub fn new(target: ProviderTarget) -> Self {
        let client = target.http_client();
        Self {
            target,
            client,
            token: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn project_id(&self) -> Option<&str> {
        self.target
            .config("project_id")
            .or_else(|| self.target.credential("project_id"))
    }

    fn dataset(&self) -> Option<&str> {
        self.target
            .config("dataset")
            .or(self.target.connection.database_name.as_deref())
    }

    fn location(&self) -> &str {
        self.target.config("location").unwrap_or(DEFAULT_LOCATION)
    }

    fn base_url(&self) -> String {
        self.target
            .config("endpoint")
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string()
    }

    fn base_metadata(&self) -> Map<String, Value> {
        metadata([
            ("project_id", self.project_id()),
            ("dataset", self.dataset()),
            ("location", Some(self.location())),
        ])
    }

    fn client(&self) -> Result<&reqwest::Client, String> {
        self.client.as_ref().map_err(Clone::clone)
    }

    async fn access_token(&self) -> Result<String, String> {
        if let Some(token) = self.target.access_token() {
            return Ok(token.to_string());
        }
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }

        let mut guard = self.token.write().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.exchange_service_account().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn exchange_service_account(&self) -> Result<String, String> {
        let (email, key) = match (
            self.target.credential("client_email"),
            self.target.credential("private_key"),
        ) {
            (Some(email), Some(key)) => (email, key),
            _ => {
                return Err(
                    "BigQuery requires an access_token or a service account key".to_string(),
                )
            }
        };
        let token_uri = self.target.credential("token_uri").unwrap_or(DEFAULT_TOKEN_URI);

        let now = chrono::Utc::now().timestamp();
        let claims = ServiceAccountClaims {
            iss: email,
            scope: SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(key.as_bytes())
            .map_err(|e| format!("Invalid service account private key: {}", e))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| format!("Failed to sign service account assertion: {}", e))?;

        let response = self
            .client()?
            .post(token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .map_err(truncate_error)?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(truncate_error(format!("Token exchange failed: HTTP {}: {}", status, text)));
        }
        let token: TokenResponse = response.json().await.map_err(truncate_error)?;
        Ok(token.access_token)
    }

    fn query_body(&self, query: &str, params: &[Value]) -> Value {
        let timeout_ms = u64::try_from(self.target.call_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut body = json!({
            "query": query,
            "useLegacySql": false,
            "location": self.location(),
            "timeoutMs": timeout_ms,
        });
        if let (Some(project), Some(dataset)) = (self.project_id(), self.dataset()) {
            body["defaultDataset"] = json!({ "projectId": project, "datasetId": dataset });
        }
        if !params.is_empty() {
            body["parameterMode"] = Value::from("POSITIONAL");
            body["queryParameters"] = params
                .iter()
                .map(|value| {
                    let kind = match value {
                        Value::Bool(_) => "BOOL",
                        Value::Number(n) if n.is_i64() || n.is_u64() => "INT64",
                        Value::Number(_) => "FLOAT64",
                        _ => "STRING",
                    };
                    json!({
                        "parameterType": { "type": kind },
                        "parameterValue": { "value": param_text(value) }
                    })
                })
                .collect();
        }
        body
    }

    async fn run(
        &self,
        query: &str,
        params: &[Value],
    ) -> Result<(Vec<String>, Vec<Map<String, Value>>), String> {
        let project = self
            .project_id()
            .ok_or_else(|| "BigQuery connection requires config.project_id".to_string())?;
        let token = self.access_token().await?;
        let client = self.client()?;
        let base = format!("{}/bigquery/v2/projects/{}/queries", self.base_url(), project);

        let mut response = client
            .post(&base)
            .bearer_auth(&token)
            .json(&self.query_body(query, params))
            .send()
            .await
            .map_err(truncate_error)?;

        let deadline = Instant::now() + self.target.call_timeout;
        loop {
            if !response.status().is_success() {
                let status = response.status().as_u16();
                let text = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<Value>(&text)
                    .ok()
                    .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                    .unwrap_or(text);
                return Err(truncate_error(format!("HTTP {}: {}", status, message)));
            }

            let body: QueryResponse = response.json().await.map_err(truncate_error)?;
            if body.job_complete != Some(false) {
                return Ok(tabulate(body));
            }

            let job = body
                .job_reference
                .ok_or_else(|| "Incomplete job without a job reference".to_string())?;
            if Instant::now() >= deadline {
                return Err(format!("Timed out waiting for job {}", job.job_id));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            let location = job.location.unwrap_or_else(|| self.location().to_string());
            response = client
                .get(format!("{}/{}", base, job.job_id))
                .query(&[("location", location.as_str())])
                .bearer_auth(&token)
                .send()
                .await
                .map_err(truncate_error)?;
        }
    }
}

fn typed_cell(field_type: &str, value: Value) -> Value {
    let parsed = match (value.as_str(), field_type) {
        (Some(raw), "INTEGER" | "INT64") => raw.parse::<i64>().ok().map(Value::from),
        (Some(raw), "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC") => {
            raw.parse::<f64>().ok().map(|f| json!(f))
        }
        (Some(raw), "BOOLEAN" | "BOOL") => raw.parse::<bool>().ok().map(Value::from),
        _ => None,
    };
    parsed.unwrap_or(value)
}

fn tabulate(body: QueryResponse) -> (Vec<String>, Vec<Map<String, Value>>) {
    let fields = body.schema.unwrap_or_default().fields;
    let columns: Vec<String> = fields.iter().map(|f| f.name.clone()).collect();
    let rows = body
        .rows
        .into_iter()
        .map(|row| {
            fields
                .iter()
                .zip(row.f)
                .map(|(field, cell)| (field.name.clone(), typed_cell(&field.field_type, cell.v)))
                .collect()
        })
        .collect();
    (columns, rows)
}

#[async_trait]
impl ConnectionProvider for BigQueryProvider {
    async fn connect(&self) -> ConnectionTestResult {
        let started = Instant::now();
        let ready = match (self.client(), self.project_id()) {
            (Err(e), _) => Err(e),
            (_, None) => Err("BigQuery connection requires config.project_id".to_string()),
            _ => self.access_token().await.map(|_| ()),
        };
        match ready {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                ConnectionTestResult::ok("BigQuery client authenticated")
                    .elapsed_since(started)
                    .with_metadata(self.base_metadata())
            }
            Err(e) => ConnectionTestResult::failed("BigQuery connection failed", e)
                .elapsed_since(started)
                .with_metadata(self.base_metadata()),
        }
    }

    async fn disconnect(&self) -> ConnectionTestResult {
        self.token.write().await.take();
        self.connected.store(false, Ordering::SeqCst);
        ConnectionTestResult::ok("Disconnected")
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        match self.run("SELECT 1 AS ok", &[]).await {
            Ok(_) => {
                self.connected.store(true, Ordering::SeqCst);
                ConnectionTestResult::ok("BigQuery connection successful")
                    .elapsed_since(started)
                    .with_metadata(self.base_metadata())
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.target.connection.id,
                    project_id = ?self.project_id(),
                    error = %e,
                    "BigQuery test failed"
                );
                ConnectionTestResult::failed("BigQuery connection failed", e)
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
            .info(Some("bigquery_rest"), self.connected.load(Ordering::SeqCst));
        if info.database.is_none() {
            info.database = self.dataset().map(str::to_string);
        }
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::test_support::{serve, target};
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn mock_bigquery() -> String {
        let router = Router::new()
            .route(
                "/bigquery/v2/projects/:project/queries",
                post(
                    |Path(project): Path<String>, headers: HeaderMap, Json(body): Json<Value>| async move {
                        if headers.get("authorization").and_then(|v| v.to_str().ok())
                            != Some("Bearer ya29.good")
                        {
                            return (
                                StatusCode::UNAUTHORIZED,
                                Json(json!({ "error": { "code": 401, "message": "Request had invalid authentication credentials" } })),
                            );
                        }
                        if body["query"] == "SELECT slow" {
                            return (
                                StatusCode::OK,
                                Json(json!({
                                    "jobComplete": false,
                                    "jobReference": { "projectId": project, "jobId": "job-1", "location": "EU" }
                                })),
                            );
                        }
                        (
                            StatusCode::OK,
                            Json(json!({
                                "jobComplete": true,
                                "schema": { "fields": [
                                    { "name": "ok", "type": "INTEGER" },
                                    { "name": "project", "type": "STRING" }
                                ] },
                                "rows": [{ "f": [{ "v": "1" }, { "v": project }] }]
                            })),
                        )
                    },
                ),
            )
            .route(
                "/bigquery/v2/projects/:project/queries/:job",
                get(|| async {
                    Json(json!({
                        "jobComplete": true,
                        "schema": { "fields": [{ "name": "ratio", "type": "FLOAT" }, { "name": "flag", "type": "BOOLEAN" }] },
                        "rows": [{ "f": [{ "v": "0.5" }, { "v": "true" }] }]
                    }))
                }),
            );
        serve(router).await
    }

    fn provider(endpoint: &str, token: &str) -> BigQueryProvider {
        BigQueryProvider::new(target(
            json!({
                "name": "bq", "type": "bigquery", "provider": "Google",
                "config": { "project_id": "acme-analytics", "dataset": "events", "endpoint": endpoint }
            }),
            json!({ "type": "bearer_token", "bearer_token": token }),
        ))
    }

    #[tokio::test]
    async fn test_roundtrip_with_access_token() {
        let base = mock_bigquery().await;
        let result = provider(&base, "ya29.good").test_connection().await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.metadata["project_id"], "acme-analytics");
        assert_eq!(result.metadata["location"], DEFAULT_LOCATION);
    }

    #[tokio::test]
    async fn test_rows_are_typed_by_schema() {
        let base = mock_bigquery().await;
        let result = provider(&base, "ya29.good").execute_query("SELECT 1", &[]).await;
        assert!(result.success);
        assert_eq!(result.columns, vec!["ok", "project"]);
        assert_eq!(result.rows[0]["ok"], 1);
        assert_eq!(result.rows[0]["project"], "acme-analytics");
    }

    #[tokio::test]
    async fn test_incomplete_job_is_polled() {
        let base = mock_bigquery().await;
        let result = provider(&base, "ya29.good").execute_query("SELECT slow", &[]).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.rows[0]["ratio"], 0.5);
        assert_eq!(result.rows[0]["flag"], true);
    }

    #[tokio::test]
    async fn test_auth_error_message_is_extracted() {
        let base = mock_bigquery().await;
        let result = provider(&base, "ya29.bad").test_connection().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid authentication credentials"));
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_softly() {
        let p = BigQueryProvider::new(target(
            json!({ "name": "bq", "type": "bigquery", "provider": "Google", "config": { "project_id": "p" } }),
            json!({}),
        ));
        let result = p.connect().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("service account"));
    }

    #[test]
    fn test_default_dataset_and_positional_parameters() {
        let p = provider("http://unused", "t");
        let body = p.query_body("SELECT ?", &[json!(true)]);
        assert_eq!(body["defaultDataset"]["datasetId"], "events");
        assert_eq!(body["useLegacySql"], false);
        assert_eq!(body["queryParameters"][0]["parameterType"]["type"], "BOOL");
    }
}
