//! Generic HTTP APIs checked with a single request

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, RequestBuilder};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::{metadata, truncate_error, ConnectionProvider, ProviderTarget};
use crate::adapters::vault;
use crate::domain::{columns_of, ConnectionTestResult, ProviderInfo, QueryResult};

const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

pub struct HttpApiProvider {
    target: ProviderTarget,
    client: Result<reqwest::Client, String>,
    connected: AtomicBool,
}

impl HttpApiProvider {
    pub fn new(target: ProviderTarget) -> Self {
        let client = target.http_client();
        Self {
            target,
            client,
            connected: AtomicBool::new(false),
        }
    }

    fn base_url(&self) -> Option<String> {
        if let Some(url) = self.target.config("base_url") {
            return Some(url.trim_end_matches('/').to_string());
        }
        let conn = &self.target.connection;
        conn.host.as_deref().map(|host| match conn.port {
            Some(port) => format!("https://{}:{}", host, port),
            None => format!("https://{}", host),
        })
    }

    fn url_for(&self, path: &str) -> Result<String, String> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(path.to_string());
        }
        let base = self
            .base_url()
            .ok_or_else(|| "API connection requires config.base_url or host".to_string())?;
        if path.is_empty() {
            return Ok(base);
        }
        Ok(format!("{}/{}", base, path.trim_start_matches('/')))
    }

    fn auth_headers(&self) -> Result<HeaderMap, String> {
        let mut headers = HeaderMap::new();
        let mut insert = |name: &str, value: &str| -> Result<(), String> {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| format!("Invalid header name '{}': {}", name, e))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| format!("Invalid value for header '{}'", name))?;
            headers.insert(name, value);
            Ok(())
        };

        match vault::auth_type_of(&self.target.credentials) {
            "api_key" => {
                if let Some(key) = self.target.credential("api_key") {
                    let header = self
                        .target
                        .config("api_key_header")
                        .unwrap_or(DEFAULT_API_KEY_HEADER);
                    insert(header, key)?;
                }
            }
            "bearer_token" | "jwt" | "oauth2" => {
                if let Some(token) = self.target.access_token() {
                    insert("Authorization", &format!("Bearer {}", token))?;
                }
            }
            "custom_header" => {
                if let Some(Value::Object(custom)) = self.target.credentials.get("custom_headers") {
                    for (name, value) in custom {
                        if let Some(value) = value.as_str() {
                            insert(name, value)?;
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(headers)
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, String> {
        let client = self.client.as_ref().map_err(Clone::clone)?;
        let mut request = client.request(method, url).headers(self.auth_headers()?);
        if vault::auth_type_of(&self.target.credentials) == "basic_auth" {
            request = request.basic_auth(
                self.target.username().unwrap_or_default(),
                self.target.credential("password"),
            );
        }
        Ok(request)
    }

    fn expected_status(&self) -> Option<u16> {
        self.target.connection.health_check.expected_status
    }

    fn is_success(&self, status: u16) -> bool {
        match self.expected_status() {
            Some(expected) => status == expected,
            None => status < 400,
        }
    }

    fn base_metadata(&self, method: &str) -> Map<String, Value> {
        metadata([
            ("base_url", self.base_url().map(Value::from)),
            ("method", Some(Value::from(method))),
            ("expected_status", self.expected_status().map(Value::from)),
        ])
    }

    fn check_target(&self) -> (Method, String) {
        let hc = &self.target.connection.health_check;
        let method = Method::from_bytes(hc.method.to_uppercase().as_bytes()).unwrap_or(Method::GET);
        (method, hc.endpoint.clone().unwrap_or_default())
    }
}

fn body_to_rows(body: &str) -> Vec<Map<String, Value>> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => map,
                other => {
                    let mut row = Map::new();
                    row.insert("value".into(), other);
                    row
                }
            })
            .collect(),
        Ok(Value::Object(map)) => vec![map],
        Ok(other) => {
            let mut row = Map::new();
            row.insert("value".into(), other);
            vec![row]
        }
        Err(_) => {
            let mut row = Map::new();
            row.insert("body".into(), Value::from(truncate_error(body)));
            vec![row]
        }
    }
}

#[async_trait]
impl ConnectionProvider for HttpApiProvider {
    async fn connect(&self) -> ConnectionTestResult {
        let started = Instant::now();
        let ready = self
            .client
            .as_ref()
            .map_err(Clone::clone)
            .and_then(|_| self.url_for("").map(|_| ()))
            .and_then(|_| self.auth_headers().map(|_| ()));
        match ready {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                ConnectionTestResult::ok("API client configured")
                    .elapsed_since(started)
                    .with_metadata(self.base_metadata("GET"))
            }
            Err(e) => ConnectionTestResult::failed("API configuration invalid", e)
                .elapsed_since(started)
                .with_metadata(self.base_metadata("GET")),
        }
    }

    async fn disconnect(&self) -> ConnectionTestResult {
        self.connected.store(false, Ordering::SeqCst);
        ConnectionTestResult::ok("Disconnected")
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        let (method, endpoint) = self.check_target();
        let meta = self.base_metadata(method.as_str());

        let request = match self.url_for(&endpoint).and_then(|url| self.request(method, &url)) {
            Ok(request) => request,
            Err(e) => {
                return ConnectionTestResult::failed("API configuration invalid", e)
                    .elapsed_since(started)
                    .with_metadata(meta)
            }
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return ConnectionTestResult::failed("API request failed", truncate_error(e))
                    .elapsed_since(started)
                    .with_metadata(meta)
            }
        };

        self.connected.store(true, Ordering::SeqCst);
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let mut meta = meta;
        meta.insert("response_size".into(), Value::from(body.len()));

        if self.is_success(status) {
            let data = serde_json::from_str::<Value>(&body).ok();
            let result = ConnectionTestResult::ok(format!("API responded with status {}", status))
                .elapsed_since(started)
                .with_status_code(status)
                .with_metadata(meta);
            match data {
                Some(data) => result.with_data(data),
                None => result,
            }
        } else {
            let error = if body.is_empty() {
                format!("HTTP {}", status)
            } else {
                truncate_error(format!("HTTP {}: {}", status, body))
            };
            ConnectionTestResult::failed(format!("API returned unexpected status {}", status), error)
                .elapsed_since(started)
                .with_status_code(status)
                .with_metadata(meta)
        }
    }

    async fn execute_query(&self, query: &str, _params: &[Value]) -> QueryResult {
        let started = Instant::now();
        let request = match self
            .url_for(query.trim())
            .and_then(|url| self.request(Method::GET, &url))
        {
            Ok(request) => request,
            Err(e) => return QueryResult::failed(e, started),
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return QueryResult::failed(truncate_error(e), started),
        };
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return QueryResult::failed(
                truncate_error(format!("HTTP {}: {}", status.as_u16(), body)),
                started,
            );
        }

        let rows = body_to_rows(&body);
        QueryResult::rows(columns_of(&rows), rows, started)
    }

    fn connection_info(&self) -> ProviderInfo {
        let mut info = self.target.info(Some("http"), self.connected.load(Ordering::SeqCst));
        if info.host.is_none() {
            info.host = self.base_url();
        }
        info
    }
}
