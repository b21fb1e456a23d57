//! Object storage: Amazon S3 (or compatible) and local filesystem roots.
//!
//! There is no query language here. `execute_query` accepts `list [prefix]`
//! and `head <key>`.

use async_trait::async_trait;
use futures::StreamExt;
use object_store::aws::{AmazonS3Builder, AwsCredential};
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore, StaticCredentialProvider};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use super::{metadata, truncate_error, ConnectionProvider, ProviderTarget};
use crate::domain::{ConnectionTestResult, ProviderInfo, QueryResult};

const DEFAULT_REGION: &str = "us-east-1";
const TEST_LIST_LIMIT: usize = 5;
const QUERY_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
enum StorageCommand {
    List(Option<String>),
    Head(String),
}

impl StorageCommand {
    fn parse(query: &str) -> Result<Self, String> {
        let mut parts = query.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(cmd), prefix, None) if cmd.eq_ignore_ascii_case("list") => {
                Ok(Self::List(prefix.map(str::to_string)))
            }
            (Some(cmd), Some(key), None) if cmd.eq_ignore_ascii_case("head") => {
                Ok(Self::Head(key.to_string()))
            }
            _ => Err(format!(
                "Unsupported storage operation '{}'; expected 'list [prefix]' or 'head <key>'",
                query.trim()
            )),
        }
    }
}

pub struct ObjectStoreProvider {
    target: ProviderTarget,
    store: RwLock<Option<Arc<dyn ObjectStore>>>,
    connected: AtomicBool,
}

impl ObjectStoreProvider {
    pub fn new(target: ProviderTarget) -> Self {
        Self {
            target,
            store: RwLock::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn is_local(&self) -> bool {
        self.target.connection.provider.eq_ignore_ascii_case("local")
            || self.target.config("root").is_some()
    }

    fn bucket(&self) -> Option<&str> {
        self.target
            .config("bucket")
            .or(self.target.connection.database_name.as_deref())
    }

    fn region(&self) -> &str {
        self.target.config("region").unwrap_or(DEFAULT_REGION)
    }

    fn base_prefix(&self) -> Option<&str> {
        self.target.config("prefix")
    }

    fn base_metadata(&self) -> Map<String, Value> {
        if self.is_local() {
            metadata([
                ("backend", Some("local")),
                ("root", self.target.config("root")),
                ("prefix", self.base_prefix()),
            ])
        } else {
            metadata([
                ("backend", Some("s3")),
                ("bucket", self.bucket()),
                ("region", Some(self.region())),
                ("endpoint", self.target.config("endpoint")),
                ("prefix", self.base_prefix()),
            ])
        }
    }

    fn build_store(&self) -> Result<Arc<dyn ObjectStore>, String> {
        if self.is_local() {
            let root = self
                .target
                .config("root")
                .ok_or_else(|| "Local storage requires config.root".to_string())?;
            let store = LocalFileSystem::new_with_prefix(root).map_err(truncate_error)?;
            return Ok(Arc::new(store));
        }

        let bucket = self
            .bucket()
            .ok_or_else(|| "S3 storage requires config.bucket".to_string())?;

        let mut builder = match (
            self.target.credential("access_key_id"),
            self.target.credential("secret_access_key"),
        ) {
            (Some(key_id), Some(secret_key)) => {
                let credential = AwsCredential {
                    key_id: key_id.to_string(),
                    secret_key: secret_key.to_string(),
                    token: self.target.credential("session_token").map(str::to_string),
                };
                AmazonS3Builder::new()
                    .with_credentials(Arc::new(StaticCredentialProvider::new(credential)))
            }
            _ => AmazonS3Builder::from_env(),
        };

        builder = builder.with_bucket_name(bucket).with_region(self.region());
        if let Some(endpoint) = self.target.config("endpoint") {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
        }
        if self.target.connection.config_bool("allow_http").unwrap_or(false) {
            builder = builder.with_allow_http(true);
        }

        let store = builder.build().map_err(truncate_error)?;
        Ok(Arc::new(store))
    }

    async fn ensure_store(&self) -> Result<Arc<dyn ObjectStore>, String> {
        if let Some(store) = self.store.read().await.as_ref() {
            return Ok(store.clone());
        }
        let mut guard = self.store.write().await;
        if let Some(store) = guard.as_ref() {
            return Ok(store.clone());
        }
        let store = self.build_store()?;
        *guard = Some(store.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(store)
    }

    fn scoped(&self, path: Option<&str>) -> Option<ObjectPath> {
        match (self.base_prefix(), path) {
            (None, None) => None,
            (Some(base), None) => Some(ObjectPath::from(base)),
            (None, Some(p)) => Some(ObjectPath::from(p)),
            (Some(base), Some(p)) => Some(ObjectPath::from(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                p.trim_start_matches('/')
            ))),
        }
    }

    async fn list(
        &self,
        store: &dyn ObjectStore,
        prefix: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ObjectMeta>, String> {
        let prefix = self.scoped(prefix);
        let mut stream = store.list(prefix.as_ref());
        let mut objects = Vec::new();
        while let Some(item) = stream.next().await {
            objects.push(item.map_err(truncate_error)?);
            if objects.len() >= limit {
                break;
            }
        }
        Ok(objects)
    }
}

fn object_row(meta: &ObjectMeta) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("key".into(), Value::from(meta.location.to_string()));
    row.insert("size".into(), Value::from(meta.size as u64));
    row.insert(
        "last_modified".into(),
        Value::from(meta.last_modified.to_rfc3339()),
    );
    row.insert(
        "e_tag".into(),
        meta.e_tag.clone().map(Value::from).unwrap_or(Value::Null),
    );
    row
}

fn object_columns() -> Vec<String> {
    ["key", "size", "last_modified", "e_tag"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[async_trait]
impl ConnectionProvider for ObjectStoreProvider {
    async fn connect(&self) -> ConnectionTestResult {
        let started = Instant::now();
        match self.ensure_store().await {
            Ok(_) => ConnectionTestResult::ok("Storage client configured")
                .elapsed_since(started)
                .with_metadata(self.base_metadata()),
            Err(e) => ConnectionTestResult::failed("Storage connection failed", e)
                .elapsed_since(started)
                .with_metadata(self.base_metadata()),
        }
    }

    async fn disconnect(&self) -> ConnectionTestResult {
        self.store.write().await.take();
        self.connected.store(false, Ordering::SeqCst);
        ConnectionTestResult::ok("Disconnected")
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let started = Instant::now();
        let store = match self.ensure_store().await {
            Ok(store) => store,
            Err(e) => {
                return ConnectionTestResult::failed("Storage connection failed", e)
                    .elapsed_since(started)
                    .with_metadata(self.base_metadata())
            }
        };

        match self.list(store.as_ref(), None, TEST_LIST_LIMIT).await {
            Ok(objects) => {
                let keys: Vec<Value> = objects
                    .iter()
                    .map(|m| Value::from(m.location.to_string()))
                    .collect();
                let mut meta = self.base_metadata();
                meta.insert("sample_size".into(), Value::from(keys.len()));
                ConnectionTestResult::ok("Storage connection successful")
                    .elapsed_since(started)
                    .with_metadata(meta)
                    .with_data(Value::Array(keys))
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.target.connection.id,
                    error = %e,
                    "Storage listing failed"
                );
                ConnectionTestResult::failed("Storage listing failed", e)
                    .elapsed_since(started)
                    .with_metadata(self.base_metadata())
            }
        }
    }

    async fn execute_query(&self, query: &str, _params: &[Value]) -> QueryResult {
        let started = Instant::now();
        let command = match StorageCommand::parse(query) {
            Ok(command) => command,
            Err(e) => return QueryResult::failed(e, started),
        };
        let store = match self.ensure_store().await {
            Ok(store) => store,
            Err(e) => return QueryResult::failed(e, started),
        };

        let objects = match command {
            StorageCommand::List(prefix) => {
                self.list(store.as_ref(), prefix.as_deref(), QUERY_LIST_LIMIT)
                    .await
            }
            StorageCommand::Head(key) => {
                let path = self.scoped(Some(&key)).unwrap_or_else(|| ObjectPath::from(key));
                store
                    .head(&path)
                    .await
                    .map(|meta| vec![meta])
                    .map_err(truncate_error)
            }
        };

        match objects {
            Ok(objects) => QueryResult::rows(
                object_columns(),
                objects.iter().map(object_row).collect(),
                started,
            ),
            Err(e) => QueryResult::failed(e, started),
        }
    }

    fn connection_info(&self) -> ProviderInfo {
        let mut info = self
            .target
            .info(Some("object_store"), self.connected.load(Ordering::SeqCst));
        if info.database.is_none() {
            info.database = self.bucket().map(str::to_string);
        }
        info
    }
}
