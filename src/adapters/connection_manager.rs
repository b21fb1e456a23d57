//! Process-wide cache of live providers, one per connection id.
//!
//! The cache only answers "is this connection warm in this process". The stored
//! record stays the source of truth for status.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::adapters::provider_factory::ProviderFactory;
use crate::adapters::providers::{ConnectionProvider, ProviderTarget};
use crate::adapters::vault::CredentialVault;
use crate::domain::{Connection, ConnectionTestResult, CredentialMap, ProviderInfo, QueryResult};

pub struct ConnectionManager {
    factory: Arc<ProviderFactory>,
    vault: Arc<CredentialVault>,
    providers: RwLock<HashMap<String, Arc<dyn ConnectionProvider>>>,
    default_timeout: Duration,
}

fn no_provider(connection: &Connection) -> String {
    format!(
        "No provider available for connection type: {}",
        connection.connection_type
    )
}

impl ConnectionManager {
    pub fn new(
        factory: Arc<ProviderFactory>,
        vault: Arc<CredentialVault>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            factory,
            vault,
            providers: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    pub fn factory(&self) -> &ProviderFactory {
        &self.factory
    }

    /// Hard timeout applied to every provider call for `connection`.
    pub fn call_timeout(&self, connection: &Connection) -> Duration {
        connection
            .health_check
            .timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    fn target(&self, connection: &Connection, credentials: CredentialMap) -> ProviderTarget {
        ProviderTarget::new(connection.clone(), credentials, self.call_timeout(connection))
    }

    /// Cached provider for `connection.id`, created on first use.
    pub async fn get_provider(&self, connection: &Connection) -> Option<Arc<dyn ConnectionProvider>> {
        if let Some(provider) = self.providers.read().await.get(&connection.id) {
            return Some(provider.clone());
        }

        let mut providers = self.providers.write().await;
        if let Some(provider) = providers.get(&connection.id) {
            return Some(provider.clone());
        }

        let credentials = self.vault.decrypt_stored(connection.credentials.as_deref());
        let provider = self.factory.create(self.target(connection, credentials))?;
        providers.insert(connection.id.clone(), provider.clone());
        tracing::debug!(
            connection_id = %connection.id,
            connection_type = %connection.connection_type,
            cached = providers.len(),
            "Provider created"
        );
        Some(provider)
    }

    #[tracing::instrument(skip(self, connection), fields(connection_id = %connection.id, connection_type = %connection.connection_type))]
    pub async fn test_connection(&self, connection: &Connection) -> ConnectionTestResult {
        match self.get_provider(connection).await {
            Some(provider) => match self.bounded_test(connection, provider.as_ref()).await {
                Ok(result) => result,
                Err(timed_out) => {
                    // A hung provider is not reused by the next call.
                    self.providers.write().await.remove(&connection.id);
                    timed_out
                }
            },
            None => ConnectionTestResult::failed("Connection test failed", no_provider(connection)),
        }
    }

    /// Test a configuration that is not saved. The provider is discarded afterwards.
    #[tracing::instrument(skip(self, connection, credentials), fields(connection_type = %connection.connection_type))]
    pub async fn test_unsaved(
        &self,
        connection: &Connection,
        credentials: CredentialMap,
    ) -> ConnectionTestResult {
        let Some(provider) = self.factory.create(self.target(connection, credentials)) else {
            return ConnectionTestResult::failed("Connection test failed", no_provider(connection));
        };
        let result = self
            .bounded_test(connection, provider.as_ref())
            .await
            .unwrap_or_else(|timed_out| timed_out);
        provider.disconnect().await;
        result
    }

    /// `Err` carries the failure result when the provider missed its timeout.
    async fn bounded_test(
        &self,
        connection: &Connection,
        provider: &dyn ConnectionProvider,
    ) -> Result<ConnectionTestResult, ConnectionTestResult> {
        let started = Instant::now();
        let limit = self.call_timeout(connection);
        tokio::time::timeout(limit, provider.test_connection())
            .await
            .map_err(|_| {
                tracing::warn!(timeout_secs = limit.as_secs(), "Provider call timed out");
                ConnectionTestResult::failed(
                    "Connection test timed out",
                    format!("No response within {} seconds", limit.as_secs()),
                )
                .elapsed_since(started)
            })
    }

    #[tracing::instrument(skip(self, connection, query, params), fields(connection_id = %connection.id))]
    pub async fn execute_query(
        &self,
        connection: &Connection,
        query: &str,
        params: &[serde_json::Value],
    ) -> QueryResult {
        let started = Instant::now();
        let Some(provider) = self.get_provider(connection).await else {
            return QueryResult::failed(no_provider(connection), started);
        };
        let limit = self.call_timeout(connection);
        match tokio::time::timeout(limit, provider.execute_query(query, params)).await {
            Ok(result) => result,
            Err(_) => QueryResult::failed(
                format!("Query timed out after {} seconds", limit.as_secs()),
                started,
            ),
        }
    }

    /// Disconnect and evict. Unknown ids succeed.
    #[tracing::instrument(skip(self))]
    pub async fn close_connection(&self, connection_id: &str) -> ConnectionTestResult {
        let provider = self.providers.write().await.remove(connection_id);
        match provider {
            Some(provider) => {
                let closing = tokio::time::timeout(self.default_timeout, provider.disconnect());
                let result = match closing.await {
                    Ok(result) => result,
                    Err(_) => ConnectionTestResult::failed(
                        "Disconnect timed out",
                        "Provider evicted without a clean disconnect",
                    ),
                };
                tracing::debug!(success = result.success, "Provider closed");
                result
            }
            None => ConnectionTestResult::ok("Connection not found or already closed"),
        }
    }

    pub async fn close_all_connections(&self) -> HashMap<String, ConnectionTestResult> {
        let ids: Vec<String> = self.providers.read().await.keys().cloned().collect();
        let mut results = HashMap::with_capacity(ids.len());
        for id in ids {
            let result = self.close_connection(&id).await;
            results.insert(id, result);
        }
        tracing::info!(closed = results.len(), "Closed all cached providers");
        results
    }

    /// Snapshot of every cached provider in this process
    pub async fn active_connections(&self) -> HashMap<String, ProviderInfo> {
        self.providers
            .read()
            .await
            .iter()
            .map(|(id, provider)| (id.clone(), provider.connection_info()))
            .collect()
    }

    pub async fn active_count(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_cached(&self, connection_id: &str) -> bool {
        self.providers.read().await.contains_key(connection_id)
    }
}
