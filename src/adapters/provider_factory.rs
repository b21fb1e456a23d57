//! Registry of provider builders keyed by connection type

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::adapters::providers::{
    AthenaProvider, BigQueryProvider, ConnectionProvider, HttpApiProvider, ObjectStoreProvider,
    ProviderTarget, RelationalProvider, SnowflakeProvider,
};
use crate::domain::ConnectionType;

/// Builds a provider for one connection
pub trait ProviderBuilder: Send + Sync {
    fn build(&self, target: ProviderTarget) -> Arc<dyn ConnectionProvider>;
}

impl<F> ProviderBuilder for F
where
    F: Fn(ProviderTarget) -> Arc<dyn ConnectionProvider> + Send + Sync,
{
    fn build(&self, target: ProviderTarget) -> Arc<dyn ConnectionProvider> {
        self(target)
    }
}

pub struct ProviderFactory {
    builders: RwLock<HashMap<ConnectionType, Arc<dyn ProviderBuilder>>>,
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProviderFactory {
    /// Empty factory: every type is unsupported until registered.
    pub fn new() -> Self {
        Self {
            builders: RwLock::new(HashMap::new()),
        }
    }

    /// Factory with every built-in provider registered
    pub fn with_defaults() -> Self {
        let factory = Self::new();

        for t in [
            ConnectionType::Postgresql,
            ConnectionType::Mysql,
            ConnectionType::Sqlite,
        ] {
            factory.register_provider(t, |target: ProviderTarget| {
                Arc::new(RelationalProvider::new(target)) as Arc<dyn ConnectionProvider>
            });
        }
        factory.register_provider(ConnectionType::AwsAthena, |target: ProviderTarget| {
            Arc::new(AthenaProvider::new(target)) as Arc<dyn ConnectionProvider>
        });
        factory.register_provider(ConnectionType::Snowflake, |target: ProviderTarget| {
            Arc::new(SnowflakeProvider::new(target)) as Arc<dyn ConnectionProvider>
        });
        factory.register_provider(ConnectionType::Bigquery, |target: ProviderTarget| {
            Arc::new(BigQueryProvider::new(target)) as Arc<dyn ConnectionProvider>
        });
        factory.register_provider(ConnectionType::AwsS3, |target: ProviderTarget| {
            Arc::new(ObjectStoreProvider::new(target)) as Arc<dyn ConnectionProvider>
        });
        factory.register_provider(ConnectionType::Api, |target: ProviderTarget| {
            Arc::new(HttpApiProvider::new(target)) as Arc<dyn ConnectionProvider>
        });

        factory
    }

    /// Register or replace the builder for `connection_type`.
    pub fn register_provider<B>(&self, connection_type: ConnectionType, builder: B)
    where
        B: ProviderBuilder + 'static,
    {
        tracing::debug!(connection_type = %connection_type, "registering connection provider");
        self.builders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_type, Arc::new(builder));
    }

    /// Build a provider, or `None` when the type has no registration.
    pub fn create(&self, target: ProviderTarget) -> Option<Arc<dyn ConnectionProvider>> {
        let connection_type = target.connection.connection_type;
        let builder = self
            .builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&connection_type)
            .cloned();

        match builder {
            Some(builder) => Some(builder.build(target)),
            None => {
                tracing::warn!(
                    connection_type = %connection_type,
                    connection_id = %target.connection.id,
                    "No provider available for connection type"
                );
                None
            }
        }
    }

    pub fn supports(&self, connection_type: ConnectionType) -> bool {
        self.builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&connection_type)
    }

    /// Registered types, sorted by name
    pub fn supported_types(&self) -> Vec<ConnectionType> {
        let mut types: Vec<_> = self
            .builders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        types.sort_by_key(|t| t.as_str());
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::test_support::target;
    use crate::domain::{ConnectionTestResult, ProviderInfo, QueryResult};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoProvider(ProviderTarget);

    #[async_trait]
    impl ConnectionProvider for EchoProvider {
        async fn connect(&self) -> ConnectionTestResult {
            ConnectionTestResult::ok("connected")
        }
        async fn disconnect(&self) -> ConnectionTestResult {
            ConnectionTestResult::ok("disconnected")
        }
        async fn test_connection(&self) -> ConnectionTestResult {
            ConnectionTestResult::ok("echo")
        }
        async fn execute_query(&self, _query: &str, _params: &[Value]) -> QueryResult {
            QueryResult::rows(Vec::new(), Vec::new(), std::time::Instant::now())
        }
        fn connection_info(&self) -> ProviderInfo {
            self.0.info(Some("echo"), true)
        }
    }

    #[test]
    fn test_defaults_cover_built_in_types() {
        let factory = ProviderFactory::with_defaults();
        for t in [
            ConnectionType::Postgresql,
            ConnectionType::Mysql,
            ConnectionType::Sqlite,
            ConnectionType::AwsAthena,
            ConnectionType::Snowflake,
            ConnectionType::Bigquery,
            ConnectionType::AwsS3,
            ConnectionType::Api,
        ] {
            assert!(factory.supports(t), "{} should be supported", t);
        }
        assert!(!factory.supports(ConnectionType::Mongodb));
        assert!(!factory.supports(ConnectionType::Redshift));
    }

    #[test]
    fn test_unknown_type_yields_none() {
        let factory = ProviderFactory::with_defaults();
        let t = target(json!({ "name": "m", "type": "mongodb", "provider": "MongoDB" }), json!({}));
        assert!(factory.create(t).is_none());
    }

    #[tokio::test]
    async fn test_runtime_registration_extends_factory() {
        let factory = ProviderFactory::with_defaults();
        factory.register_provider(ConnectionType::Mongodb, |target: ProviderTarget| {
            Arc::new(EchoProvider(target)) as Arc<dyn ConnectionProvider>
        });

        let t = target(json!({ "name": "m", "type": "mongodb", "provider": "MongoDB" }), json!({}));
        let provider = factory.create(t).expect("registered provider");
        assert_eq!(provider.test_connection().await.message, "echo");
        assert_eq!(provider.connection_info().driver.as_deref(), Some("echo"));
        assert!(factory.supported_types().contains(&ConnectionType::Mongodb));
    }
}
