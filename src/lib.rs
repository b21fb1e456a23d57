//! # Conduit - Connection Management & Health Monitoring
//!
//! Conduit stores connection definitions for external data systems, keeps their
//! credentials encrypted at rest and checks their health on a schedule.
//!
//! ## Features
//!
//! - **Providers**: PostgreSQL, MySQL, SQLite, S3 and local object stores, HTTP APIs, Snowflake, BigQuery, Athena
//! - **Credential Vault**: AES-256-GCM sealed credentials with masked read views
//! - **Health Monitor**: bounded-concurrency periodic checks with status transition logs
//! - **Authentication**: API Key and JWT Bearer Token support
//! - **Metrics**: Prometheus metrics for monitoring
//! - **Health Checks**: Kubernetes-ready health endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conduit::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::new()?;
//!     let store = conduit::persistence::DataStore::new(&settings.database).await?;
//!     let key = secrecy::SecretString::from("master".to_string());
//!     let components = conduit::AppComponents::assemble(store, &settings, &key)?;
//!     let _app = conduit::create_app(&components, &settings);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Domain**: connection records, statuses, permissions
//! - **Application**: connection use cases behind the HTTP surface
//! - **Adapters**: providers, vault, manager, monitor and HTTP handlers
//! - **Persistence**: sqlx backed connection store
//! - **Config**: configuration management

pub mod adapters;
pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod persistence;

use crate::adapters::auth_middleware::{auth_middleware, AuthMiddleware};
use crate::adapters::connection_manager::ConnectionManager;
use crate::adapters::connections_api::{self, ConnectionsState};
use crate::adapters::health_handler::HealthHandler;
use crate::adapters::health_monitor::HealthMonitor;
use crate::adapters::metrics_handler::{track_requests, MetricsCollector, MetricsHandler};
use crate::adapters::provider_factory::ProviderFactory;
use crate::adapters::vault::CredentialVault;
use crate::application::ConnectionService;
use crate::config::Settings;
use crate::persistence::DataStore;
use axum::{routing::get, Router};
use secrecy::SecretString;
use std::sync::Arc;

/// Long-lived services shared by the router and the background monitor.
pub struct AppComponents {
    pub store: DataStore,
    pub vault: Arc<CredentialVault>,
    pub factory: Arc<ProviderFactory>,
    pub manager: Arc<ConnectionManager>,
    pub metrics: Arc<MetricsCollector>,
    pub monitor: Arc<HealthMonitor>,
    pub service: Arc<ConnectionService>,
}

impl AppComponents {
    /// Wire every service over an already opened (and migrated) store.
    pub fn assemble(
        store: DataStore,
        settings: &Settings,
        master_key: &SecretString,
    ) -> anyhow::Result<Self> {
        Self::assemble_with_factory(store, settings, master_key, ProviderFactory::with_defaults())
    }

    pub fn assemble_with_factory(
        store: DataStore,
        settings: &Settings,
        master_key: &SecretString,
        factory: ProviderFactory,
    ) -> anyhow::Result<Self> {
        let vault = Arc::new(CredentialVault::new(
            master_key,
            &settings.vault.salt,
            settings.vault.iterations,
        )?);
        let factory = Arc::new(factory);
        let manager = Arc::new(ConnectionManager::new(
            factory.clone(),
            vault.clone(),
            settings.providers.call_timeout(),
        ));
        let metrics = Arc::new(MetricsCollector::new()?);
        let repo = store.connections();
        let monitor = Arc::new(HealthMonitor::new(
            repo.clone(),
            manager.clone(),
            metrics.clone(),
            settings.health_monitor.clone(),
        ));
        let service = Arc::new(ConnectionService::new(repo, manager.clone(), vault.clone()));

        Ok(Self {
            store,
            vault,
            factory,
            manager,
            metrics,
            monitor,
            service,
        })
    }
}

/// Creates the Axum application router with all endpoints configured.
///
/// Health probes stay public. `/metrics` and `/connections/*` sit behind
/// the rate limiter and authentication when those are enabled.
pub fn create_app(components: &AppComponents, settings: &Settings) -> Router {
    let health_handler = Arc::new(HealthHandler::new(
        components.store.pool().clone(),
        settings.health_monitor.enabled,
    ));
    let metrics_handler = Arc::new(MetricsHandler::new(
        components.metrics.clone(),
        components.manager.clone(),
    ));

    // Public routes (no authentication required)
    let public_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/ready", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.ready().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }));

    let connections_state = ConnectionsState {
        service: components.service.clone(),
        monitor: components.monitor.clone(),
        manager: components.manager.clone(),
    };

    let mut protected_router = Router::new()
        .route("/metrics", get({
            let handler = metrics_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.metrics().await }
            }
        }))
        .merge(connections_api::router(connections_state));

    if let Some(rate_limit) = settings.rate_limit.as_ref().filter(|r| r.enabled) {
        let limiter = crate::adapters::rate_limit::create_limiter(
            rate_limit.requests_per_second,
            rate_limit.burst_size,
        );

        protected_router = protected_router.layer(axum::middleware::from_fn_with_state(
            limiter,
            crate::adapters::rate_limit::rate_limit_middleware,
        ));
    }

    if settings.auth.enabled {
        let auth = Arc::new(AuthMiddleware::new(Arc::new(settings.auth.clone())));
        protected_router =
            protected_router.layer(axum::middleware::from_fn_with_state(auth, auth_middleware));
    }

    // Public routes are checked first, then protected routes
    let router = public_router.merge(protected_router);

    router
        .layer(axum::middleware::from_fn_with_state(
            components.metrics.clone(),
            track_requests,
        ))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}
