pub mod auth_middleware;
pub mod config_secrets;
pub mod connection_manager;
pub mod connections_api;
pub mod health_handler;
pub mod health_monitor;
pub mod metrics_handler;
pub mod provider_factory;
pub mod providers;
pub mod rate_limit;
pub mod vault;
