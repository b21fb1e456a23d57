use std::collections::HashSet;
use thiserror::Error;

use crate::adapters::health_monitor::HealthMonitorConfig;
use crate::config::{ProviderSettings, RateLimitConfig, ServerSettings, Settings, VaultSettings};
use crate::domain::auth::{AuthConfig, AuthMode};
use crate::persistence::{DatabaseBackend, PersistenceConfig};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_server(&settings.server) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_auth(&settings.auth) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_database(&settings.database) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_vault(&settings.vault) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_health_monitor(&settings.health_monitor) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_providers(&settings.providers) {
            errors.extend(e);
        }

        if let Some(rate_limit) = &settings.rate_limit {
            if let Err(e) = Self::validate_rate_limit(rate_limit) {
                errors.extend(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &ServerSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == 0 {
            errors.push(invalid("server.port", "Port must be greater than 0"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_auth(auth: &AuthConfig) -> Result<(), Vec<ValidationError>> {
        if !auth.enabled {
            return Ok(());
        }
        let mut errors = Vec::new();

        match auth.mode {
            AuthMode::None => {}
            AuthMode::ApiKey => {
                let keys = auth.api_keys.as_deref().unwrap_or_default();
                if keys.is_empty() {
                    errors.push(ValidationError::MissingField("auth.api_keys".to_string()));
                }
                let mut seen = HashSet::new();
                for entry in keys {
                    if entry.key.is_empty() {
                        errors.push(invalid("auth.api_keys.key", "API key cannot be empty"));
                    } else if !seen.insert(entry.key.as_str()) {
                        errors.push(ValidationError::Duplicate(format!(
                            "API key for user '{}'",
                            entry.user_id
                        )));
                    }
                }
            }
            AuthMode::BearerToken => {
                if auth.jwt_secret.as_deref().unwrap_or_default().is_empty() {
                    errors.push(ValidationError::MissingField("auth.jwt_secret".to_string()));
                }
                if let Some(alg) = auth.jwt_algorithm.as_deref() {
                    if !matches!(alg, "HS256" | "HS384" | "HS512") {
                        errors.push(invalid(
                            "auth.jwt_algorithm",
                            "Supported algorithms are HS256, HS384 and HS512",
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_database(database: &PersistenceConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if database.url.is_empty() {
            errors.push(ValidationError::MissingField("database.url".to_string()));
        } else if let Err(e) = DatabaseBackend::from_url(&database.url) {
            errors.push(invalid("database.url", &e.to_string()));
        }

        if database.max_connections == 0 {
            errors.push(invalid(
                "database.max_connections",
                "Pool size must be greater than 0",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_vault(vault: &VaultSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if vault.salt.is_empty() {
            errors.push(ValidationError::MissingField("vault.salt".to_string()));
        }

        if vault.iterations == 0 {
            errors.push(invalid(
                "vault.iterations",
                "Key derivation iterations must be greater than 0",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_health_monitor(monitor: &HealthMonitorConfig) -> Result<(), Vec<ValidationError>> {
        if !monitor.enabled {
            return Ok(());
        }
        let mut errors = Vec::new();

        if monitor.check_interval_secs == 0 {
            errors.push(invalid(
                "health_monitor.check_interval_secs",
                "Check interval must be greater than 0",
            ));
        }

        if monitor.max_concurrent_checks == 0 {
            errors.push(invalid(
                "health_monitor.max_concurrent_checks",
                "At least one concurrent check is required",
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_providers(providers: &ProviderSettings) -> Result<(), Vec<ValidationError>> {
        if providers.call_timeout_secs == 0 {
            return Err(vec![invalid(
                "providers.call_timeout_secs",
                "Timeout must be greater than 0",
            )]);
        }
        Ok(())
    }

    fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), Vec<ValidationError>> {
        if !rate_limit.enabled {
            return Ok(());
        }
        let mut errors = Vec::new();

        if rate_limit.requests_per_second == 0 {
            errors.push(invalid(
                "rate_limit.requests_per_second",
                "Must be greater than 0",
            ));
        }

        if rate_limit.burst_size == 0 {
            errors.push(invalid("rate_limit.burst_size", "Must be greater than 0"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
