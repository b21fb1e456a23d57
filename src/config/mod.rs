use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod validator;

use crate::adapters::health_monitor::HealthMonitorConfig;
use crate::adapters::vault::{DEFAULT_ITERATIONS, DEFAULT_SALT};
use crate::cli::Cli;
use crate::domain::auth::AuthConfig;
use crate::persistence::PersistenceConfig;

/// Prefix of environment overrides, e.g. `CONDUIT__SERVER__PORT=9090`
pub const ENV_PREFIX: &str = "CONDUIT";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: PersistenceConfig,
    #[serde(default)]
    pub vault: VaultSettings,
    #[serde(default)]
    pub health_monitor: HealthMonitorConfig,
    #[serde(default)]
    pub providers: ProviderSettings,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Credential vault key material.
///
/// `master_key` may be plain text or an `age:` sealed value. When absent the
/// `CONNECTION_MASTER_KEY` variable is used, then a development default.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VaultSettings {
    #[serde(default, skip_serializing)]
    pub master_key: Option<String>,
    #[serde(default = "default_salt")]
    pub salt: String,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_salt() -> String {
    DEFAULT_SALT.to_string()
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            master_key: None,
            salt: default_salt(),
            iterations: default_iterations(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderSettings {
    /// Hard timeout for one provider call when the connection sets none
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl ProviderSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Settings {
    /// Settings from `conduit.toml` in the working directory (optional) and the environment.
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_file(std::path::Path::new("conduit.toml"))
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, anyhow::Error> {
        let settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Create settings from CLI arguments (CLI > env vars > config file)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let mut settings = Self::load(&cli.config)?;
        settings.apply_cli_overrides(cli);
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: &std::path::Path) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .build()?;

        Ok(s.try_deserialize()?)
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(url) = &cli.database_url {
            self.database.url = url.clone();
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = level.clone();
        }
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        validator::ConfigValidator::validate(self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })
    }

    pub fn rate_limit_enabled(&self) -> bool {
        self.rate_limit.as_ref().is_some_and(|r| r.enabled)
    }
}
