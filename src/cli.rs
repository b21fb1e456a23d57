use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Conduit - connection management and health monitoring for external data sources
#[derive(Parser, Debug, Clone)]
#[command(name = "conduit", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "CONDUIT_CONFIG", default_value = "conduit.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "CONDUIT_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "CONDUIT_PORT")]
    pub port: Option<u16>,

    /// Connection store URL (sqlite, postgres or mysql)
    #[arg(long, env = "CONDUIT_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Log filter directive, e.g. "info" or "conduit=debug"
    #[arg(long, env = "CONDUIT_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Passphrase for `age:` sealed values in the configuration
    #[arg(long, env = "CONDUIT_SECRET_PASSPHRASE", hide_env_values = true)]
    pub secret_passphrase: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server and health monitor (default)
    Serve,
    /// Seal a value with the secret passphrase for use in the configuration file
    EncryptSecret {
        /// Plain text to seal
        value: String,
    },
}

impl Cli {
    pub fn action(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}
