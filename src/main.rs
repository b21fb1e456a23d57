use clap::Parser;
use conduit::adapters::config_secrets::{self, MasterKeySource};
use conduit::cli::{Cli, Command};
use conduit::config::{LogFormat, LoggingSettings, Settings};
use conduit::persistence::DataStore;
use conduit::AppComponents;
use secrecy::SecretString;
use std::net::SocketAddr;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let passphrase = cli.secret_passphrase.clone().map(SecretString::from);

    if let Command::EncryptSecret { value } = cli.action() {
        let passphrase = passphrase
            .ok_or_else(|| anyhow::anyhow!("--secret-passphrase is required to seal a value"))?;
        println!("{}", config_secrets::seal(&value, &passphrase)?);
        return Ok(());
    }

    let settings = Settings::new_with_cli(&cli)?;
    init_tracing(&settings.logging);

    let (master_key, source) =
        config_secrets::resolve_master_key(settings.vault.master_key.as_deref(), passphrase.as_ref())?;
    match source {
        MasterKeySource::DevelopmentDefault => warn!(
            "No vault master key configured; using the development default. Set {} in production",
            config_secrets::MASTER_KEY_ENV
        ),
        MasterKeySource::Environment => info!("Vault master key loaded from {}", config_secrets::MASTER_KEY_ENV),
        MasterKeySource::Config => info!("Vault master key loaded from configuration"),
    }

    let store = DataStore::new(&settings.database).await?;
    info!(backend = store.backend().name(), "Connection store opened");
    if settings.database.auto_migrate {
        let migrated = store.migrate().await?;
        info!(applied = migrated.applied, skipped = migrated.skipped, "Store migrations complete");
    }

    let components = AppComponents::assemble(store, &settings, &master_key)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_task = if settings.health_monitor.enabled {
        Some(tokio::spawn(components.monitor.clone().run(shutdown_rx)))
    } else {
        info!("Health monitor disabled");
        None
    };

    let app = conduit::create_app(&components, &settings);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    info!("Starting Conduit on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = monitor_task {
        if let Err(e) = task.await {
            warn!("Health monitor task ended abnormally: {}", e);
        }
    }

    let closed = components.manager.close_all_connections().await;
    info!(count = closed.len(), "Closed cached providers");
    components.store.pool().close().await;

    Ok(())
}
