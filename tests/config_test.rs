use clap::Parser;
use conduit::adapters::config_secrets::{self, MasterKeySource};
use conduit::cli::Cli;
use conduit::config::{LogFormat, Settings};
use conduit::domain::auth::AuthMode;
use secrecy::{ExposeSecret, SecretString};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_full_config_file() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("conduit.toml");

    let conduit_toml = r#"
[server]
host = "0.0.0.0"
port = 3000

[auth]
enabled = true
mode = "ApiKey"
api_keys = [
    { key = "k-1", user_id = "alice", role = "admin" },
    { key = "k-2", user_id = "bob" },
]

[database]
url = "sqlite::memory:"
max_connections = 2

[vault]
salt = "tenant-salt"
iterations = 5000

[health_monitor]
check_interval_secs = 30
max_concurrent_checks = 4

[rate_limit]
enabled = true
requests_per_second = 50
burst_size = 100

[logging]
level = "conduit=debug"
format = "json"
"#;
    fs::write(&path, conduit_toml)?;

    let settings = Settings::from_file(&path)?;
    assert_eq!(settings.server.port, 3000);
    assert_eq!(settings.auth.mode, AuthMode::ApiKey);
    let keys = settings.auth.api_keys.as_ref().unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[1].role, "user");
    assert_eq!(settings.database.max_connections, 2);
    assert!(settings.database.auto_migrate);
    assert_eq!(settings.vault.salt, "tenant-salt");
    assert_eq!(settings.vault.iterations, 5000);
    assert_eq!(settings.health_monitor.check_interval_secs, 30);
    assert_eq!(settings.health_monitor.max_concurrent_checks, 4);
    assert!(settings.health_monitor.enabled);
    assert!(settings.rate_limit_enabled());
    assert_eq!(settings.logging.format, LogFormat::Json);

    Ok(())
}

#[test]
fn test_validation_errors_are_reported_together() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("conduit.toml");
    fs::write(
        &path,
        r#"
[server]
host = ""
port = 8080

[auth]
enabled = true
mode = "BearerToken"

[vault]
iterations = 0
"#,
    )?;

    let message = Settings::from_file(&path).unwrap_err().to_string();
    assert!(message.starts_with("Configuration validation failed"));
    assert!(message.contains("server.host"));
    assert!(message.contains("auth.jwt_secret"));
    assert!(message.contains("vault.iterations"));
    Ok(())
}

#[test]
fn test_cli_overrides_file_values() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("conduit.toml");
    fs::write(&path, "[server]\nhost = \"127.0.0.1\"\nport = 3000\n")?;

    let cli = Cli::parse_from([
        "conduit",
        "--config",
        path.to_str().unwrap(),
        "--port",
        "4000",
        "--database-url",
        "sqlite::memory:",
        "--log-level",
        "warn",
    ]);
    let settings = Settings::new_with_cli(&cli)?;
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 4000);
    assert_eq!(settings.database.url, "sqlite::memory:");
    assert_eq!(settings.logging.level, "warn");
    Ok(())
}

#[test]
fn test_environment_overrides_file_values() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("conduit.toml");
    fs::write(
        &path,
        "[server]\nhost = \"127.0.0.1\"\nport = 3000\n\n[health_monitor]\nstale_after_minutes = 60\n",
    )?;

    std::env::set_var("CONDUIT__HEALTH_MONITOR__STALE_AFTER_MINUTES", "15");
    let settings = Settings::from_file(&path);
    std::env::remove_var("CONDUIT__HEALTH_MONITOR__STALE_AFTER_MINUTES");

    assert_eq!(settings?.health_monitor.stale_after_minutes, 15);
    Ok(())
}

#[test]
fn test_sealed_master_key_in_config() -> anyhow::Result<()> {
    let passphrase = SecretString::from("ops-passphrase".to_string());
    let sealed = config_secrets::seal("real-master-key", &passphrase)?;
    assert!(config_secrets::is_sealed(&sealed));

    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("conduit.toml");
    fs::write(
        &path,
        format!(
            "[server]\nhost = \"127.0.0.1\"\nport = 3000\n\n[vault]\nmaster_key = \"{}\"\n",
            sealed
        ),
    )?;
    let settings = Settings::from_file(&path)?;

    let (key, source) = config_secrets::resolve_master_key(
        settings.vault.master_key.as_deref(),
        Some(&passphrase),
    )?;
    assert_eq!(source, MasterKeySource::Config);
    assert_eq!(key.expose_secret(), "real-master-key");

    assert!(config_secrets::resolve_master_key(settings.vault.master_key.as_deref(), None).is_err());
    Ok(())
}
