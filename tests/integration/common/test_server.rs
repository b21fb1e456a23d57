use conduit::adapters::health_monitor::HealthMonitorConfig;
use conduit::config::{LoggingSettings, ProviderSettings, ServerSettings, Settings, VaultSettings};
use conduit::persistence::{DataStore, PersistenceConfig};
use conduit::AppComponents;
use secrecy::SecretString;
use tokio::sync::watch;

pub struct TestServer {
    pub base_url: String,
    _shutdown: watch::Sender<bool>,
}

pub fn test_settings() -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        },
        auth: Default::default(),
        database: PersistenceConfig::default(),
        vault: VaultSettings {
            iterations: 1_000,
            ..VaultSettings::default()
        },
        health_monitor: HealthMonitorConfig::default(),
        providers: ProviderSettings::default(),
        rate_limit: None,
        logging: LoggingSettings::default(),
    }
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_settings(test_settings()).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        let store = DataStore::in_memory().await.unwrap();
        let key = SecretString::from("test-master-key".to_string());
        let components = AppComponents::assemble(store, &settings, &key).unwrap();

        let (shutdown, shutdown_rx) = watch::channel(false);
        if settings.health_monitor.enabled {
            tokio::spawn(components.monitor.clone().run(shutdown_rx));
        }

        let app = conduit::create_app(&components, &settings);

        // Start server on random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to be ready
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        TestServer {
            base_url,
            _shutdown: shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
