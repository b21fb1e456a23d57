//! Background scheduler that re-tests monitored connections.
//!
//! One loop per process. A pass scans `is_active` connections in status
//! active or error, keeps those whose interval has elapsed and checks them
//! behind a semaphore. Each check is isolated: an error or panic in one
//! check marks that connection `error` and the pass carries on.
//!
//! There is no cross-process coordination. Several instances pointed at the
//! same store each run their own loop and will duplicate checks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use crate::adapters::connection_manager::ConnectionManager;
use crate::adapters::metrics_handler::MetricsCollector;
use crate::domain::{
    Connection, ConnectionStatus, ConnectionTestResult, LogLevel, NewConnectionLog,
};
use crate::persistence::{CheckOutcome, CheckTransition, ConnectionRepository, PersistenceError};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthMonitorConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Wake interval of the scheduler loop
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,

    /// Connections not checked for this long count as stale in the summary
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_max_concurrent_checks() -> usize {
    10
}

fn default_stale_after_minutes() -> i64 {
    60
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            check_interval_secs: default_check_interval_secs(),
            max_concurrent_checks: default_max_concurrent_checks(),
            stale_after_minutes: default_stale_after_minutes(),
        }
    }
}

/// What started a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTrigger {
    Scheduled,
    Forced,
}

impl CheckTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Forced => "forced",
        }
    }
}

/// Whether `connection` should be checked at `now`.
///
/// Disabled checks are never due. A connection that was never checked is
/// always due. Otherwise it is due once `interval_minutes` have elapsed.
pub fn is_due(connection: &Connection, now: DateTime<Utc>) -> bool {
    let check = &connection.health_check;
    if !check.enabled {
        return false;
    }
    let Some(last) = connection.last_health_check else {
        return true;
    };
    chrono::Duration::try_minutes(check.interval_minutes.max(0))
        .and_then(|interval| last.checked_add_signed(interval))
        .is_some_and(|next| now >= next)
}

/// Hooks invoked when a check changes a connection's status
#[async_trait]
pub trait HealthNotifier: Send + Sync {
    /// The connection moved into `error`.
    async fn on_degraded(
        &self,
        _connection: &Connection,
        _previous: ConnectionStatus,
        _result: &ConnectionTestResult,
    ) {
    }

    /// The connection moved from `error` back to `active`.
    async fn on_recovered(&self, _connection: &Connection, _result: &ConnectionTestResult) {}
}

/// Default notifier: writes the transition to the process log.
pub struct LogNotifier;

#[async_trait]
impl HealthNotifier for LogNotifier {
    async fn on_degraded(
        &self,
        connection: &Connection,
        previous: ConnectionStatus,
        result: &ConnectionTestResult,
    ) {
        tracing::warn!(
            connection_id = %connection.id,
            connection_name = %connection.name,
            from = %previous,
            error = %result.failure_reason(),
            "Connection failed health check"
        );
    }

    async fn on_recovered(&self, connection: &Connection, _result: &ConnectionTestResult) {
        tracing::info!(
            connection_id = %connection.id,
            connection_name = %connection.name,
            "Connection recovered"
        );
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSummary {
    pub total_connections: u64,
    pub active_connections: u64,
    pub error_connections: u64,
    pub stale_connections: u64,
    pub uptime_percentage: f64,
    pub last_check: DateTime<Utc>,
}

/// `active / total * 100` rounded to two places, 100 for an empty fleet.
pub fn uptime_percentage(active: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let pct = active as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

pub struct HealthMonitor {
    repo: Arc<dyn ConnectionRepository>,
    manager: Arc<ConnectionManager>,
    metrics: Arc<MetricsCollector>,
    notifier: Arc<dyn HealthNotifier>,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(
        repo: Arc<dyn ConnectionRepository>,
        manager: Arc<ConnectionManager>,
        metrics: Arc<MetricsCollector>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            repo,
            manager,
            metrics,
            notifier: Arc::new(LogNotifier),
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn HealthNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Run passes until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.config.check_interval_secs,
            max_concurrent = self.config.max_concurrent_checks,
            "Starting connection health monitoring"
        );

        let period = Duration::from_secs(self.config.check_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_pass().await {
                        tracing::error!(error = %e, "Error performing health checks");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Stopping connection health monitoring");
    }

    /// One scheduling pass. Returns how many checks ran.
    #[tracing::instrument(skip(self))]
    pub async fn run_pass(self: &Arc<Self>) -> Result<usize, PersistenceError> {
        let now = Utc::now();
        let due: Vec<Connection> = self
            .repo
            .list_monitored()
            .await?
            .into_iter()
            .filter(|c| is_due(c, now))
            .collect();

        if due.is_empty() {
            return Ok(0);
        }
        tracing::info!(due = due.len(), "Performing health checks");

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_checks.max(1)));
        let mut tasks = JoinSet::new();
        for connection in due {
            let monitor = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                monitor.check(connection, CheckTrigger::Scheduled).await;
            });
        }

        let mut checked = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(()) => checked += 1,
                Err(e) => tracing::error!(error = %e, "Health check task aborted"),
            }
        }
        Ok(checked)
    }

    /// Check one connection now, outside the schedule and its interval gate.
    /// `None` when the connection does not exist.
    #[tracing::instrument(skip(self))]
    pub async fn force_health_check(
        &self,
        connection_id: &str,
    ) -> Result<Option<ConnectionTestResult>, PersistenceError> {
        let Some(connection) = self.repo.get(connection_id).await? else {
            return Ok(None);
        };
        Ok(Some(self.check(connection, CheckTrigger::Forced).await))
    }

    /// Fleet counts over `is_active` connections.
    pub async fn health_summary(&self) -> Result<HealthSummary, PersistenceError> {
        let now = Utc::now();
        let counts = self.repo.count_by_status(true).await?;
        let count_of = |status: ConnectionStatus| {
            counts
                .iter()
                .filter(|(s, _)| *s == status)
                .map(|(_, n)| *n)
                .sum::<u64>()
        };
        let total: u64 = counts.iter().map(|(_, n)| *n).sum();
        let active = count_of(ConnectionStatus::Active);
        let error = count_of(ConnectionStatus::Error);

        let threshold = chrono::Duration::try_minutes(self.config.stale_after_minutes.max(0))
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(now);
        let stale = self.repo.count_stale(threshold).await?;

        Ok(HealthSummary {
            total_connections: total,
            active_connections: active,
            error_connections: error,
            stale_connections: stale,
            uptime_percentage: uptime_percentage(active, total),
            last_check: now,
        })
    }

    async fn check(&self, connection: Connection, trigger: CheckTrigger) -> ConnectionTestResult {
        let attempt = AssertUnwindSafe(self.try_check(&connection, trigger))
            .catch_unwind()
            .await;

        let reason = match attempt {
            Ok(Ok(result)) => return result,
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        tracing::error!(
            connection_id = %connection.id,
            error = %reason,
            "Error checking connection"
        );
        self.record_exception(&connection, trigger, &reason).await;
        ConnectionTestResult::failed("Health check failed", format!("Health check failed: {}", reason))
    }

    async fn try_check(
        &self,
        connection: &Connection,
        trigger: CheckTrigger,
    ) -> Result<ConnectionTestResult, PersistenceError> {
        let started = Instant::now();
        let result = self.manager.test_connection(connection).await;
        let elapsed = started.elapsed().as_secs_f64();

        let checked_at = Utc::now();
        let outcome = if result.success {
            CheckOutcome::success(checked_at)
        } else {
            CheckOutcome::failure(result.failure_reason(), checked_at)
        };

        self.metrics.record_check(
            connection.connection_type.as_str(),
            trigger.as_str(),
            result.success,
            elapsed,
        );

        let Some(transition) = self.repo.record_check(&connection.id, &outcome).await? else {
            tracing::debug!(connection_id = %connection.id, "Connection removed during check");
            return Ok(result);
        };

        // Outcome committed: log write failures are traced, never re-recorded.
        if transition.changed() {
            self.on_transition(&transition, &result).await;
        }

        let entry = NewConnectionLog::new(
            &connection.id,
            LogLevel::Debug,
            format!("Health check completed: {}", result.message),
        )
        .with_details(serde_json::json!({
            "success": result.success,
            "response_time_ms": result.response_time_ms,
            "status_code": result.status_code,
        }))
        .with_duration(result.response_time_ms);
        self.append_log_or_trace(entry).await;

        Ok(result)
    }

    async fn on_transition(&self, transition: &CheckTransition, result: &ConnectionTestResult) {
        let previous = transition.previous;
        let current = transition.connection.status;
        self.metrics
            .record_transition(previous.as_str(), current.as_str());

        let level = if result.success {
            LogLevel::Info
        } else {
            LogLevel::Error
        };
        let details = serde_json::to_value(result).unwrap_or_default();
        let entry = NewConnectionLog::new(
            &transition.connection.id,
            level,
            format!("Health check status changed from {} to {}", previous, current),
        )
        .with_details(details)
        .with_duration(result.response_time_ms);
        self.append_log_or_trace(entry).await;

        match (previous, current) {
            (_, ConnectionStatus::Error) => {
                self.notifier
                    .on_degraded(&transition.connection, previous, result)
                    .await
            }
            (ConnectionStatus::Error, ConnectionStatus::Active) => {
                self.notifier
                    .on_recovered(&transition.connection, result)
                    .await
            }
            _ => {}
        }
    }

    async fn append_log_or_trace(&self, entry: NewConnectionLog) {
        let connection_id = entry.connection_id.clone();
        if let Err(e) = self.repo.append_log(entry).await {
            tracing::error!(connection_id = %connection_id, error = %e, "Failed to write health check log");
        }
    }

    async fn record_exception(&self, connection: &Connection, trigger: CheckTrigger, reason: &str) {
        self.metrics
            .record_check(connection.connection_type.as_str(), trigger.as_str(), false, 0.0);

        let outcome = CheckOutcome::failure(format!("Health check failed: {}", reason), Utc::now());
        if let Err(e) = self.repo.record_check(&connection.id, &outcome).await {
            tracing::error!(connection_id = %connection.id, error = %e, "Failed to record health check exception");
            return;
        }

        let entry = NewConnectionLog::new(
            &connection.id,
            LogLevel::Error,
            "Health check failed with exception",
        )
        .with_details(serde_json::json!({ "exception": reason }));
        self.append_log_or_trace(entry).await;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "health check panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::connection_manager::tests::{connection, test_vault};
    use crate::adapters::provider_factory::ProviderFactory;
    use crate::adapters::providers::{ConnectionProvider, ProviderTarget};
    use crate::domain::{
        ConnectionAlert, ConnectionFilter, ConnectionLog, ConnectionType, Page, ProviderInfo, QueryResult,
    };
    use crate::persistence::DataStore;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        store: DataStore,
        monitor: Arc<HealthMonitor>,
    }

    async fn fixture(factory: ProviderFactory, notifier: Arc<dyn HealthNotifier>) -> Fixture {
        let store = DataStore::in_memory().await.unwrap();
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(factory),
            test_vault(),
            Duration::from_secs(5),
        ));
        let monitor = HealthMonitor::new(
            store.connections(),
            manager,
            Arc::new(MetricsCollector::new().unwrap()),
            HealthMonitorConfig::default(),
        )
        .with_notifier(notifier);
        Fixture {
            store,
            monitor: Arc::new(monitor),
        }
    }

    fn sqlite(name: &str, database: &str, status: ConnectionStatus) -> Connection {
        let mut c = connection(json!({
            "name": name,
            "type": "sqlite",
            "provider": "SQLite",
            "database_name": database,
        }));
        c.status = status;
        c
    }

    #[derive(Default)]
    struct CountingNotifier {
        degraded: AtomicUsize,
        recovered: AtomicUsize,
    }

    #[async_trait]
    impl HealthNotifier for CountingNotifier {
        async fn on_degraded(&self, _: &Connection, _: ConnectionStatus, _: &ConnectionTestResult) {
            self.degraded.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_recovered(&self, _: &Connection, _: &ConnectionTestResult) {
            self.recovered.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingProvider(ProviderTarget);

    #[async_trait]
    impl ConnectionProvider for PanickingProvider {
        async fn connect(&self) -> ConnectionTestResult {
            ConnectionTestResult::ok("connected")
        }
        async fn disconnect(&self) -> ConnectionTestResult {
            ConnectionTestResult::ok("disconnected")
        }
        async fn test_connection(&self) -> ConnectionTestResult {
            panic!("driver exploded")
        }
        async fn execute_query(&self, _query: &str, _params: &[Value]) -> QueryResult {
            QueryResult::failed("unsupported", Instant::now())
        }
        fn connection_info(&self) -> ProviderInfo {
            self.0.info(None, false)
        }
    }

    #[test]
    fn test_disabled_check_is_never_due() {
        let mut c = sqlite("a", ":memory:", ConnectionStatus::Active);
        c.health_check.enabled = false;
        let now = Utc::now();
        assert!(!is_due(&c, now));
        c.last_health_check = Some(now - chrono::Duration::days(30));
        assert!(!is_due(&c, now));
    }

    #[test]
    fn test_never_checked_is_due() {
        let c = sqlite("a", ":memory:", ConnectionStatus::Active);
        assert!(c.last_health_check.is_none());
        assert!(is_due(&c, Utc::now()));
    }

    #[test]
    fn test_interval_boundary() {
        let mut c = sqlite("a", ":memory:", ConnectionStatus::Active);
        c.health_check.interval_minutes = 5;
        let t0 = Utc::now();
        c.last_health_check = Some(t0);

        assert!(!is_due(&c, t0 + chrono::Duration::seconds(4 * 60 + 59)));
        assert!(is_due(&c, t0 + chrono::Duration::minutes(5)));
    }

    #[test]
    fn test_uptime_rounding() {
        assert_eq!(uptime_percentage(0, 0), 100.0);
        assert_eq!(uptime_percentage(1, 3), 33.33);
        assert_eq!(uptime_percentage(2, 2), 100.0);
    }

    #[tokio::test]
    async fn test_pass_checks_only_due_connections() {
        let fx = fixture(ProviderFactory::with_defaults(), Arc::new(LogNotifier)).await;
        let repo = fx.store.connections();

        let healthy = sqlite("healthy", ":memory:", ConnectionStatus::Error);
        let broken = sqlite("broken", "/nonexistent/dir/broken.db", ConnectionStatus::Active);
        let mut fresh = sqlite("fresh", ":memory:", ConnectionStatus::Active);
        fresh.last_health_check = Some(Utc::now());
        let pending = sqlite("pending", ":memory:", ConnectionStatus::Pending);
        for c in [&healthy, &broken, &fresh, &pending] {
            repo.insert(c).await.unwrap();
        }

        let checked = fx.monitor.run_pass().await.unwrap();
        assert_eq!(checked, 2);

        let healthy = repo.get(&healthy.id).await.unwrap().unwrap();
        assert_eq!(healthy.status, ConnectionStatus::Active);
        assert_eq!(healthy.success_count, 1);
        assert_eq!(healthy.error_count, 0);
        assert!(healthy.last_error.is_none());

        let broken = repo.get(&broken.id).await.unwrap().unwrap();
        assert_eq!(broken.status, ConnectionStatus::Error);
        assert_eq!(broken.error_count, 1);
        assert_eq!(broken.success_count, 0);
        assert!(broken.last_error.is_some());
        assert!(broken.last_health_check.is_some());

        let fresh = repo.get(&fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.success_count, 0);
        let pending = repo.get(&pending.id).await.unwrap().unwrap();
        assert_eq!(pending.status, ConnectionStatus::Pending);
    }

    #[tokio::test]
    async fn test_transition_writes_logs_and_notifies() {
        let notifier = Arc::new(CountingNotifier::default());
        let fx = fixture(ProviderFactory::with_defaults(), notifier.clone()).await;
        let repo = fx.store.connections();

        let recovering = sqlite("recovering", ":memory:", ConnectionStatus::Error);
        repo.insert(&recovering).await.unwrap();

        let result = fx
            .monitor
            .force_health_check(&recovering.id)
            .await
            .unwrap()
            .unwrap();
        assert!(result.success);
        assert_eq!(notifier.recovered.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.degraded.load(Ordering::SeqCst), 0);

        let (logs, total) = repo
            .list_logs(&recovering.id, None, crate::domain::Page { page: 1, limit: 10 })
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(logs
            .iter()
            .any(|l| l.message == "Health check status changed from error to active"
                && l.level == LogLevel::Info));
        assert!(logs
            .iter()
            .any(|l| l.message.starts_with("Health check completed:") && l.level == LogLevel::Debug));

        // Same status again: only the debug entry is added.
        fx.monitor.force_health_check(&recovering.id).await.unwrap();
        let (_, total) = repo
            .list_logs(&recovering.id, None, crate::domain::Page { page: 1, limit: 10 })
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(notifier.recovered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_degrade_notifies() {
        let notifier = Arc::new(CountingNotifier::default());
        let fx = fixture(ProviderFactory::with_defaults(), notifier.clone()).await;
        let repo = fx.store.connections();

        let broken = sqlite("broken", "/nonexistent/dir/broken.db", ConnectionStatus::Active);
        repo.insert(&broken).await.unwrap();

        fx.monitor.force_health_check(&broken.id).await.unwrap();
        assert_eq!(notifier.degraded.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_unknown_connection() {
        let fx = fixture(ProviderFactory::with_defaults(), Arc::new(LogNotifier)).await;
        assert!(fx.monitor.force_health_check("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_panic_is_contained_to_one_connection() {
        let factory = ProviderFactory::with_defaults();
        factory.register_provider(ConnectionType::Custom, |target: ProviderTarget| {
            Arc::new(PanickingProvider(target)) as Arc<dyn ConnectionProvider>
        });
        let fx = fixture(factory, Arc::new(LogNotifier)).await;
        let repo = fx.store.connections();

        let mut exploding = connection(json!({ "name": "boom", "type": "custom", "provider": "Custom" }));
        exploding.status = ConnectionStatus::Active;
        let healthy = sqlite("healthy", ":memory:", ConnectionStatus::Active);
        repo.insert(&exploding).await.unwrap();
        repo.insert(&healthy).await.unwrap();

        assert_eq!(fx.monitor.run_pass().await.unwrap(), 2);

        let exploding = repo.get(&exploding.id).await.unwrap().unwrap();
        assert_eq!(exploding.status, ConnectionStatus::Error);
        assert_eq!(
            exploding.last_error.as_deref(),
            Some("Health check failed: driver exploded")
        );
        let (logs, _) = repo
            .list_logs(&exploding.id, Some(LogLevel::Error), crate::domain::Page { page: 1, limit: 10 })
            .await
            .unwrap();
        assert!(logs.iter().any(|l| l.message == "Health check failed with exception"));

        let healthy = repo.get(&healthy.id).await.unwrap().unwrap();
        assert_eq!(healthy.status, ConnectionStatus::Active);
        assert_eq!(healthy.success_count, 1);
    }

    /// Delegates to the real store but refuses every log write.
    struct LogWritesFail(Arc<dyn ConnectionRepository>);

    #[async_trait]
    impl ConnectionRepository for LogWritesFail {
        async fn get(&self, id: &str) -> Result<Option<Connection>, PersistenceError> {
            self.0.get(id).await
        }
        async fn list(
            &self,
            filter: &ConnectionFilter,
            page: Page,
        ) -> Result<(Vec<Connection>, u64), PersistenceError> {
            self.0.list(filter, page).await
        }
        async fn list_monitored(&self) -> Result<Vec<Connection>, PersistenceError> {
            self.0.list_monitored().await
        }
        async fn insert(&self, connection: &Connection) -> Result<(), PersistenceError> {
            self.0.insert(connection).await
        }
        async fn update(&self, connection: &Connection) -> Result<(), PersistenceError> {
            self.0.update(connection).await
        }
        async fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
            self.0.delete(id).await
        }
        async fn record_check(
            &self,
            id: &str,
            outcome: &CheckOutcome,
        ) -> Result<Option<CheckTransition>, PersistenceError> {
            self.0.record_check(id, outcome).await
        }
        async fn append_log(&self, _entry: NewConnectionLog) -> Result<ConnectionLog, PersistenceError> {
            Err(PersistenceError::Connection("log table unavailable".to_string()))
        }
        async fn list_logs(
            &self,
            connection_id: &str,
            level: Option<LogLevel>,
            page: Page,
        ) -> Result<(Vec<ConnectionLog>, u64), PersistenceError> {
            self.0.list_logs(connection_id, level, page).await
        }
        async fn recent_alerts(&self, limit: u32) -> Result<Vec<ConnectionAlert>, PersistenceError> {
            self.0.recent_alerts(limit).await
        }
        async fn count_by_status(
            &self,
            active_only: bool,
        ) -> Result<Vec<(ConnectionStatus, u64)>, PersistenceError> {
            self.0.count_by_status(active_only).await
        }
        async fn count_by_type(&self) -> Result<Vec<(ConnectionType, u64)>, PersistenceError> {
            self.0.count_by_type().await
        }
        async fn count_connected_since(&self, since: DateTime<Utc>) -> Result<u64, PersistenceError> {
            self.0.count_connected_since(since).await
        }
        async fn count_stale(&self, before: DateTime<Utc>) -> Result<u64, PersistenceError> {
            self.0.count_stale(before).await
        }
        async fn average_duration_ms(&self) -> Result<Option<f64>, PersistenceError> {
            self.0.average_duration_ms().await
        }
    }

    #[tokio::test]
    async fn test_log_write_failure_counts_check_once() {
        let store = DataStore::in_memory().await.unwrap();
        let repo: Arc<dyn ConnectionRepository> = Arc::new(LogWritesFail(store.connections()));
        let notifier = Arc::new(CountingNotifier::default());
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(ProviderFactory::with_defaults()),
            test_vault(),
            Duration::from_secs(5),
        ));
        let monitor = HealthMonitor::new(
            repo.clone(),
            manager,
            Arc::new(MetricsCollector::new().unwrap()),
            HealthMonitorConfig::default(),
        )
        .with_notifier(notifier.clone());

        let recovering = sqlite("recovering", ":memory:", ConnectionStatus::Error);
        repo.insert(&recovering).await.unwrap();

        let result = monitor
            .force_health_check(&recovering.id)
            .await
            .unwrap()
            .unwrap();
        assert!(result.success, "{:?}", result.error);
        assert_eq!(notifier.recovered.load(Ordering::SeqCst), 1);

        let stored = repo.get(&recovering.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ConnectionStatus::Active);
        assert_eq!(stored.success_count, 1);
        assert_eq!(stored.error_count, 0);
        assert!(stored.last_error.is_none());
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let fx = fixture(ProviderFactory::with_defaults(), Arc::new(LogNotifier)).await;
        let repo = fx.store.connections();

        let mut stale = sqlite("stale", ":memory:", ConnectionStatus::Active);
        stale.last_health_check = Some(Utc::now() - chrono::Duration::hours(3));
        repo.insert(&stale).await.unwrap();
        repo.insert(&sqlite("err", ":memory:", ConnectionStatus::Error)).await.unwrap();
        let mut disabled = sqlite("off", ":memory:", ConnectionStatus::Inactive);
        disabled.is_active = false;
        repo.insert(&disabled).await.unwrap();

        let summary = fx.monitor.health_summary().await.unwrap();
        assert_eq!(summary.total_connections, 2);
        assert_eq!(summary.active_connections, 1);
        assert_eq!(summary.error_connections, 1);
        assert_eq!(summary.stale_connections, 1);
        assert_eq!(summary.uptime_percentage, 50.0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let fx = fixture(ProviderFactory::with_defaults(), Arc::new(LogNotifier)).await;
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(fx.monitor.clone().run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
