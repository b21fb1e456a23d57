use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::adapters::connection_manager::ConnectionManager;

pub struct MetricsCollector {
    registry: Registry,

    // HTTP metrics
    pub requests_total: CounterVec,
    pub request_duration: HistogramVec,

    // Health check metrics
    pub health_checks_total: CounterVec,
    pub health_check_duration: HistogramVec,
    pub status_transitions: CounterVec,
    pub cached_providers: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("conduit_http_requests_total", "Total number of HTTP requests"),
            &["method", "route", "status"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "conduit_http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "route"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let health_checks_total = CounterVec::new(
            Opts::new("conduit_health_checks_total", "Connection checks by outcome"),
            &["connection_type", "trigger", "outcome"],
        )?;
        registry.register(Box::new(health_checks_total.clone()))?;

        let health_check_duration = HistogramVec::new(
            HistogramOpts::new(
                "conduit_health_check_duration_seconds",
                "Connection check duration in seconds",
            ),
            &["connection_type"],
        )?;
        registry.register(Box::new(health_check_duration.clone()))?;

        let status_transitions = CounterVec::new(
            Opts::new(
                "conduit_status_transitions_total",
                "Connection status changes caused by checks",
            ),
            &["from", "to"],
        )?;
        registry.register(Box::new(status_transitions.clone()))?;

        let cached_providers = IntGauge::new(
            "conduit_cached_providers",
            "Providers currently cached by the connection manager",
        )?;
        registry.register(Box::new(cached_providers.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            health_checks_total,
            health_check_duration,
            status_transitions,
            cached_providers,
        })
    }

    pub fn record_check(&self, connection_type: &str, trigger: &str, success: bool, seconds: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.health_checks_total
            .with_label_values(&[connection_type, trigger, outcome])
            .inc();
        self.health_check_duration
            .with_label_values(&[connection_type])
            .observe(seconds);
    }

    pub fn record_transition(&self, from: &str, to: &str) {
        self.status_transitions.with_label_values(&[from, to]).inc();
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub struct MetricsHandler {
    collector: Arc<MetricsCollector>,
    manager: Arc<ConnectionManager>,
}

impl MetricsHandler {
    pub fn new(collector: Arc<MetricsCollector>, manager: Arc<ConnectionManager>) -> Self {
        Self { collector, manager }
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub async fn metrics(&self) -> String {
        let cached = i64::try_from(self.manager.active_count().await).unwrap_or(i64::MAX);
        self.collector.cached_providers.set(cached);
        self.collector.encode().unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
            String::from("# Error encoding metrics\n")
        })
    }
}

/// Counts and times every request by its matched route template.
pub async fn track_requests(
    axum::extract::State(collector): axum::extract::State<Arc<MetricsCollector>>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<axum::extract::MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = std::time::Instant::now();

    let response = next.run(request).await;

    collector
        .requests_total
        .with_label_values(&[&method, &route, response.status().as_str()])
        .inc();
    collector
        .request_duration
        .with_label_values(&[&method, &route])
        .observe(started.elapsed().as_secs_f64());
    response
}
