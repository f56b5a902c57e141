use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

// Declare the static OnceCell to hold the Metrics.
static METRICS_INSTANCE: OnceCell<Arc<Metrics>> = OnceCell::const_new();

/// Asynchronously initializes and gets a reference to the process-wide metrics.
pub async fn get_metrics() -> &'static Arc<Metrics> {
    METRICS_INSTANCE
        .get_or_init(|| async {
            info!("Initializing Metrics ...");
            Metrics::new()
        })
        .await
}

#[derive(Clone)]
pub struct Metrics {
    pub registry: Registry,

    // Request metrics
    pub token_requests: IntCounterVec,

    // Authority metrics
    pub remote_fetches: IntCounterVec,
    pub remote_fetch_duration: HistogramVec,

    // Coordination metrics
    pub lock_acquisitions: IntCounterVec,
    pub refresh_waves: IntCounterVec,
    pub notifier_messages: IntCounterVec,
    pub waiters_released: IntCounterVec,

    // Config/runtime
    pub config_parse_failures: IntCounter,
    pub config_validation_errors: IntCounter,
    pub up: IntGauge,
}

impl Metrics {
    fn new() -> Arc<Self> {
        let registry = Registry::new_custom(Some("tokenhub".into()), None).unwrap();

        let metrics: Arc<Metrics> = Arc::new(Self {
            token_requests: IntCounterVec::new(Opts::new("token_requests_total", "Token requests by cache outcome"), &["outcome"]).unwrap(),

            remote_fetches: IntCounterVec::new(Opts::new("remote_fetches_total", "Authority fetches by app and result"), &["appid", "result"]).unwrap(),
            remote_fetch_duration: HistogramVec::new(HistogramOpts::new("remote_fetch_duration_seconds", "Authority fetch duration seconds").buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]), &["appid"]).unwrap(),

            lock_acquisitions: IntCounterVec::new(Opts::new("lock_acquisitions_total", "Cluster lock attempts by result"), &["result"]).unwrap(),
            refresh_waves: IntCounterVec::new(Opts::new("refresh_waves_total", "Finished refresh waves by app and outcome"), &["appid", "outcome"]).unwrap(),
            notifier_messages: IntCounterVec::new(Opts::new("notifier_messages_total", "Notifications received from sibling instances"), &["event"]).unwrap(),
            waiters_released: IntCounterVec::new(Opts::new("waiters_released_total", "Local waiters released by outcome"), &["outcome"]).unwrap(),

            config_parse_failures: IntCounter::new("config_parse_failures_total", "Config files that failed to parse").unwrap(),
            config_validation_errors: IntCounter::new("config_validation_errors_total", "Validation errors during startup").unwrap(),
            up: IntGauge::new("up", "1 if service is healthy").unwrap(),

            registry,
        });

        // Register all metrics in the registry
        let reg = &metrics.registry;
        reg.register(Box::new(metrics.token_requests.clone())).unwrap();
        reg.register(Box::new(metrics.remote_fetches.clone())).unwrap();
        reg.register(Box::new(metrics.remote_fetch_duration.clone())).unwrap();
        reg.register(Box::new(metrics.lock_acquisitions.clone())).unwrap();
        reg.register(Box::new(metrics.refresh_waves.clone())).unwrap();
        reg.register(Box::new(metrics.notifier_messages.clone())).unwrap();
        reg.register(Box::new(metrics.waiters_released.clone())).unwrap();
        reg.register(Box::new(metrics.config_parse_failures.clone())).unwrap();
        reg.register(Box::new(metrics.config_validation_errors.clone())).unwrap();
        reg.register(Box::new(metrics.up.clone())).unwrap();

        metrics
    }
}
