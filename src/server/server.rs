use std::sync::Arc;

use anyhow::{anyhow, Result};
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::config::settings::{MetricsConfig, SettingsConfig};
use crate::coordination::coordinator::TokenCoordinator;
use crate::observability::metrics::{get_metrics, Metrics};
use crate::observability::routes::MetricsState;
use crate::server::handlers::{get_access_token, get_new_access_token};
use crate::store::StoreKind;

#[derive(Clone)]
pub struct AppState {
    pub metrics_state: MetricsState,
    pub coordinator: Arc<TokenCoordinator<StoreKind>>,
}

impl AppState {
    pub fn new(metrics: &Metrics, coordinator: Arc<TokenCoordinator<StoreKind>>) -> Self {
        Self {
            metrics_state: MetricsState::new(metrics.registry.clone()),
            coordinator,
        }
    }
}

/// Token routes plus the metrics route when enabled.
pub fn router(state: AppState, metrics_config: &MetricsConfig) -> Router {
    Router::new()
        .route("/access_token", get(get_access_token))
        .route("/new_access_token", get(get_new_access_token))
        .merge(state.metrics_state.router(metrics_config))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn start(
    settings_config: &SettingsConfig,
    coordinator: Arc<TokenCoordinator<StoreKind>>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let metrics = get_metrics().await;
    let state = AppState::new(metrics, coordinator);
    let app = router(state, &settings_config.metrics);

    let bind_addr = format!("{}:{}", settings_config.server.host, settings_config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow!("cannot bind {}: {}", bind_addr, e))?;
    info!("listening on {}", bind_addr);

    metrics.up.set(1);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow!("http server failed: {}", e));
    metrics.up.set(0);
    served
}
