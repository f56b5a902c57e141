//! Configuration validation with aggregated errors.
//! - Aggregates all issues into Vec<String>
//! - Validates the app registry, coordinator timing invariants,
//!   store / authority endpoints, logging and metrics settings

use std::collections::HashSet;

use tracing::{error, info};

use crate::config::apps::AppCredential;
use crate::config::service::ServiceConfig;
use crate::config::settings::{AuthorityConfig, CoordinatorConfig, SettingsConfig, StoreConfig};
use crate::observability::metrics::get_metrics;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Public entrypoint: returns Ok(()) or Err(Vec<String>) containing all issues.
pub async fn validate_service_config(cfg: &ServiceConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_settings(&cfg.settings, &mut errors);
    validate_store(&cfg.store, &mut errors);
    validate_authority(&cfg.authority, &mut errors);
    validate_coordinator(&cfg.coordinator, &mut errors);
    validate_lease(&cfg.coordinator, &cfg.authority, &mut errors);
    validate_apps(&cfg.apps, &mut errors);

    if errors.is_empty() {
        info!("config is valid, {} apps registered", cfg.apps.len());
        Ok(())
    } else {
        let metrics = get_metrics().await;
        for e in &errors {
            error!("config: {}", e);
            metrics.config_validation_errors.inc();
        }
        Err(errors)
    }
}

fn validate_settings(settings: &SettingsConfig, errors: &mut Vec<String>) {
    if settings.server.host.trim().is_empty() {
        errors.push("settings.server.host must not be empty".to_string());
    }
    if settings.metrics.is_enabled && !settings.metrics.path.starts_with('/') {
        errors.push(format!(
            "settings.metrics.path '{}' must start with '/'",
            settings.metrics.path
        ));
    }
    if let Some(logging) = &settings.logging {
        if !LOG_LEVELS.contains(&logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "settings.logging.level '{}' is unknown, allowed: {}",
                logging.level,
                LOG_LEVELS.join(", ")
            ));
        }
    }
}

fn validate_store(store: &StoreConfig, errors: &mut Vec<String>) {
    if let StoreConfig::Redis { url } = store {
        if url.trim().is_empty() {
            errors.push("store.url must not be empty for redis store".to_string());
        } else if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
            errors.push(format!("store.url '{}' must use redis:// or rediss://", url));
        }
    }
}

fn validate_authority(authority: &AuthorityConfig, errors: &mut Vec<String>) {
    if !(authority.url.starts_with("http://") || authority.url.starts_with("https://")) {
        errors.push(format!(
            "authority.url '{}' must be an http(s) url",
            authority.url
        ));
    }
    if authority.request_timeout_ms == 0 {
        errors.push("authority.request_timeout_ms must be > 0".to_string());
    }
}

fn validate_coordinator(c: &CoordinatorConfig, errors: &mut Vec<String>) {
    if c.retry.attempts < 1 {
        errors.push("coordinator.retry.attempts must be >= 1".to_string());
    }
    if c.retry.base_delay_ms > c.retry.max_delay_ms {
        errors.push(format!(
            "coordinator.retry.base_delay_ms ({}) must be <= max_delay_ms ({})",
            c.retry.base_delay_ms, c.retry.max_delay_ms
        ));
    }
    if c.lock_lease_seconds < 1 {
        errors.push("coordinator.lock_lease_seconds must be >= 1".to_string());
    }
    if c.token_ttl_seconds <= c.safety_margin_seconds {
        errors.push(format!(
            "coordinator.token_ttl_seconds ({}) must be greater than safety_margin_seconds ({})",
            c.token_ttl_seconds, c.safety_margin_seconds
        ));
    } else if c.token_ttl_seconds - c.safety_margin_seconds <= c.refresh_ahead_seconds {
        errors.push(format!(
            "coordinator.refresh_ahead_seconds ({}) must be smaller than the stored token lifetime ({})",
            c.refresh_ahead_seconds,
            c.token_ttl_seconds - c.safety_margin_seconds
        ));
    }
}

/// The lock is renewed once per attempt, so one lease must cover a
/// request plus the back-off before it.
fn validate_lease(c: &CoordinatorConfig, authority: &AuthorityConfig, errors: &mut Vec<String>) {
    if c.lock_lease_seconds < 1 {
        return;
    }
    let attempt_ms = authority.request_timeout_ms.saturating_add(c.retry.max_delay_ms);
    if c.lock_lease_seconds.saturating_mul(1000) <= attempt_ms {
        errors.push(format!(
            "coordinator.lock_lease_seconds ({}) must outlast one attempt plus back-off ({} ms)",
            c.lock_lease_seconds, attempt_ms
        ));
    }
}

fn validate_apps(apps: &[AppCredential], errors: &mut Vec<String>) {
    if apps.is_empty() {
        errors.push("config: no apps registered; set 'apps' or 'apps_file'".to_string());
    }
    let mut seen = HashSet::new();
    for (idx, app) in apps.iter().enumerate() {
        if app.appid.trim().is_empty() {
            errors.push(format!("apps[{}].appid must not be empty", idx));
        }
        if app.appsecret.trim().is_empty() {
            errors.push(format!("apps[{}].appsecret must not be empty", idx));
        }
        if !seen.insert(app.key()) {
            errors.push(format!(
                "apps[{}] duplicate registration for appid '{}'",
                idx, app.appid
            ));
        }
    }
}
