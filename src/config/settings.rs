use serde::Deserialize;

use crate::utils::constants::*;

/// ================================
/// Global service-wide settings
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct SettingsConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_path")]
    pub path: String,
    #[serde(default)]
    pub is_enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            path: default_metrics_path(),
            is_enabled: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// ================================
/// Logging
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String, // allowed: trace, debug, info, warn, error
    pub format: LogFormat,
}

impl LoggingConfig {
    pub fn new(level: String, format: LogFormat) -> Self {
        Self { level, format }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new("info".to_owned(), LogFormat::Compact)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Compact,
}

/// ================================
/// Shared store
/// ================================
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    Redis { url: String },
    /// process-local, only coordinates callers inside one instance
    Memory,
}

/// ================================
/// Remote authority
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct AuthorityConfig {
    pub url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// ================================
/// Coordinator tuning
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_lock_lease_seconds")]
    pub lock_lease_seconds: u64,
    /// validity window announced by the authority
    #[serde(default = "default_token_ttl_seconds")]
    pub token_ttl_seconds: u64,
    /// cut from the validity window so a handed out token never expires mid-flight
    #[serde(default = "default_safety_margin_seconds")]
    pub safety_margin_seconds: u64,
    /// proactive refresh starts this long before the stored token expires
    #[serde(default = "default_refresh_ahead_seconds")]
    pub refresh_ahead_seconds: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            lock_lease_seconds: default_lock_lease_seconds(),
            token_ttl_seconds: default_token_ttl_seconds(),
            safety_margin_seconds: default_safety_margin_seconds(),
            refresh_ahead_seconds: default_refresh_ahead_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    /// will be mutiply by 2 on every attempt until max_delay_ms
    #[serde(default = "default_retry_delay_ms")]
    pub base_delay_ms: u64,
    /// invariant: >= base_delay_ms. equal values give a fixed back-off
    #[serde(default = "default_retry_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            base_delay_ms: default_retry_delay_ms(),
            max_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_HTTP_TIMEOUT_MS
}

fn default_lock_lease_seconds() -> u64 {
    DEFAULT_LOCK_LEASE_SECS
}

fn default_token_ttl_seconds() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

fn default_safety_margin_seconds() -> u64 {
    DEFAULT_SAFETY_MARGIN_SECS
}

fn default_refresh_ahead_seconds() -> u64 {
    DEFAULT_REFRESH_AHEAD_SECS
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}
