use serde::Deserialize;

use crate::config::apps::AppCredential;
use crate::config::settings::{AuthorityConfig, CoordinatorConfig, SettingsConfig, StoreConfig};

/// ================================
/// Full service configuration
/// ================================
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub settings: SettingsConfig,
    pub store: StoreConfig,
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// JSON or YAML list of `{appid, appsecret}`, appended after `apps`
    pub apps_file: Option<String>,
    #[serde(default)]
    pub apps: Vec<AppCredential>,
}
