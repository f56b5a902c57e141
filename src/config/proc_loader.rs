use std::{fs, path::Path};

use anyhow::{anyhow, Result};
use regex::Regex;
use tracing::{debug, error};

use crate::config::apps::load_apps_file;
use crate::config::proc_validator;
use crate::config::service::ServiceConfig;
use crate::config::settings::LoggingConfig;
use crate::observability::metrics::get_metrics;

/// Load, expand and validate config from a YAML file
pub async fn file_to_config(path: &Path) -> Result<ServiceConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| anyhow!("cannot read config '{}': {}", path.display(), e))?;

    let expanded = expand_env_vars(&content);
    parse_config(expanded).await
}

pub async fn parse_config(content: String) -> Result<ServiceConfig> {
    let metrics = get_metrics().await;
    let mut service_config: ServiceConfig = serde_yaml::from_str(&content).inspect_err(|e| {
        error!("parse config error: {}", e);
        metrics.config_parse_failures.inc();
    })?;

    // Apply defaults
    if service_config.settings.logging.is_none() {
        service_config.settings.logging = Some(LoggingConfig::default());
    }

    // Registry file entries follow the inline ones
    if let Some(apps_file) = &service_config.apps_file {
        let apps = load_apps_file(Path::new(apps_file))?;
        service_config.apps.extend(apps);
    }

    debug!("validation config ...");
    proc_validator::validate_service_config(&service_config)
        .await
        .map_err(|errors| anyhow!("config is not valid: {}", errors.join("; ")))?;

    Ok(service_config)
}

/// Replace `${VAR}` and `${VAR:default}` with environment values.
fn expand_env_vars(input: &str) -> String {
    let re = match Regex::new(r"\$\{(\w+)(?::([^\}]*))?\}") {
        Ok(re) => re,
        Err(_) => return input.to_owned(),
    };
    re.replace_all(input, |caps: &regex::Captures| {
        let var = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}
