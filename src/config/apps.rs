use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use tracing::info;

/// One registrable application.
#[derive(Clone, Deserialize, PartialEq, Eq, Hash)]
pub struct AppCredential {
    pub appid: String,
    pub appsecret: String,
}

impl AppCredential {
    pub fn new(appid: impl Into<String>, appsecret: impl Into<String>) -> Self {
        Self {
            appid: appid.into(),
            appsecret: appsecret.into(),
        }
    }

    /// Composite key used for every store key and channel: `<appid>-<appsecret>`.
    pub fn key(&self) -> String {
        format!("{}-{}", self.appid, self.appsecret)
    }
}

// secrets stay out of logs
impl fmt::Debug for AppCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredential")
            .field("appid", &self.appid)
            .field("appsecret", &"***")
            .finish()
    }
}

/// Applications the coordinator may serve. Read-only after startup.
#[derive(Debug, Clone, Default)]
pub struct RegisteredApps {
    ordered: Vec<AppCredential>,
    by_key: HashMap<String, AppCredential>,
}

impl RegisteredApps {
    /// Later duplicates of an already registered key are ignored.
    pub fn new(apps: impl IntoIterator<Item = AppCredential>) -> Self {
        let mut registry = Self::default();
        for app in apps {
            let key = app.key();
            if registry.by_key.contains_key(&key) {
                continue;
            }
            registry.by_key.insert(key, app.clone());
            registry.ordered.push(app);
        }
        registry
    }

    pub fn get(&self, app_key: &str) -> Option<&AppCredential> {
        self.by_key.get(app_key)
    }

    pub fn contains(&self, app_key: &str) -> bool {
        self.by_key.contains_key(app_key)
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.ordered.iter().map(|app| app.key())
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppCredential> {
        self.ordered.iter()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Read an ordered `[{appid, appsecret}]` list. JSON is accepted as YAML.
pub fn load_apps_file(path: &Path) -> Result<Vec<AppCredential>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("cannot read apps file '{}': {}", path.display(), e))?;
    let apps: Vec<AppCredential> = serde_yaml::from_str(&content)
        .map_err(|e| anyhow!("invalid apps file '{}': {}", path.display(), e))?;
    info!("loaded {} apps from {}", apps.len(), path.display());
    Ok(apps)
}
