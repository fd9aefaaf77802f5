//! Runtime configuration: environment defaults, user-entered base URL
//! overrides, and the theming image fields refreshed by the `get_image` task.
//!
//! Resolution order for both base URLs is persisted override first, compiled
//! environment default second. Overrides are saved through the settings
//! screen and re-hydrated at startup by [`ConfigStore::load_overrides`].

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::normalize_base_url;
use crate::storage::{self, KeyValueStore, KEY_ROBOT_BASE_URL, KEY_SERVER_URL};

/// Compile-time environment selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn default_server_url(self) -> &'static str {
        match self {
            Environment::Development => "https://dev-api.vendkiosk.app",
            Environment::Production => "https://api.vendkiosk.app",
        }
    }
}

/// Clean a user-entered robot base URL: trim and strip trailing slashes, but
/// keep the scheme exactly as entered. Dispensers usually sit on a LAN IP
/// behind plain http, so the https upgrade applied to the server base URL
/// must never touch this one.
fn clean_robot_url(url: &str) -> Result<String, String> {
    let mut url = url.trim().to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err("Robot URL must include http:// or https://".to_string());
    }
    while url.ends_with('/') {
        url.pop();
    }
    Ok(url)
}

/// Image-config record returned by `GET /yht_image`. The endpoint returns at
/// most one relevant record per warehouse.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageConfigRecord {
    #[serde(default)]
    pub background_image: Option<String>,
    #[serde(default)]
    pub sold_out_watermark: Option<String>,
    #[serde(default)]
    pub payment_background: Option<String>,
    #[serde(default)]
    pub payment_success_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub environment: Environment,
    pub server_base_url: String,
    pub robot_base_url: Option<String>,
    pub background_image: Option<String>,
    pub sold_out_watermark: Option<String>,
    pub payment_background: Option<String>,
    pub payment_success_image: Option<String>,
}

/// Mutable runtime configuration container, written by the settings screen
/// and the image-config task handler.
pub struct ConfigStore {
    inner: Mutex<Config>,
}

impl ConfigStore {
    pub fn new(environment: Environment) -> Self {
        Self {
            inner: Mutex::new(Config {
                environment,
                server_base_url: environment.default_server_url().to_string(),
                robot_base_url: None,
                background_image: None,
                sold_out_watermark: None,
                payment_background: None,
                payment_success_image: None,
            }),
        }
    }

    /// Re-hydrate persisted overrides at startup. Absent overrides leave the
    /// compiled defaults in place.
    pub fn load_overrides(&self, store: &dyn KeyValueStore) {
        if let Some(url) = storage::get_json::<String>(store, KEY_SERVER_URL) {
            let normalized = normalize_base_url(&url);
            info!(url = %normalized, "loaded server URL override");
            let mut config = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            config.server_base_url = normalized;
        }
        if let Some(url) = storage::get_json::<String>(store, KEY_ROBOT_BASE_URL) {
            match clean_robot_url(&url) {
                Ok(url) => {
                    info!(url = %url, "loaded robot base URL override");
                    let mut config = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                    config.robot_base_url = Some(url);
                }
                Err(e) => warn!(url = %url, error = %e, "ignoring stored robot base URL"),
            }
        }
    }

    /// Persist a new server base URL override and apply it. The override
    /// takes precedence over the compiled default on next resolution.
    pub fn set_server_base_url(
        &self,
        store: &dyn KeyValueStore,
        url: &str,
    ) -> Result<String, String> {
        if url.trim().is_empty() {
            return Err("Server URL must not be empty".to_string());
        }
        let normalized = normalize_base_url(url);
        storage::set_json(store, KEY_SERVER_URL, &normalized)?;
        let mut config = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        config.server_base_url = normalized.clone();
        Ok(normalized)
    }

    /// Persist a new robot base URL override and apply it. The URL is kept
    /// as entered apart from trim/trailing-slash cleanup; forwarding uses it
    /// verbatim.
    pub fn set_robot_base_url(
        &self,
        store: &dyn KeyValueStore,
        url: &str,
    ) -> Result<String, String> {
        if url.trim().is_empty() {
            return Err("Robot URL must not be empty".to_string());
        }
        let cleaned = clean_robot_url(url)?;
        storage::set_json(store, KEY_ROBOT_BASE_URL, &cleaned)?;
        let mut config = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        config.robot_base_url = Some(cleaned.clone());
        Ok(cleaned)
    }

    /// Overwrite the theming image fields from an image-config record.
    pub fn apply_image_config(&self, record: &ImageConfigRecord) {
        let mut config = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        config.background_image = record.background_image.clone();
        config.sold_out_watermark = record.sold_out_watermark.clone();
        config.payment_background = record.payment_background.clone();
        config.payment_success_image = record.payment_success_image.clone();
    }

    pub fn server_base_url(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .server_base_url
            .clone()
    }

    pub fn robot_base_url(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .robot_base_url
            .clone()
    }

    pub fn snapshot(&self) -> Config {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
