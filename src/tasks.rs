//! Remote task handlers.
//!
//! Each poll cycle fetches a [`TaskBundle`] of boolean flags; every flagged
//! task kind is dispatched to one of the handlers below. Handlers are
//! independent and stateless per call: a failure is reported to the poller
//! for logging but never aborts sibling handlers and never feeds the poll
//! error budget. Capability gaps (no screen capturer registered, no robot
//! base URL configured) are skips, not failures.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::KioskApi;
use crate::catalog::{Product, ProductStore};
use crate::config::ConfigStore;
use crate::session::SessionStore;

// ---------------------------------------------------------------------------
// Task bundle
// ---------------------------------------------------------------------------

/// One boolean status flag, e.g. `{"status": true}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFlag {
    #[serde(default)]
    pub status: bool,
}

/// Payload of a forwarded robot command.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestPayload {
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub json_data: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestTask {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub data: Option<RequestPayload>,
}

/// The set of task flags returned by `GET /task_get`, one per task kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskBundle {
    #[serde(default)]
    pub inventory: Option<TaskFlag>,
    #[serde(default)]
    pub get_image: Option<TaskFlag>,
    #[serde(default)]
    pub screenshot: Option<TaskFlag>,
    #[serde(default)]
    pub request: Option<RequestTask>,
}

// ---------------------------------------------------------------------------
// Screen capture capability
// ---------------------------------------------------------------------------

/// Capture capability provided by the currently active UI surface. The
/// active screen registers an implementation with the poller and clears it
/// on teardown; the task layer never reaches for ambient globals.
pub trait ScreenCapturer: Send + Sync {
    /// Capture the current screen as encoded image bytes.
    fn capture(&self) -> Result<Vec<u8>, String>;
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Inventory refresh: fetch the warehouse inventory, map records to
/// products, and atomically replace the product and category lists. Failure
/// leaves existing catalog state untouched.
pub async fn refresh_inventory<A: KioskApi>(
    api: &A,
    sessions: &SessionStore,
    products: &ProductStore,
) -> Result<(), String> {
    let warehouse_id = sessions
        .warehouse_id()
        .ok_or_else(|| "no warehouse in session".to_string())?;

    let records = api
        .fetch_inventory(&warehouse_id)
        .await
        .map_err(|e| e.to_string())?;

    let mapped: Vec<Product> = records.into_iter().map(Product::from).collect();
    let count = mapped.len();
    products.replace(mapped);
    info!(warehouse_id, count, "inventory refreshed");
    Ok(())
}

/// Image/config refresh: the endpoint returns at most one relevant record
/// per warehouse; the first record overwrites the theming image fields. An
/// empty result is a no-op.
pub async fn refresh_image_config<A: KioskApi>(
    api: &A,
    sessions: &SessionStore,
    config: &ConfigStore,
) -> Result<(), String> {
    let warehouse_id = sessions
        .warehouse_id()
        .ok_or_else(|| "no warehouse in session".to_string())?;

    let records = api
        .fetch_image_config(&warehouse_id)
        .await
        .map_err(|e| e.to_string())?;

    match records.first() {
        Some(record) => {
            config.apply_image_config(record);
            info!(warehouse_id, "image config applied");
        }
        None => debug!(warehouse_id, "no image config for warehouse"),
    }
    Ok(())
}

/// Screenshot capture + upload. Without a registered capturer this is a
/// logged skip, not a failure. The upload has no state-store side effect.
pub async fn capture_and_upload_screenshot<A: KioskApi>(
    api: &A,
    sessions: &SessionStore,
    capturer: Option<&dyn ScreenCapturer>,
) -> Result<(), String> {
    let Some(capturer) = capturer else {
        debug!("no screen capturer registered; screenshot task skipped");
        return Ok(());
    };
    let warehouse_id = sessions
        .warehouse_id()
        .ok_or_else(|| "no warehouse in session".to_string())?;

    let image = capturer.capture()?;
    api.upload_screenshot(image, &warehouse_id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}

/// Robot command forward: requires both a route and a configured robot base
/// URL, otherwise the command is skipped. The POST goes directly to the
/// robot service; the result is logged only.
pub async fn forward_robot_command<A: KioskApi>(
    api: &A,
    config: &ConfigStore,
    task: &RequestTask,
) -> Result<(), String> {
    let route = task
        .data
        .as_ref()
        .and_then(|d| d.route.clone())
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let robot_base_url = config.robot_base_url();

    let (Some(route), Some(robot_base_url)) = (route, robot_base_url) else {
        warn!("robot command skipped: route or robot base URL missing");
        return Ok(());
    };

    let payload = task
        .data
        .as_ref()
        .and_then(|d| d.json_data.clone())
        .unwrap_or_else(|| Value::Array(Vec::new()));

    api.forward_to_robot(&robot_base_url, &route, &payload)
        .await
        .map_err(|e| e.to_string())?;
    info!(route = %route, "robot command forwarded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::session::Session;
    use crate::storage::MemoryStore;
    use crate::test_support::ScriptedApi;
    use std::sync::atomic::Ordering;

    fn authed_sessions() -> SessionStore {
        let sessions = SessionStore::new();
        sessions.set(Session {
            employee_id: Some("emp-7".into()),
            warehouse_id: Some("wh-1".into()),
            ..Session::default()
        });
        sessions
    }

    #[tokio::test]
    async fn inventory_refresh_replaces_catalog() {
        let api = ScriptedApi::new();
        api.push_inventory(vec![
            ScriptedApi::inventory_record("p1", "drinks", 4),
            ScriptedApi::inventory_record("p2", "snacks", 0),
        ]);
        let sessions = authed_sessions();
        let products = ProductStore::new();

        refresh_inventory(&api, &sessions, &products)
            .await
            .expect("refresh");
        assert_eq!(products.products().len(), 2);
        assert_eq!(products.categories().len(), 2);
        assert!(products.find("p2").expect("p2").is_sold_out);
    }

    #[tokio::test]
    async fn inventory_failure_leaves_catalog_untouched() {
        let api = ScriptedApi::new();
        api.push_inventory(vec![ScriptedApi::inventory_record("p1", "drinks", 4)]);
        let sessions = authed_sessions();
        let products = ProductStore::new();
        refresh_inventory(&api, &sessions, &products)
            .await
            .expect("seed catalog");

        api.fail_inventory.store(true, Ordering::SeqCst);
        let err = refresh_inventory(&api, &sessions, &products)
            .await
            .expect_err("server error must propagate");
        assert!(err.contains("code 500"), "unexpected error: {err}");
        assert_eq!(products.products().len(), 1, "existing state untouched");
    }

    #[tokio::test]
    async fn empty_image_config_is_a_noop() {
        let api = ScriptedApi::new();
        let sessions = authed_sessions();
        let config = ConfigStore::new(Environment::Development);

        refresh_image_config(&api, &sessions, &config)
            .await
            .expect("empty result is ok");
        assert_eq!(config.snapshot().background_image, None);
    }

    #[tokio::test]
    async fn first_image_config_record_wins() {
        let api = ScriptedApi::new();
        api.push_image_config("https://cdn.example/first.png");
        api.push_image_config("https://cdn.example/second.png");
        let sessions = authed_sessions();
        let config = ConfigStore::new(Environment::Development);

        refresh_image_config(&api, &sessions, &config)
            .await
            .expect("apply");
        assert_eq!(
            config.snapshot().background_image.as_deref(),
            Some("https://cdn.example/first.png")
        );
    }

    #[tokio::test]
    async fn screenshot_without_capturer_skips_upload() {
        let api = ScriptedApi::new();
        let sessions = authed_sessions();

        capture_and_upload_screenshot(&api, &sessions, None)
            .await
            .expect("skip is not a failure");
        assert_eq!(api.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn screenshot_capture_failure_propagates_without_upload() {
        let api = ScriptedApi::new();
        let sessions = authed_sessions();
        let capturer = crate::test_support::FailingCapturer;

        let err = capture_and_upload_screenshot(&api, &sessions, Some(&capturer as &dyn ScreenCapturer))
            .await
            .expect_err("capture failure");
        assert!(err.contains("capture failed"));
        assert_eq!(api.upload_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn robot_command_requires_route_and_base_url() {
        let api = ScriptedApi::new();
        let config = ConfigStore::new(Environment::Development);

        // No robot URL configured: skip.
        let task = RequestTask {
            status: true,
            data: Some(RequestPayload {
                route: Some("/dispense".into()),
                json_data: None,
            }),
        };
        forward_robot_command(&api, &config, &task)
            .await
            .expect("skip");
        assert_eq!(api.robot_calls.load(Ordering::SeqCst), 0);

        // URL configured but no route: still a skip.
        let store = MemoryStore::new();
        config
            .set_robot_base_url(&store, "http://127.0.0.1:5000")
            .expect("set robot url");
        let no_route = RequestTask {
            status: true,
            data: None,
        };
        forward_robot_command(&api, &config, &no_route)
            .await
            .expect("skip");
        assert_eq!(api.robot_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn robot_command_posts_payload_to_route() {
        let api = ScriptedApi::new();
        let config = ConfigStore::new(Environment::Development);
        let store = MemoryStore::new();
        config
            .set_robot_base_url(&store, "http://192.168.1.50:5000")
            .expect("set robot url");

        let task = RequestTask {
            status: true,
            data: Some(RequestPayload {
                route: Some("/dispense".into()),
                json_data: Some(serde_json::json!([{"slot": 3, "count": 1}])),
            }),
        };
        forward_robot_command(&api, &config, &task)
            .await
            .expect("forward");

        let requests = api.robot_requests.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        let (base, route, payload) = &requests[0];
        // The configured plain-http LAN address reaches the API untouched.
        assert_eq!(base, "http://192.168.1.50:5000");
        assert_eq!(route, "/dispense");
        assert_eq!(payload[0]["slot"], 3);
    }
}
