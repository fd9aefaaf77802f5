//! Test doubles shared by the task-handler and poller tests: a scripted
//! [`KioskApi`] whose endpoints replay canned data and count calls, plus
//! trivial screen capturers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::Notify;

use crate::api::{ApiError, KioskApi};
use crate::catalog::InventoryRecord;
use crate::config::ImageConfigRecord;
use crate::session::Session;
use crate::tasks::{ScreenCapturer, TaskBundle};

#[derive(Default)]
pub(crate) struct ScriptedApi {
    /// Scripted bundle-fetch results, popped one per poll cycle. When the
    /// queue is empty, `fail_bundles` decides between a default success
    /// bundle and a `code 500` envelope failure.
    pub bundles: Mutex<VecDeque<Result<TaskBundle, ApiError>>>,
    pub fail_bundles: AtomicBool,
    /// When set, `fetch_tasks` parks until the gate is notified. Used to
    /// hold a poll cycle in flight.
    pub fetch_gate: Mutex<Option<Arc<Notify>>>,
    pub fetch_calls: AtomicUsize,

    inventory: Mutex<Vec<InventoryRecord>>,
    pub fail_inventory: AtomicBool,
    image_configs: Mutex<Vec<ImageConfigRecord>>,

    pub upload_calls: AtomicUsize,
    pub fail_upload: AtomicBool,
    pub robot_calls: AtomicUsize,
    pub robot_requests: Mutex<Vec<(String, String, Value)>>,

    /// Handler-call order observed by the endpoints.
    pub events: Mutex<Vec<&'static str>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inventory_record(id: &str, category: &str, stock: i64) -> InventoryRecord {
        InventoryRecord {
            id: id.to_string(),
            name: format!("Product {id}"),
            price: 3.5,
            stock,
            category_id: category.to_string(),
            category_name: category.to_string(),
            category_sort: 1,
            product_sort: 1,
            image_url: None,
            warehouse_id: Some("wh-1".into()),
            warehouse_name: None,
            status: Some("normal".into()),
        }
    }

    pub fn push_inventory(&self, records: Vec<InventoryRecord>) {
        *self.inventory.lock().expect("lock") = records;
    }

    pub fn push_image_config(&self, background_image: &str) {
        self.image_configs
            .lock()
            .expect("lock")
            .push(ImageConfigRecord {
                background_image: Some(background_image.to_string()),
                sold_out_watermark: None,
                payment_background: None,
                payment_success_image: None,
            });
    }

    pub fn push_bundle(&self, bundle: Result<TaskBundle, ApiError>) {
        self.bundles.lock().expect("lock").push_back(bundle);
    }

    fn record(&self, event: &'static str) {
        self.events.lock().expect("lock").push(event);
    }

    fn server_error() -> ApiError {
        ApiError::Api {
            code: 500,
            message: "server error".into(),
        }
    }
}

impl KioskApi for ScriptedApi {
    async fn login(&self, _w: &str, _e: &str, _p: &str) -> Result<Session, ApiError> {
        Err(ApiError::MissingData)
    }

    async fn verify(&self, _w: &str, _e: &str, _t: &str) -> Result<Session, ApiError> {
        Err(ApiError::MissingData)
    }

    async fn fetch_tasks(&self) -> Result<TaskBundle, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.fetch_gate.lock().expect("lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(scripted) = self.bundles.lock().expect("lock").pop_front() {
            return scripted;
        }
        if self.fail_bundles.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        Ok(TaskBundle::default())
    }

    async fn fetch_inventory(&self, _w: &str) -> Result<Vec<InventoryRecord>, ApiError> {
        self.record("inventory");
        if self.fail_inventory.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        Ok(self.inventory.lock().expect("lock").clone())
    }

    async fn fetch_image_config(&self, _w: &str) -> Result<Vec<ImageConfigRecord>, ApiError> {
        self.record("image");
        Ok(self.image_configs.lock().expect("lock").clone())
    }

    async fn upload_screenshot(&self, _image: Vec<u8>, _w: &str) -> Result<(), ApiError> {
        self.record("screenshot");
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        Ok(())
    }

    async fn forward_to_robot(
        &self,
        robot_base_url: &str,
        route: &str,
        payload: &Value,
    ) -> Result<Value, ApiError> {
        self.record("robot");
        self.robot_calls.fetch_add(1, Ordering::SeqCst);
        self.robot_requests.lock().expect("lock").push((
            robot_base_url.to_string(),
            route.to_string(),
            payload.clone(),
        ));
        Ok(Value::Null)
    }
}

/// Capturer that always fails, for error-isolation tests.
pub(crate) struct FailingCapturer;

impl ScreenCapturer for FailingCapturer {
    fn capture(&self) -> Result<Vec<u8>, String> {
        Err("capture failed".to_string())
    }
}

/// Capturer that returns a fixed byte blob.
pub(crate) struct StaticCapturer;

impl ScreenCapturer for StaticCapturer {
    fn capture(&self) -> Result<Vec<u8>, String> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }
}
