//! Kiosk server API client.
//!
//! All main-server endpoints share the `{code, data, message}` envelope with
//! `code == 200` meaning success. Robot forwarding deliberately bypasses this
//! client's base URL and auth header: it builds a one-off client against the
//! robot's own base URL with a fixed 10-second timeout.

use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::catalog::InventoryRecord;
use crate::config::ImageConfigRecord;
use crate::session::Session;
use crate::tasks::TaskBundle;

/// Timeout for main-server API requests.
const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Fixed timeout for forwarded robot commands.
const ROBOT_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise a user-entered base URL:
/// - strip surrounding whitespace and trailing slashes
/// - ensure a scheme is present (https, or http for localhost)
/// - upgrade plain `http://` to `https://` for non-local hosts
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    let is_local = |u: &str| u.starts_with("localhost") || u.starts_with("127.0.0.1");

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if is_local(&url) {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Kiosks talk to the public API over TLS only; local robot/dev targets
    // are exempt.
    if let Some(rest) = url.strip_prefix("http://") {
        if !is_local(rest) {
            warn!(url = %url, "insecure base URL upgraded to https");
            url = format!("https://{rest}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Failure modes of a server call, mirroring the poll-level taxonomy:
/// transport problems and application-level envelope failures are handled
/// identically by callers, but carry distinct messages for the logs.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network unreachable, timeout, or another transport problem.
    #[error("{0}")]
    Transport(String),
    /// The envelope arrived but reported a non-success code.
    #[error("{message} (code {code})")]
    Api { code: i64, message: String },
    /// A success envelope without the expected payload.
    #[error("server response missing expected data")]
    MissingData,
    /// The body could not be parsed as the expected envelope.
    #[error("invalid response from server: {0}")]
    Decode(String),
}

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach server at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid server URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Session is invalid or expired".to_string(),
        403 => "Kiosk not authorized".to_string(),
        404 => "Server endpoint not found".to_string(),
        s if s >= 500 => format!("Server error (HTTP {s})"),
        s => format!("Unexpected response from server (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Uniform response envelope: `{code: int, data: T, message: string}`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// Success is `code == 200` with a present payload; anything else is an
    /// application-level failure.
    fn into_data(self) -> Result<T, ApiError> {
        if self.code != 200 {
            return Err(ApiError::Api {
                code: self.code,
                message: self
                    .message
                    .unwrap_or_else(|| "request rejected by server".to_string()),
            });
        }
        self.data.ok_or(ApiError::MissingData)
    }
}

// ---------------------------------------------------------------------------
// API trait seam
// ---------------------------------------------------------------------------

/// The server surface the session layer and the poller depend on. The poller
/// and handlers are generic over this trait so tests can drive them with
/// scripted fakes instead of a live server.
pub trait KioskApi: Send + Sync {
    fn login(
        &self,
        warehouse_id: &str,
        employee_id: &str,
        password: &str,
    ) -> impl Future<Output = Result<Session, ApiError>> + Send;

    fn verify(
        &self,
        warehouse_id: &str,
        employee_id: &str,
        token: &str,
    ) -> impl Future<Output = Result<Session, ApiError>> + Send;

    fn fetch_tasks(&self) -> impl Future<Output = Result<TaskBundle, ApiError>> + Send;

    fn fetch_inventory(
        &self,
        warehouse_id: &str,
    ) -> impl Future<Output = Result<Vec<InventoryRecord>, ApiError>> + Send;

    fn fetch_image_config(
        &self,
        warehouse_id: &str,
    ) -> impl Future<Output = Result<Vec<ImageConfigRecord>, ApiError>> + Send;

    fn upload_screenshot(
        &self,
        image: Vec<u8>,
        warehouse_id: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    fn forward_to_robot(
        &self,
        robot_base_url: &str,
        route: &str,
        payload: &Value,
    ) -> impl Future<Output = Result<Value, ApiError>> + Send;
}

// ---------------------------------------------------------------------------
// Live client
// ---------------------------------------------------------------------------

/// HTTP implementation of [`KioskApi`] against the configured server.
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(API_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Attach the session token to subsequent main-server requests.
    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    fn bearer(&self) -> Option<String> {
        self.token.read().ok()?.clone()
    }

    async fn request_envelope<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let builder = match self.bearer() {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(friendly_error(&self.base_url, &e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Api {
                code: i64::from(status.as_u16()),
                message: status_error(status),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| ApiError::Transport(friendly_error(&self.base_url, &e)))?;
        let envelope: Envelope<T> =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        envelope.into_data()
    }

    async fn get_envelope<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{path}", self.base_url);
        self.request_envelope(self.client.get(&url).query(query))
            .await
    }

    async fn post_envelope<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<T, ApiError> {
        let url = format!("{}{path}", self.base_url);
        self.request_envelope(self.client.post(&url).json(body))
            .await
    }
}

impl KioskApi for ApiClient {
    async fn login(
        &self,
        warehouse_id: &str,
        employee_id: &str,
        password: &str,
    ) -> Result<Session, ApiError> {
        let body = serde_json::json!({
            "warehouse_id": warehouse_id,
            "employee_id": employee_id,
            "password": password,
        });
        self.post_envelope("/auth/login", &body).await
    }

    async fn verify(
        &self,
        warehouse_id: &str,
        employee_id: &str,
        token: &str,
    ) -> Result<Session, ApiError> {
        let body = serde_json::json!({
            "warehouse_id": warehouse_id,
            "employee_id": employee_id,
            "token": token,
        });
        self.post_envelope("/auth/verify", &body).await
    }

    async fn fetch_tasks(&self) -> Result<TaskBundle, ApiError> {
        self.get_envelope("/task_get", &[]).await
    }

    async fn fetch_inventory(&self, warehouse_id: &str) -> Result<Vec<InventoryRecord>, ApiError> {
        self.get_envelope("/inventory", &[("warehouse_id", warehouse_id)])
            .await
    }

    async fn fetch_image_config(
        &self,
        warehouse_id: &str,
    ) -> Result<Vec<ImageConfigRecord>, ApiError> {
        self.get_envelope("/yht_image", &[("warehouse_id", warehouse_id)])
            .await
    }

    async fn upload_screenshot(&self, image: Vec<u8>, warehouse_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/screenshot", self.base_url);
        let form = Form::new()
            .part(
                "image",
                Part::bytes(image)
                    .file_name("screenshot.png")
                    .mime_str("image/png")
                    .map_err(|e| ApiError::Transport(e.to_string()))?,
            )
            .text("warehouse_id", warehouse_id.to_string());

        // The upload endpoint replies with `{code, message}` and no data.
        let builder = self.client.post(&url).multipart(form);
        let builder = match self.bearer() {
            Some(token) => builder.header("Authorization", format!("Bearer {token}")),
            None => builder,
        };
        let resp = builder
            .send()
            .await
            .map_err(|e| ApiError::Transport(friendly_error(&self.base_url, &e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Api {
                code: i64::from(status.as_u16()),
                message: status_error(status),
            });
        }

        let body = resp.text().await.unwrap_or_default();
        let envelope: Envelope<Value> =
            serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        if envelope.code != 200 {
            return Err(ApiError::Api {
                code: envelope.code,
                message: envelope
                    .message
                    .unwrap_or_else(|| "screenshot upload rejected".to_string()),
            });
        }
        info!(warehouse_id, "screenshot uploaded");
        Ok(())
    }

    /// Direct POST to `{robot_base_url}{route}`: fresh client, fixed timeout,
    /// no auth header, no envelope expectations beyond valid JSON (or empty).
    /// The base URL is used as configured; dispensers on a LAN IP commonly
    /// speak plain http and must not be rewritten to https.
    async fn forward_to_robot(
        &self,
        robot_base_url: &str,
        route: &str,
        payload: &Value,
    ) -> Result<Value, ApiError> {
        let base = robot_base_url.trim().trim_end_matches('/').to_string();
        let url = format!("{base}{route}");

        let client = Client::builder()
            .timeout(ROBOT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {e}")))?;

        debug!(url = %url, "forwarding robot command");
        let resp = client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ApiError::Transport(friendly_error(&base, &e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Api {
                code: i64::from(status.as_u16()),
                message: format!("Robot rejected command (HTTP {})", status.as_u16()),
            });
        }

        let body = resp.text().await.unwrap_or_default();
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_scheme_and_strips_slashes() {
        assert_eq!(
            normalize_base_url("kiosk.example.com/"),
            "https://kiosk.example.com"
        );
        assert_eq!(
            normalize_base_url("  https://kiosk.example.com///  "),
            "https://kiosk.example.com"
        );
        assert_eq!(
            normalize_base_url("localhost:8090"),
            "http://localhost:8090"
        );
        assert_eq!(
            normalize_base_url("127.0.0.1:9000/"),
            "http://127.0.0.1:9000"
        );
    }

    #[test]
    fn normalize_upgrades_insecure_remote_urls() {
        assert_eq!(
            normalize_base_url("http://kiosk.example.com"),
            "https://kiosk.example.com"
        );
        // Local robot targets stay on plain http.
        assert_eq!(
            normalize_base_url("http://127.0.0.1:5000"),
            "http://127.0.0.1:5000"
        );
    }

    #[test]
    fn envelope_success_requires_code_200_and_data() {
        let ok: Envelope<i32> = serde_json::from_str(r#"{"code":200,"data":7,"message":"ok"}"#)
            .expect("parse envelope");
        assert_eq!(ok.into_data().expect("data"), 7);

        let rejected: Envelope<i32> =
            serde_json::from_str(r#"{"code":500,"message":"boom"}"#).expect("parse envelope");
        match rejected.into_data() {
            Err(ApiError::Api { code, message }) => {
                assert_eq!(code, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("expected Api error, got {other:?}"),
        }

        let empty: Envelope<i32> =
            serde_json::from_str(r#"{"code":200}"#).expect("parse envelope");
        assert!(matches!(empty.into_data(), Err(ApiError::MissingData)));
    }

    #[test]
    fn status_errors_are_human_readable() {
        assert_eq!(
            status_error(StatusCode::UNAUTHORIZED),
            "Session is invalid or expired"
        );
        assert!(status_error(StatusCode::BAD_GATEWAY).contains("HTTP 502"));
    }
}
