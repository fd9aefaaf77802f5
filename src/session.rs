//! Employee session management.
//!
//! The session identifies the kiosk's warehouse and the logged-in employee.
//! It is populated by a login call or by startup auto-verification of the
//! persisted credential bundle, and cleared on explicit logout. The session
//! store is the single gate other components consult to decide whether
//! background work may run; the poller only ever reads it.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::KioskApi;
use crate::config::ConfigStore;
use crate::storage::{self, KeyValueStore, KEY_AUTH_CREDENTIALS};

/// Authenticated identity. All fields optional; the session counts as
/// authenticated when the employee id is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub warehouse_id: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub employee_role: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.employee_id.is_some()
    }
}

/// Persisted credential bundle (`auth_credentials` storage key). The
/// optional password enables re-login when the token has expired.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub warehouse_id: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub employee_role: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Mutex-held session container. Written by login/logout/auto-login only.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, session: Session) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = session;
    }

    pub fn clear(&self) {
        self.set(Session::default());
    }

    pub fn snapshot(&self) -> Session {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_authenticated()
    }

    pub fn warehouse_id(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .warehouse_id
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// Validate the login form before any network call. Returns the first
/// violated field's message.
pub fn validate_login_form(
    warehouse_id: &str,
    employee_id: &str,
    password: &str,
) -> Result<(), String> {
    if warehouse_id.trim().is_empty() {
        return Err("Warehouse ID is required".to_string());
    }
    if employee_id.trim().is_empty() {
        return Err("Employee ID is required".to_string());
    }
    if password.trim().is_empty() {
        return Err("Password is required".to_string());
    }
    Ok(())
}

/// Perform an employee login: validate the form, call the server, populate
/// the session store, and persist the credential bundle for auto-login.
pub async fn login<A: KioskApi>(
    api: &A,
    sessions: &SessionStore,
    store: &dyn KeyValueStore,
    warehouse_id: &str,
    employee_id: &str,
    password: &str,
) -> Result<Session, String> {
    validate_login_form(warehouse_id, employee_id, password)?;

    let server = api
        .login(warehouse_id.trim(), employee_id.trim(), password)
        .await
        .map_err(|e| e.to_string())?;

    // Server fields win; the entered ids fill anything the server omitted.
    let session = Session {
        token: server.token,
        warehouse_id: server
            .warehouse_id
            .or_else(|| Some(warehouse_id.trim().to_string())),
        employee_id: server
            .employee_id
            .or_else(|| Some(employee_id.trim().to_string())),
        employee_name: server.employee_name,
        employee_role: server.employee_role,
        phone: server.phone,
    };

    let bundle = StoredCredentials {
        token: session.token.clone(),
        warehouse_id: session.warehouse_id.clone(),
        employee_id: session.employee_id.clone(),
        employee_name: session.employee_name.clone(),
        employee_role: session.employee_role.clone(),
        phone: session.phone.clone(),
        password: Some(password.to_string()),
    };
    if let Err(e) = storage::set_json(store, KEY_AUTH_CREDENTIALS, &bundle) {
        warn!(error = %e, "failed to persist credential bundle");
    }

    sessions.set(session.clone());
    info!(
        warehouse_id = session.warehouse_id.as_deref().unwrap_or(""),
        employee_id = session.employee_id.as_deref().unwrap_or(""),
        "employee logged in"
    );
    Ok(session)
}

/// Clear the session and remove the persisted bundle. The user chose to end
/// the session, so auto-login must not resurrect it.
pub fn logout(sessions: &SessionStore, store: &dyn KeyValueStore) {
    sessions.clear();
    if let Err(e) = store.remove(KEY_AUTH_CREDENTIALS) {
        warn!(error = %e, "failed to remove credential bundle");
    }
    info!("employee logged out");
}

// ---------------------------------------------------------------------------
// Startup auto-login
// ---------------------------------------------------------------------------

/// Outcome of the startup auto-verification.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoLogin {
    /// No (or structurally incomplete) persisted credentials; show login.
    NoCredentials,
    /// Verification succeeded; the session store is populated.
    LoggedIn(Session),
    /// Verification failed. The persisted bundle is deliberately kept so a
    /// transient network problem never forces re-entry of credentials.
    VerificationFailed(String),
}

/// Run the startup sequence: hydrate base URL overrides, then verify any
/// persisted credentials against the server.
pub async fn auto_login<A: KioskApi>(
    api: &A,
    sessions: &SessionStore,
    config: &ConfigStore,
    store: &dyn KeyValueStore,
) -> AutoLogin {
    config.load_overrides(store);

    let Some(bundle) = storage::get_json::<StoredCredentials>(store, KEY_AUTH_CREDENTIALS) else {
        info!("no stored credentials; manual login required");
        return AutoLogin::NoCredentials;
    };

    let (Some(warehouse_id), Some(employee_id)) =
        (bundle.warehouse_id.clone(), bundle.employee_id.clone())
    else {
        info!("stored credentials incomplete; manual login required");
        return AutoLogin::NoCredentials;
    };

    let token = bundle.token.clone().unwrap_or_default();
    match api.verify(&warehouse_id, &employee_id, &token).await {
        Ok(server) => {
            // Stored values fill any field the server omits.
            let session = Session {
                token: server.token.or(bundle.token),
                warehouse_id: server.warehouse_id.or(Some(warehouse_id)),
                employee_id: server.employee_id.or(Some(employee_id)),
                employee_name: server.employee_name.or(bundle.employee_name),
                employee_role: server.employee_role.or(bundle.employee_role),
                phone: server.phone.or(bundle.phone),
            };
            sessions.set(session.clone());
            info!("auto-login verified");
            AutoLogin::LoggedIn(session)
        }
        Err(e) => {
            // Soft-fail: keep the bundle, let the user retry or log in by hand.
            warn!(error = %e, "auto-login verification failed");
            AutoLogin::VerificationFailed(e.to_string())
        }
    }
}
