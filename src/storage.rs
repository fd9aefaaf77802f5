//! Persisted local state for the kiosk.
//!
//! The kiosk keeps a handful of key → JSON-string entries: the login
//! credential bundle and the user-entered base URL overrides. On a real
//! device these live in the OS credential store (DPAPI on Windows, Keychain
//! on macOS, Secret Service on Linux via the `keyring` crate); tests and
//! ephemeral deployments use the in-memory implementation. Stores and the
//! poller only ever see the [`KeyValueStore`] trait.

use std::collections::HashMap;
use std::sync::Mutex;

use keyring::Entry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

const SERVICE_NAME: &str = "vendkiosk";

// Storage keys
pub const KEY_AUTH_CREDENTIALS: &str = "auth_credentials";
pub const KEY_SERVER_URL: &str = "server_url";
pub const KEY_ROBOT_BASE_URL: &str = "robot_base_url";

/// Simple key → string persistence with get/set/remove semantics.
/// No schema versioning; values are JSON strings or plain strings.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn remove(&self, key: &str) -> Result<(), String>;
}

/// Read a key and deserialize it as JSON. A malformed entry is treated as
/// absent (logged at warn level) so a corrupt bundle never blocks startup.
pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, error = %e, "ignoring malformed stored entry");
            None
        }
    }
}

/// Serialize a value as JSON and store it under `key`.
pub fn set_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), String> {
    let raw = serde_json::to_string(value).map_err(|e| e.to_string())?;
    store.set(key, &raw)
}

// ---------------------------------------------------------------------------
// OS keyring implementation
// ---------------------------------------------------------------------------

/// Credential-store-backed implementation used on real kiosk hardware.
pub struct KeyringStore;

impl KeyValueStore for KeyringStore {
    /// Returns `None` when the entry does not exist (or the platform returns
    /// a "not found" error).
    fn get(&self, key: &str) -> Option<String> {
        let entry = match Entry::new(SERVICE_NAME, key) {
            Ok(e) => e,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to create entry");
                return None;
            }
        };
        match entry.get_password() {
            Ok(pw) => Some(pw),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key, error = %e, "keyring: failed to read entry");
                None
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
        entry.set_password(value).map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Silently succeeds if the entry does not exist.
    fn remove(&self, key: &str) -> Result<(), String> {
        let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Volatile implementation for tests and for deployments where the OS
/// credential store is unavailable.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().map_err(|e| e.to_string())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), String> {
        let mut entries = self.entries.lock().map_err(|e| e.to_string())?;
        entries.remove(key);
        Ok(())
    }
}
