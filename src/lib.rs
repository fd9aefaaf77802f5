//! Vendkiosk — headless core for an unattended vending/self-checkout kiosk.
//!
//! Covers employee sessions, the product catalog, the cart, the payment
//! hand-off, and the background polling loop that fetches remote tasks
//! (inventory refresh, image/config refresh, screenshot capture+upload,
//! robot command forwarding). Screens, navigation, and the native capture
//! module are external collaborators: the UI shell wires stores and the
//! poller together and feeds lifecycle/authentication events in.

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod payment;
pub mod poller;
pub mod session;
pub mod storage;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use api::{ApiClient, ApiError, KioskApi};
pub use cart::{Cart, CartItem, CartStore};
pub use catalog::{Category, Product, ProductStore};
pub use config::{Config, ConfigStore, Environment};
pub use payment::{begin_payment, cancel_order, OrderDraft, OrderLine};
pub use poller::{AppLifecycle, Poller, PollerSettings, PollingSnapshot};
pub use session::{auto_login, login, logout, AutoLogin, Session, SessionStore};
pub use storage::{KeyValueStore, KeyringStore, MemoryStore};
pub use tasks::{ScreenCapturer, TaskBundle};

/// Initialise logging: env-filtered console output plus a daily-rolling JSON
/// file in `log_dir`. Call once at process start.
pub fn init_logging(log_dir: &std::path::Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vendkiosk=debug"));

    let file_appender = tracing_appender::rolling::daily(log_dir, "kiosk");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true);
    let file_layer = fmt::layer().json().with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive for the lifetime of the app — dropping it flushes
    // logs. We leak it intentionally since the app runs until process exit.
    std::mem::forget(guard);

    info!("vendkiosk core v{} started", env!("CARGO_PKG_VERSION"));
}
