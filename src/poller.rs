//! Background polling loop.
//!
//! The poller is an explicit two-state machine (`Stopped`/`Running`) driven
//! by two inputs: session authentication and app lifecycle. It runs while
//! the session is authenticated AND the app is in the foreground. While
//! running it fetches the task bundle on a fixed cadence and dispatches the
//! flagged task handlers in a fixed order.
//!
//! Three rules shape every cycle:
//! - single-flight: a tick that fires while the previous cycle's async work
//!   is still in flight is skipped, not queued;
//! - error budget: once the consecutive bundle-fetch failure count reaches
//!   the configured maximum, cycles are suppressed entirely (no network)
//!   until the counter is reset externally;
//! - handler isolation: a handler failure is logged and swallowed; it never
//!   aborts sibling handlers in the same cycle and never touches the poll
//!   error counter. Only a failed bundle fetch does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::KioskApi;
use crate::catalog::ProductStore;
use crate::config::ConfigStore;
use crate::session::SessionStore;
use crate::tasks::{self, ScreenCapturer, TaskBundle};

/// Default cadence between poll cycles.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Default consecutive bundle-fetch failures before polling is suppressed.
const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    pub max_consecutive_errors: u32,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

/// App foreground/background state as reported by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Foreground,
    Background,
}

/// Read-only view of the polling state.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingSnapshot {
    pub is_running: bool,
    pub is_authenticated: bool,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct PollState {
    is_authenticated: bool,
    lifecycle: AppLifecycle,
    last_poll_time: Option<DateTime<Utc>>,
    error_count: u32,
    last_error: Option<String>,
}

impl PollState {
    fn reset_counters(&mut self) {
        self.last_poll_time = None;
        self.error_count = 0;
        self.last_error = None;
    }
}

/// Handle to one spawned loop generation. The stop flag belongs to this
/// generation only, so a restart can never resurrect a stopped loop.
struct LoopTask {
    stop: Arc<AtomicBool>,
    _handle: JoinHandle<()>,
}

/// Releases the single-flight guard on every exit path of a cycle.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Poller<A: KioskApi + 'static> {
    api: Arc<A>,
    sessions: Arc<SessionStore>,
    products: Arc<ProductStore>,
    config: Arc<ConfigStore>,
    settings: PollerSettings,
    state: Mutex<PollState>,
    in_flight: AtomicBool,
    capturer: Mutex<Option<Arc<dyn ScreenCapturer>>>,
    loop_task: Mutex<Option<LoopTask>>,
    me: Weak<Self>,
}

impl<A: KioskApi + 'static> Poller<A> {
    pub fn new(
        api: Arc<A>,
        sessions: Arc<SessionStore>,
        products: Arc<ProductStore>,
        config: Arc<ConfigStore>,
        settings: PollerSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            api,
            sessions,
            products,
            config,
            settings,
            state: Mutex::new(PollState {
                is_authenticated: false,
                // The shell reports lifecycle changes; until the first
                // report the app is starting up in the foreground.
                lifecycle: AppLifecycle::Foreground,
                last_poll_time: None,
                error_count: 0,
                last_error: None,
            }),
            in_flight: AtomicBool::new(false),
            capturer: Mutex::new(None),
            loop_task: Mutex::new(None),
            me: me.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Capability registration
    // -----------------------------------------------------------------------

    /// Register the capture capability of the currently active UI surface.
    pub fn register_capturer(&self, capturer: Arc<dyn ScreenCapturer>) {
        let mut guard = self.capturer.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(capturer);
    }

    /// Clear the capture capability (screen going away).
    pub fn clear_capturer(&self) {
        let mut guard = self.capturer.lock().unwrap_or_else(|e| e.into_inner());
        *guard = None;
    }

    // -----------------------------------------------------------------------
    // State machine inputs
    // -----------------------------------------------------------------------

    /// Session authentication changed. Losing authentication stops the loop
    /// and resets the poll counters to their initial values.
    pub fn set_authenticated(&self, authenticated: bool) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.is_authenticated = authenticated;
            if !authenticated {
                state.reset_counters();
            }
        }
        self.evaluate();
    }

    /// App moved between foreground and background.
    pub fn set_lifecycle(&self, lifecycle: AppLifecycle) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.lifecycle = lifecycle;
        }
        self.evaluate();
    }

    /// External reset of the error budget (e.g. a successful manual action
    /// in the settings screen). The next tick may poll again.
    pub fn reset_error_budget(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.error_count = 0;
        state.last_error = None;
    }

    pub fn is_running(&self) -> bool {
        self.loop_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn snapshot(&self) -> PollingSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        PollingSnapshot {
            is_running: self.is_running(),
            is_authenticated: state.is_authenticated,
            last_poll_time: state.last_poll_time,
            error_count: state.error_count,
            last_error: state.last_error.clone(),
        }
    }

    /// Decide Stopped/Running from the current inputs.
    fn evaluate(&self) {
        let should_run = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.is_authenticated && state.lifecycle == AppLifecycle::Foreground
        };
        if should_run {
            self.start_loop();
        } else {
            self.stop_loop();
        }
    }

    // -----------------------------------------------------------------------
    // Timer lifecycle
    // -----------------------------------------------------------------------

    /// Spawn the repeating loop: one immediate cycle, then the fixed
    /// interval. Starting while already running is a no-op.
    fn start_loop(&self) {
        let mut guard = self.loop_task.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return;
        }
        let Some(poller) = self.me.upgrade() else {
            return;
        };

        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_task = stop.clone();
        let interval = self.settings.interval;

        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "polling loop started");
            loop {
                if stop_for_task.load(Ordering::SeqCst) {
                    break;
                }
                poller.run_cycle(&stop_for_task).await;

                tokio::time::sleep(interval).await;
            }
            info!("polling loop stopped");
        });

        *guard = Some(LoopTask {
            stop,
            _handle: handle,
        });
    }

    /// Cancel the schedule. An in-flight cycle is not aborted: it runs to
    /// completion, but its final record is dropped (see `run_cycle`) and the
    /// next tick never fires. Stopping while stopped is a no-op.
    fn stop_loop(&self) {
        let mut guard = self.loop_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = guard.take() {
            task.stop.store(true, Ordering::SeqCst);
        }
    }

    // -----------------------------------------------------------------------
    // Poll cycle
    // -----------------------------------------------------------------------

    /// Run one poll cycle outside the schedule (manual trigger in tests and
    /// diagnostics). Subject to the same single-flight and error-budget
    /// rules as a scheduled tick.
    pub async fn poll_once(&self) {
        let generation = AtomicBool::new(false);
        self.run_cycle(&generation).await;
    }

    async fn run_cycle(&self, generation: &AtomicBool) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("previous poll cycle still in flight; tick skipped");
            return;
        }
        let _guard = InFlightGuard(&self.in_flight);

        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.error_count >= self.settings.max_consecutive_errors {
                debug!(
                    error_count = state.error_count,
                    "error budget exhausted; poll suppressed"
                );
                return;
            }
        }

        match self.api.fetch_tasks().await {
            Ok(bundle) => {
                self.dispatch(&bundle).await;
                self.record_success(generation);
            }
            Err(e) => {
                self.record_failure(generation, e.to_string());
            }
        }
    }

    /// Dispatch flagged handlers in fixed order: inventory → image →
    /// screenshot → request. Sequential but isolated: each failure is
    /// logged and the next handler still runs.
    async fn dispatch(&self, bundle: &TaskBundle) {
        if bundle.inventory.as_ref().is_some_and(|t| t.status) {
            if let Err(e) =
                tasks::refresh_inventory(self.api.as_ref(), &self.sessions, &self.products).await
            {
                warn!(error = %e, "inventory refresh failed");
            }
        }

        if bundle.get_image.as_ref().is_some_and(|t| t.status) {
            if let Err(e) =
                tasks::refresh_image_config(self.api.as_ref(), &self.sessions, &self.config).await
            {
                warn!(error = %e, "image config refresh failed");
            }
        }

        if bundle.screenshot.as_ref().is_some_and(|t| t.status) {
            let capturer = self
                .capturer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            if let Err(e) = tasks::capture_and_upload_screenshot(
                self.api.as_ref(),
                &self.sessions,
                capturer.as_deref(),
            )
            .await
            {
                warn!(error = %e, "screenshot task failed");
            }
        }

        if let Some(request) = bundle.request.as_ref().filter(|t| t.status) {
            if let Err(e) =
                tasks::forward_robot_command(self.api.as_ref(), &self.config, request).await
            {
                warn!(error = %e, "robot command forward failed");
            }
        }
    }

    /// Record a successful poll: counter reset, timestamp updated. A cycle
    /// whose loop generation was stopped mid-flight drops its record so a
    /// lifecycle reset cannot be clobbered by a straggler.
    fn record_success(&self, generation: &AtomicBool) {
        if generation.load(Ordering::SeqCst) {
            debug!("poll cycle outlived its loop; result dropped");
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.error_count = 0;
        state.last_error = None;
        state.last_poll_time = Some(Utc::now());
    }

    fn record_failure(&self, generation: &AtomicBool, message: String) {
        if generation.load(Ordering::SeqCst) {
            debug!("poll cycle outlived its loop; result dropped");
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.error_count += 1;
        state.last_error = Some(message.clone());
        warn!(
            error_count = state.error_count,
            error = %message,
            "task bundle fetch failed"
        );
    }
}
