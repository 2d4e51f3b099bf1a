//! Connectivity supervisor.
//!
//! A background task that periodically picks the network interface to run
//! on and tells its listeners when the network comes up, goes down, or
//! moves to a different interface. The transports themselves live in the
//! listeners; this task only decides when they should start and stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use parlor_shared::constants::{NETWORK_SLEEP_DOWN, NETWORK_SLEEP_UP};
use parlor_shared::{ErrorReporter, Settings};

use crate::config::NetworkConfig;
use crate::event::NetworkConnectionListener;
use crate::iface::{self, InterfaceInfo};
use crate::os_probe::OperatingSystemNetworkInfo;

struct WorkerInner {
    settings: Settings,
    error_reporter: Arc<dyn ErrorReporter>,
    os_network_info: OperatingSystemNetworkInfo,
    running: AtomicBool,
    network_up: AtomicBool,
    check: Notify,
    listeners: Mutex<Vec<Arc<dyn NetworkConnectionListener>>>,
    current_interface: Mutex<Option<InterfaceInfo>>,
}

impl WorkerInner {
    /// One pass of the supervision loop. Picks an interface and notifies
    /// listeners about any change. Returns whether the network is up.
    async fn update_network(&self) -> bool {
        let selected = match self.select_network_interface().await {
            Some(selected) => selected,
            None => {
                if self.is_network_up() {
                    debug!("No usable interface left, network went down");
                    self.notify_network_down(false);
                }
                return false;
            }
        };

        let current = self.current_interface();

        if !iface::same_interface(current.as_ref(), Some(&selected)) {
            let was_up = self.is_network_up();

            if was_up {
                debug!(from = ?current.as_ref().map(|i| i.name.clone()),
                       to = %selected.name, "Interface changed, restarting silently");
                self.notify_network_down(true);
            } else {
                debug!(interface = %selected.name, "Network came up");
            }

            self.set_current_interface(Some(selected));
            self.notify_network_up(was_up);
        } else if !self.is_network_up() {
            debug!(interface = %selected.name, "Network came back up");
            self.set_current_interface(Some(selected));
            self.notify_network_up(false);
        }

        true
    }

    /// Interface selection order: the interface the user chose in the
    /// settings, then the one the operating system routes multicast
    /// through, then the first usable one. Returns `None` only when no
    /// usable interface exists at all.
    async fn select_network_interface(&self) -> Option<InterfaceInfo> {
        let first_usable = iface::find_first_usable()?;

        if let Some(name) = self.settings.network_interface() {
            if let Some(saved) = iface::get_by_name(&name) {
                if saved.is_usable() {
                    return Some(saved);
                }
            }
        }

        if let Some(os_interface) = self
            .os_network_info
            .find_operating_system_interface(self.error_reporter.as_ref())
            .await
        {
            if os_interface.is_usable() {
                return Some(os_interface);
            }
        }

        Some(first_usable)
    }

    fn notify_network_up(&self, silent: bool) {
        self.network_up.store(true, Ordering::SeqCst);

        let listeners = self.listeners_snapshot();

        for listener in &listeners {
            listener.before_network_came_up();
        }

        for listener in &listeners {
            listener.network_came_up(silent);
        }
    }

    fn notify_network_down(&self, silent: bool) {
        self.network_up.store(false, Ordering::SeqCst);

        for listener in self.listeners_snapshot() {
            listener.network_went_down(silent);
        }
    }

    fn is_network_up(&self) -> bool {
        self.network_up.load(Ordering::SeqCst)
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn NetworkConnectionListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_interface(&self) -> Option<InterfaceInfo> {
        self.current_interface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_current_interface(&self, interface: Option<InterfaceInfo>) {
        *self
            .current_interface
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = interface;
    }
}

async fn run(inner: Arc<WorkerInner>) {
    debug!("Network supervisor starting");

    while inner.running.load(Ordering::SeqCst) {
        let up = inner.update_network().await;

        let sleep = if up { NETWORK_SLEEP_UP } else { NETWORK_SLEEP_DOWN };

        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = inner.check.notified() => debug!("Check requested"),
        }
    }

    if inner.is_network_up() {
        inner.notify_network_down(true);
    }

    inner.set_current_interface(None);
    debug!("Network supervisor stopped");
}

/// Owns the supervision task. Start and stop are idempotent.
pub struct ConnectionWorker {
    inner: Arc<WorkerInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionWorker {
    pub fn new(
        config: NetworkConfig,
        settings: Settings,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                os_network_info: OperatingSystemNetworkInfo::new(config, settings.clone()),
                settings,
                error_reporter,
                running: AtomicBool::new(false),
                network_up: AtomicBool::new(false),
                check: Notify::new(),
                listeners: Mutex::new(Vec::new()),
                current_interface: Mutex::new(None),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the supervision task. Must be called from within a tokio
    /// runtime.
    pub fn start(&self) {
        let mut handle = self.handle_lock();

        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Already started");
            return;
        }

        self.inner.running.store(true, Ordering::SeqCst);
        *handle = Some(tokio::spawn(run(self.inner.clone())));
    }

    /// Ask the task to stop. If the network is up the listeners get a
    /// silent shutdown notification before the task ends.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.check.notify_waiters();
    }

    /// Whether the supervision task is still running.
    pub fn is_alive(&self) -> bool {
        self.handle_lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wake the task to re-check the network right away, for example after
    /// a failed send.
    pub fn check_network(&self) {
        self.inner.check.notify_waiters();
    }

    pub fn is_network_up(&self) -> bool {
        self.inner.is_network_up()
    }

    /// The interface the network currently runs on, if any.
    pub fn current_network_interface(&self) -> Option<InterfaceInfo> {
        self.inner.current_interface()
    }

    pub fn register_network_connection_listener(
        &self,
        listener: Arc<dyn NetworkConnectionListener>,
    ) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn handle_lock(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
