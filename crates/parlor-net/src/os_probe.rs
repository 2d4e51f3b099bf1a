//! Asks the operating system which interface it routes multicast through.
//!
//! Joins a throwaway multicast group with no interface pinned, sends a
//! marker message, and watches which source address the message comes back
//! from. That address belongs to the interface the OS picked, which makes
//! a good default when the user has not chosen one.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use parlor_shared::constants::{IDENTIFY_POLL_ATTEMPTS, IDENTIFY_POLL_INTERVAL};
use parlor_shared::{ErrorReporter, Settings};

use crate::config::NetworkConfig;
use crate::event::ReceiverListener;
use crate::iface::{self, InterfaceInfo};
use crate::multicast::{MulticastReceiver, MulticastSender};

/// Captures the source address of the marker message, and nothing else.
struct MarkerListener {
    marker: String,
    source: Mutex<Option<IpAddr>>,
}

impl ReceiverListener for MarkerListener {
    fn message_arrived(&self, message: &str, ip_address: IpAddr) {
        if message == self.marker {
            *self.source.lock().unwrap_or_else(PoisonError::into_inner) = Some(ip_address);
        }
    }
}

impl MarkerListener {
    fn source(&self) -> Option<IpAddr> {
        *self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One-shot probe for the operating system's preferred multicast interface.
pub struct OperatingSystemNetworkInfo {
    config: NetworkConfig,
    settings: Settings,
}

impl OperatingSystemNetworkInfo {
    pub fn new(config: NetworkConfig, settings: Settings) -> Self {
        Self { config, settings }
    }

    /// Run the probe. Returns the interface the loopback marker arrived
    /// on, or `None` if it never came back or the address maps to no
    /// usable interface. All probe sockets are closed before returning.
    pub async fn find_operating_system_interface(
        &self,
        error_reporter: &dyn ErrorReporter,
    ) -> Option<InterfaceInfo> {
        let marker = format!(
            "operatingSystemNetworkInterface({})",
            self.settings.me().code()
        );

        let listener = Arc::new(MarkerListener {
            marker: marker.clone(),
            source: Mutex::new(None),
        });

        let receiver = MulticastReceiver::new(
            &self.config.temp_group,
            self.config.temp_port,
            error_reporter,
        )
        .ok()?;
        let sender = MulticastSender::new(
            &self.config.temp_group,
            self.config.temp_port,
            error_reporter,
        )
        .ok()?;

        receiver.register_listener(listener.clone());

        if !receiver.start(None) || !sender.start(None) {
            receiver.stop();
            sender.stop();
            return None;
        }

        sender.send(&marker).await;

        let source = wait_for_marker(&listener).await;

        sender.stop();
        receiver.stop();

        let source = source?;
        debug!(source = %source, "Marker came back");

        match source {
            IpAddr::V4(ipv4) => iface::find_by_ipv4(ipv4),
            IpAddr::V6(_) => None,
        }
    }
}

async fn wait_for_marker(listener: &MarkerListener) -> Option<IpAddr> {
    for _ in 0..IDENTIFY_POLL_ATTEMPTS {
        if let Some(source) = listener.source() {
            return Some(source);
        }

        tokio::time::sleep(IDENTIFY_POLL_INTERVAL).await;
    }

    debug!("Marker never came back");
    listener.source()
}
