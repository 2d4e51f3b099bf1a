//! Point-to-point UDP transport for private chat.
//!
//! The receiver binds the first free port in a window above the base
//! private chat port and publishes the chosen port on the application
//! user, so other clients learn it from the CLIENT message. The sender
//! uses an ephemeral port and targets whatever port the peer advertised.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use parlor_shared::constants::{NETWORK_PACKET_SIZE, PORT_BIND_ATTEMPTS};
use parlor_shared::{ErrorReporter, Settings};

use crate::event::ReceiverListener;

fn bind_nonblocking(port: u16) -> std::io::Result<UdpSocket> {
    let socket = std::net::UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket)
}

/// Listens for private chat messages on this client's advertised UDP port.
pub struct UdpReceiver {
    settings: Settings,
    error_reporter: Arc<dyn ErrorReporter>,
    listener: RwLock<Option<Arc<dyn ReceiverListener>>>,
    socket: Mutex<Option<(Arc<UdpSocket>, watch::Sender<()>)>>,
}

impl UdpReceiver {
    pub fn new(settings: Settings, error_reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            settings,
            error_reporter,
            listener: RwLock::new(None),
            socket: Mutex::new(None),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn ReceiverListener>) {
        *self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Bind the first free port in `[base_port, base_port + 50)` and start
    /// the receive loop. The chosen port is stored on the application user
    /// so it gets advertised to the other clients. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, base_port: u16) -> bool {
        let mut slot = self.lock();

        if slot.is_some() {
            debug!("Already started");
            return true;
        }

        for port in base_port..base_port + PORT_BIND_ATTEMPTS {
            match bind_nonblocking(port) {
                Ok(socket) => {
                    debug!(port, "UDP receiver started");

                    self.settings.me().write().private_chat_port = port;

                    let socket = Arc::new(socket);

                    // One stop channel per start, consumed by this loop
                    // only. The signal holds even if the loop has not
                    // been polled yet.
                    let (stop_tx, stop_rx) = watch::channel(());
                    *slot = Some((socket.clone(), stop_tx));

                    let listener = self
                        .listener
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();

                    tokio::spawn(receive_loop(socket, listener, stop_rx));

                    return true;
                }
                Err(e) => debug!(port, error = %e, "Port taken, trying next"),
            }
        }

        error!(base_port, "No available UDP port found");
        self.error_reporter
            .show_error("Failed to initialize udp network listener.");

        false
    }

    pub fn stop(&self) {
        let mut slot = self.lock();

        if let Some((_, stop)) = slot.take() {
            let _ = stop.send(());
            self.settings.me().write().private_chat_port = 0;
            debug!("UDP receiver stopped");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(Arc<UdpSocket>, watch::Sender<()>)>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ends only through the stop signal. A receive error while running is
/// logged and the loop keeps going.
async fn receive_loop(
    socket: Arc<UdpSocket>,
    listener: Option<Arc<dyn ReceiverListener>>,
    mut shutdown: watch::Receiver<()>,
) {
    let mut buffer = [0u8; NETWORK_PACKET_SIZE];

    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            result = socket.recv_from(&mut buffer) => match result {
                Ok((size, from)) => {
                    let message = String::from_utf8_lossy(&buffer[..size])
                        .trim_end_matches('\0')
                        .trim()
                        .to_string();
                    let ip = from.ip();

                    debug!(from = %ip, message = %message, "Message arrived");

                    if let Some(listener) = &listener {
                        listener.message_arrived(&message, ip);
                    }
                }
                Err(e) => warn!(error = %e, "Receive failed"),
            }
        }
    }

    debug!("Receive loop ended");
}

/// Sends private chat messages straight to a peer's advertised UDP port.
pub struct UdpSender {
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl UdpSender {
    pub fn new() -> Self {
        Self {
            socket: Mutex::new(None),
        }
    }

    /// Bind an ephemeral port for outgoing messages. Must be called from
    /// within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut slot = self.lock();

        if slot.is_some() {
            debug!("Already started");
            return true;
        }

        match bind_nonblocking(0) {
            Ok(socket) => {
                debug!("UDP sender started");
                *slot = Some(Arc::new(socket));
                true
            }
            Err(e) => {
                error!(error = %e, "Could not start UDP sender");
                false
            }
        }
    }

    pub fn stop(&self) {
        if self.lock().take().is_some() {
            debug!("UDP sender stopped");
        }
    }

    /// Send one message to the given peer. Returns whether the message was
    /// handed to the socket.
    pub async fn send(&self, message: &str, ip_address: IpAddr, port: u16) -> bool {
        let socket = match self.lock().as_ref() {
            Some(socket) => socket.clone(),
            None => return false,
        };

        let encoded = message.as_bytes();

        if encoded.len() > NETWORK_PACKET_SIZE {
            warn!(
                size = encoded.len(),
                message = %message,
                "Message too large, the receiver might not get all of it"
            );
        }

        match socket.send_to(encoded, SocketAddr::new(ip_address, port)).await {
            Ok(_) => {
                debug!(to = %ip_address, port, message = %message, "Sent message");
                true
            }
            Err(e) => {
                warn!(error = %e, to = %ip_address, port, message = %message,
                      "Could not send message");
                false
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<UdpSocket>>> {
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for UdpSender {
    fn default() -> Self {
        Self::new()
    }
}
