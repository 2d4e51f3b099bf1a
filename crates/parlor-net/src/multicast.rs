//! Multicast UDP transport: a sender and a receiver sharing one group.
//!
//! Sockets are built with `socket2` so the group join, traffic class, and
//! TTL can be set on the chosen interface, then handed to tokio for the
//! async receive loop. Start and stop are critical sections per instance;
//! failures there are logged and reported as `false` so the connectivity
//! supervisor can retry on its next tick.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use parlor_shared::constants::{
    APP_NAME, IPTOS_RELIABILITY, MULTICAST_TTL, NETWORK_PACKET_SIZE,
};
use parlor_shared::{ErrorReporter, NetworkError};

use crate::event::ReceiverListener;
use crate::iface::InterfaceInfo;

/// Build a multicast UDP socket bound to the group port and joined to the
/// group on the given interface (or the OS default when none is given).
fn create_multicast_socket(
    group: Ipv4Addr,
    port: u16,
    interface: Option<Ipv4Addr>,
) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_reuse_address(true)?;
    #[cfg(not(target_os = "windows"))]
    socket.set_reuse_port(true)?;

    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;

    let local = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
    socket.join_multicast_v4(&group, &local)?;

    if interface.is_some() {
        socket.set_multicast_if_v4(&local)?;
    }

    socket.set_tos(IPTOS_RELIABILITY)?;
    socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
    socket.set_nonblocking(true)?;

    UdpSocket::from_std(socket.into())
}

fn parse_group(
    group_address: &str,
    error_reporter: &dyn ErrorReporter,
) -> Result<Ipv4Addr, NetworkError> {
    group_address.parse().map_err(|e| {
        error!(address = %group_address, error = %e, "Invalid multicast group address");
        error_reporter.show_critical_error(&format!(
            "Failed to initialize the network:\n{e}\n{APP_NAME} will now shutdown."
        ));
        NetworkError::Fatal(format!("Invalid multicast group address: {group_address}"))
    })
}

struct ConnectedSocket {
    socket: Arc<UdpSocket>,
    group: Ipv4Addr,
    joined_on: Ipv4Addr,
}

impl ConnectedSocket {
    fn leave_group(&self) {
        if let Err(e) = self.socket.leave_multicast_v4(self.group, self.joined_on) {
            warn!(error = %e, "Failed to leave multicast group");
        }
    }
}

/// Sends wire lines to the multicast group.
pub struct MulticastSender {
    group: Ipv4Addr,
    port: u16,
    connected: Mutex<Option<ConnectedSocket>>,
}

impl MulticastSender {
    /// Fails only when the group address cannot be resolved, which is the
    /// one unrecoverable startup error in the networking layer.
    pub fn new(
        group_address: &str,
        port: u16,
        error_reporter: &dyn ErrorReporter,
    ) -> Result<Self, NetworkError> {
        debug!(address = %group_address, port, "Creating multicast sender");

        Ok(Self {
            group: parse_group(group_address, error_reporter)?,
            port,
            connected: Mutex::new(None),
        })
    }

    /// Join the group on the given interface. Returns whether the sender is
    /// connected afterwards. On failure the socket is cleared and the
    /// caller retries through the supervisor.
    pub fn start(&self, interface: Option<&InterfaceInfo>) -> bool {
        let mut connected = self.lock();

        if connected.is_some() {
            debug!("Already connected");
            return true;
        }

        let joined_on = interface.and_then(InterfaceInfo::first_ipv4);

        match create_multicast_socket(self.group, self.port, joined_on) {
            Ok(socket) => {
                debug!(group = %self.group, port = self.port, interface = ?joined_on,
                       "Multicast sender connected");
                *connected = Some(ConnectedSocket {
                    socket: Arc::new(socket),
                    group: self.group,
                    joined_on: joined_on.unwrap_or(Ipv4Addr::UNSPECIFIED),
                });
                true
            }
            Err(e) => {
                error!(error = %e, "Could not start multicast sender");
                false
            }
        }
    }

    pub fn stop(&self) {
        let mut connected = self.lock();

        match connected.take() {
            Some(socket) => {
                socket.leave_group();
                debug!(group = %self.group, port = self.port, "Multicast sender disconnected");
            }
            None => debug!("Not connected"),
        }
    }

    /// Send one message to the group. A no-op returning `false` while
    /// disconnected. An oversized message is still attempted, at the risk
    /// of truncation on the receiving side.
    pub async fn send(&self, message: &str) -> bool {
        let socket = match self.lock().as_ref() {
            Some(connected) => connected.socket.clone(),
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

        match socket
            .send_to(encoded, SocketAddrV4::new(self.group, self.port))
            .await
        {
            Ok(_) => {
                debug!(message = %message, "Sent message");
                true
            }
            Err(e) => {
                warn!(error = %e, message = %message, "Could not send message");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ConnectedSocket>> {
        self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Receives wire lines from the multicast group on a dedicated task and
/// hands them to the registered listener.
pub struct MulticastReceiver {
    group: Ipv4Addr,
    port: u16,
    listener: RwLock<Option<Arc<dyn ReceiverListener>>>,
    connected: Mutex<Option<(ConnectedSocket, watch::Sender<()>)>>,
}

impl MulticastReceiver {
    pub fn new(
        group_address: &str,
        port: u16,
        error_reporter: &dyn ErrorReporter,
    ) -> Result<Self, NetworkError> {
        debug!(address = %group_address, port, "Creating multicast receiver");

        Ok(Self {
            group: parse_group(group_address, error_reporter)?,
            port,
            listener: RwLock::new(None),
            connected: Mutex::new(None),
        })
    }

    pub fn register_listener(&self, listener: Arc<dyn ReceiverListener>) {
        *self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    /// Join the group and start the receive loop. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, interface: Option<&InterfaceInfo>) -> bool {
        let mut connected = self.lock();

        if connected.is_some() {
            debug!("Already connected");
            return true;
        }

        let joined_on = interface.and_then(InterfaceInfo::first_ipv4);

        let socket = match create_multicast_socket(self.group, self.port, joined_on) {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                error!(error = %e, "Could not start multicast receiver");
                return false;
            }
        };

        debug!(group = %self.group, port = self.port, interface = ?joined_on,
               "Multicast receiver connected");

        // One stop channel per start, consumed by this loop only. The
        // signal holds even if the loop has not been polled yet.
        let (stop_tx, stop_rx) = watch::channel(());

        *connected = Some((
            ConnectedSocket {
                socket: socket.clone(),
                group: self.group,
                joined_on: joined_on.unwrap_or(Ipv4Addr::UNSPECIFIED),
            },
            stop_tx,
        ));

        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        tokio::spawn(receive_loop(socket, listener, stop_rx));

        true
    }

    /// Leave the group and end the receive loop.
    pub fn stop(&self) {
        let mut connected = self.lock();

        match connected.take() {
            Some((socket, stop)) => {
                let _ = stop.send(());
                socket.leave_group();
                debug!(group = %self.group, port = self.port, "Multicast receiver disconnected");
            }
            None => debug!("Not connected"),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<(ConnectedSocket, watch::Sender<()>)>> {
        self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Blocks on the socket until data arrives or stop is signalled. Ends
/// only through the stop signal; a receive error while running is
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
