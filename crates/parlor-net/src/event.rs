//! Listener contracts between the transports and the layers above them.

use std::net::IpAddr;

use parlor_shared::types::User;

/// Receives raw wire lines from a transport's receive loop.
pub trait ReceiverListener: Send + Sync {
    fn message_arrived(&self, message: &str, ip_address: IpAddr);
}

/// Receives raw wire lines from the TCP chat transport, together with the
/// already-identified user the connection belongs to.
pub trait TcpReceiverListener: Send + Sync {
    fn tcp_message_arrived(&self, message: &str, ip_address: IpAddr, user: &User);
}

/// Notified by the connectivity supervisor when the network comes and goes.
///
/// Listeners are called in registration order, synchronously on the
/// supervisor's own task, so they should not block for long. `silent` means
/// the change should not be announced to the user.
pub trait NetworkConnectionListener: Send + Sync {
    /// The network is about to come up; transports are not started yet.
    fn before_network_came_up(&self);

    /// The network came up and the transports are expected to start.
    fn network_came_up(&self, silent: bool);

    /// The network went down and the transports are expected to stop.
    fn network_went_down(&self, silent: bool);
}

/// Lookup into the peer registry owned by the controller layer.
///
/// The core only reads snapshots; mutation happens on the responder path
/// outside this crate.
pub trait UserRegistry: Send + Sync {
    /// A snapshot of the user with the given code, if known.
    fn user_by_code(&self, code: i32) -> Option<User>;

    /// Whether the code belongs to nobody we know yet.
    fn is_new_user(&self, code: i32) -> bool {
        self.user_by_code(code).is_none()
    }
}
