//! Network addresses and ports, overridable for tests and unusual LANs.

use parlor_shared::constants;

/// Where the transports bind and send.
///
/// The defaults come from `parlor_shared::constants`. Tests rebase the
/// ports so they can run in parallel without clashing.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Multicast group for public chat and control messages
    pub chat_group: String,
    pub chat_port: u16,
    /// Multicast group for the one-shot OS-interface probe
    pub temp_group: String,
    pub temp_port: u16,
    /// Base port for the private-chat UDP receiver
    pub private_chat_port: u16,
    /// Base port for the TCP chat fallback listener
    pub tcp_chat_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chat_group: constants::NETWORK_IP.to_string(),
            chat_port: constants::NETWORK_CHAT_PORT,
            temp_group: constants::NETWORK_TEMP_IP.to_string(),
            temp_port: constants::NETWORK_TEMP_PORT,
            private_chat_port: constants::NETWORK_PRIVCHAT_PORT,
            tcp_chat_port: constants::NETWORK_TCP_CHAT_PORT,
        }
    }
}
