use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Parlor";

/// Multicast group for public chat and control traffic
pub const NETWORK_IP: &str = "224.168.5.200";

/// Multicast group for the one-shot OS-interface probe
pub const NETWORK_TEMP_IP: &str = "224.168.5.250";

/// Port for the main chat multicast group
pub const NETWORK_CHAT_PORT: u16 = 40556;

/// Base port for the private-chat UDP receiver
pub const NETWORK_PRIVCHAT_PORT: u16 = 40656;

/// Base port for the TCP chat fallback listener
pub const NETWORK_TCP_CHAT_PORT: u16 = 40656;

/// Port for the OS-interface probe group
pub const NETWORK_TEMP_PORT: u16 = 50050;

/// Base port for file-transfer server sockets
pub const NETWORK_FILE_TRANSFER_PORT: u16 = 40756;

/// Maximum size of a datagram payload in bytes. Larger messages are sent
/// anyway, at the risk of truncation on the receiving side.
pub const NETWORK_PACKET_SIZE: usize = 512;

/// How many consecutive ports to try when the base port is taken
pub const PORT_BIND_ATTEMPTS: u16 = 50;

/// Maximum length of a nickname
pub const NICK_MAX_LENGTH: usize = 10;

/// IP type-of-service hint asking for reliable delivery
pub const IPTOS_RELIABILITY: u32 = 0x04;

/// Multicast time-to-live. Keeps chat traffic from crossing routers.
pub const MULTICAST_TTL: u32 = 64;

/// How many times the file sender retries connecting to the receiver
pub const FILE_CONNECT_ATTEMPTS: u32 = 10;

/// Delay between file-sender connect attempts
pub const FILE_CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// How long the file receiver waits for the sender before closing its
/// server socket. Hand-tuned, kept configurable through the transfer API.
pub const FILE_ACCEPT_TIMEOUT: Duration = Duration::from_secs(15);

/// Buffer size for file-transfer byte copying
pub const FILE_TRANSFER_BUFFER_SIZE: usize = 1024;

/// Interval between polls while waiting for an unknown user to identify
pub const IDENTIFY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Number of identify polls before giving up (bounds the wait at 2 seconds)
pub const IDENTIFY_POLL_ATTEMPTS: u32 = 40;

/// Supervisor poll interval while the network is up
pub const NETWORK_SLEEP_UP: Duration = Duration::from_secs(60);

/// Supervisor poll interval while the network is down
pub const NETWORK_SLEEP_DOWN: Duration = Duration::from_secs(15);
