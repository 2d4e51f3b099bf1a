//! Networking core: connectivity supervision, multicast and unicast
//! transports, message deduplication, and the parser/responder pipeline.

pub mod config;
pub mod connection;
pub mod dedup;
pub mod event;
pub mod iface;
pub mod messages;
pub mod multicast;
pub mod os_probe;
pub mod parser;
pub mod private;
pub mod responder;
pub mod service;
pub mod tcp;
pub mod udp;

pub use config::NetworkConfig;
pub use connection::ConnectionWorker;
pub use dedup::MessageDeduplicator;
pub use event::{NetworkConnectionListener, ReceiverListener, TcpReceiverListener, UserRegistry};
pub use iface::InterfaceInfo;
pub use messages::NetworkMessages;
pub use multicast::{MulticastReceiver, MulticastSender};
pub use parser::{MessageParser, MessageResponder};
pub use private::{PrivateMessageParser, PrivateMessageResponder};
pub use responder::{AsyncMessageResponderWrapper, IdentifyRequester};
pub use service::NetworkService;
pub use tcp::TcpChatService;
pub use udp::{UdpReceiver, UdpSender};
