//! Drops the second copy of messages that arrive on two transports.
//!
//! TCP-capable clients send every chat message over both multicast and
//! their TCP connections. The rule for picking a copy is fixed: when the
//! sender is known to be TCP-capable the TCP copy wins and the multicast
//! copy is dropped; everything else is forwarded as it arrives. Forwarded
//! messages are routed to the private-chat listener when they look like a
//! private message, and to the main-chat listener otherwise.

use std::net::IpAddr;
use std::sync::{Arc, PoisonError, RwLock};

use regex::Regex;
use tracing::{debug, warn};

use parlor_shared::types::User;
use parlor_shared::{Settings, WireMessage};

use crate::event::{ReceiverListener, TcpReceiverListener, UserRegistry};

type ListenerSlot = RwLock<Option<Arc<dyn ReceiverListener>>>;

pub struct MessageDeduplicator {
    settings: Settings,
    registry: RwLock<Option<Arc<dyn UserRegistry>>>,
    main_chat: ListenerSlot,
    private_chat: ListenerSlot,
    private_message: Regex,
}

impl MessageDeduplicator {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: RwLock::new(None),
            main_chat: RwLock::new(None),
            private_chat: RwLock::new(None),
            // Infallible: the pattern is a literal.
            private_message: Regex::new(r"^(\d+)!(PRIVMSG)#.+").unwrap_or_else(|e| panic!("{e}")),
        }
    }

    pub fn register_user_registry(&self, registry: Arc<dyn UserRegistry>) {
        *self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(registry);
    }

    pub fn register_main_chat_listener(&self, listener: Arc<dyn ReceiverListener>) {
        *self
            .main_chat
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn register_private_chat_listener(&self, listener: Arc<dyn ReceiverListener>) {
        *self
            .private_chat
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn forward(&self, message: &str, ip_address: IpAddr) {
        let slot = if self.private_message.is_match(message) {
            &self.private_chat
        } else {
            &self.main_chat
        };

        let listener = slot.read().unwrap_or_else(PoisonError::into_inner).clone();

        if let Some(listener) = listener {
            listener.message_arrived(message, ip_address);
        }
    }

    fn user_by_code(&self, code: i32) -> Option<User> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|registry| registry.user_by_code(code))
    }
}

/// Multicast and unicast UDP arrivals.
impl ReceiverListener for MessageDeduplicator {
    fn message_arrived(&self, message: &str, ip_address: IpAddr) {
        let code = match WireMessage::parse_sender_code(message) {
            Some(code) => code,
            None => {
                // Not for us to reject; the parser handles malformed lines.
                warn!(message = %message, "No sender code, forwarding as-is");
                self.forward(message, ip_address);
                return;
            }
        };

        if code == self.settings.me().code() {
            self.forward(message, ip_address);
            return;
        }

        match self.user_by_code(code) {
            Some(user) if user.tcp_enabled => {
                debug!(code, "Dropping multicast copy, the connection delivers this one");
            }
            _ => {
                debug!(code, "Multicast message");
                self.forward(message, ip_address);
            }
        }
    }
}

/// TCP arrivals. The user comes pre-identified from the connection.
impl TcpReceiverListener for MessageDeduplicator {
    fn tcp_message_arrived(&self, message: &str, ip_address: IpAddr, user: &User) {
        if user.tcp_enabled {
            debug!(code = user.code(), "Message from connection");
            self.forward(message, ip_address);
        } else {
            debug!(code = user.code(), "Dropping message, user is not known to use connections");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectingListener {
        messages: Arc<Mutex<Vec<String>>>,
    }

    impl ReceiverListener for CollectingListener {
        fn message_arrived(&self, message: &str, _ip_address: IpAddr) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    struct MapRegistry {
        users: Vec<User>,
    }

    impl UserRegistry for MapRegistry {
        fn user_by_code(&self, code: i32) -> Option<User> {
            self.users.iter().find(|u| u.code() == code).cloned()
        }
    }

    fn ip() -> IpAddr {
        "192.168.1.4".parse().unwrap()
    }

    struct Fixture {
        dedup: MessageDeduplicator,
        settings: Settings,
        main: Arc<Mutex<Vec<String>>>,
        private: Arc<Mutex<Vec<String>>>,
    }

    fn fixture(users: Vec<User>) -> Fixture {
        let settings = Settings::new("Tester");
        let dedup = MessageDeduplicator::new(settings.clone());

        let main = Arc::new(Mutex::new(Vec::new()));
        let private = Arc::new(Mutex::new(Vec::new()));

        dedup.register_main_chat_listener(Arc::new(CollectingListener {
            messages: main.clone(),
        }));
        dedup.register_private_chat_listener(Arc::new(CollectingListener {
            messages: private.clone(),
        }));
        dedup.register_user_registry(Arc::new(MapRegistry { users }));

        Fixture {
            dedup,
            settings,
            main,
            private,
        }
    }

    fn tcp_user(code: i32) -> User {
        let mut user = User::new("Bob", code);
        user.tcp_enabled = true;
        user
    }

    #[test]
    fn test_multicast_from_tcp_capable_user_is_dropped() {
        let f = fixture(vec![tcp_user(12345678)]);

        f.dedup
            .message_arrived("12345678!MSG#Bob:[-15987646]hello", ip());

        assert!(f.main.lock().unwrap().is_empty());
        assert!(f.private.lock().unwrap().is_empty());
    }

    #[test]
    fn test_multicast_from_plain_user_is_forwarded() {
        let f = fixture(vec![User::new("Bob", 12345678)]);

        f.dedup
            .message_arrived("12345678!MSG#Bob:[-15987646]hello", ip());

        assert_eq!(f.main.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_multicast_from_unknown_user_is_forwarded() {
        let f = fixture(vec![]);

        f.dedup
            .message_arrived("12345678!MSG#Bob:[-15987646]hello", ip());

        assert_eq!(f.main.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_own_echo_is_forwarded() {
        let f = fixture(vec![]);
        let me = f.settings.me().code();

        f.dedup
            .message_arrived(&format!("{me}!MSG#Tester:[-15987646]hello"), ip());

        assert_eq!(f.main.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_line_without_sender_code_is_forwarded() {
        let f = fixture(vec![]);

        f.dedup.message_arrived("garbage with no code", ip());

        assert_eq!(f.main.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_tcp_arrival_forwarded_only_for_tcp_capable_user() {
        let f = fixture(vec![]);

        f.dedup
            .tcp_message_arrived("12345678!MSG#Bob:[-15987646]hi", ip(), &tcp_user(12345678));
        assert_eq!(f.main.lock().unwrap().len(), 1);

        f.dedup
            .tcp_message_arrived("87654321!MSG#Eve:[-15987646]hi", ip(), &User::new("Eve", 87654321));
        assert_eq!(f.main.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_forwarding_partitions_private_from_main() {
        let f = fixture(vec![]);

        for i in 0..100 {
            let message = if i % 2 == 0 {
                format!("1234567{i}!PRIVMSG#Bob:(87654321)[-15987646]private {i}")
            } else {
                format!("1234567{i}!MSG#Bob:[-15987646]public {i}")
            };
            f.dedup.message_arrived(&message, ip());
        }

        let main = f.main.lock().unwrap();
        let private = f.private.lock().unwrap();

        assert_eq!(main.len() + private.len(), 100);
        assert!(private.iter().all(|m| m.contains("!PRIVMSG#")));
        assert!(main.iter().all(|m| m.contains("!MSG#")));
        assert_eq!(private.len(), 50);
    }

    #[test]
    fn test_privmsg_without_payload_goes_to_main() {
        // The routing pattern needs at least one character after the hash.
        let f = fixture(vec![]);

        f.dedup.message_arrived("12345678!PRIVMSG#", ip());

        assert_eq!(f.main.lock().unwrap().len(), 1);
        assert!(f.private.lock().unwrap().is_empty());
    }
}
