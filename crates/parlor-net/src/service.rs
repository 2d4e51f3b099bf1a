//! The networking facade.
//!
//! Owns the connectivity supervisor, all the transports, and the
//! deduplicator, and wires them together. As a connection listener it
//! starts the transports when the supervisor reports the network up and
//! stops them when it goes down. Everything above this type talks in wire
//! lines and listener callbacks, never in sockets.

use std::sync::Arc;

use tracing::debug;

use parlor_shared::types::User;
use parlor_shared::{ErrorReporter, NetworkError, Settings};

use crate::config::NetworkConfig;
use crate::connection::ConnectionWorker;
use crate::dedup::MessageDeduplicator;
use crate::event::{
    NetworkConnectionListener, ReceiverListener, TcpReceiverListener, UserRegistry,
};
use crate::iface::InterfaceInfo;
use crate::multicast::{MulticastReceiver, MulticastSender};
use crate::tcp::TcpChatService;
use crate::udp::{UdpReceiver, UdpSender};

pub struct NetworkService {
    config: NetworkConfig,
    settings: Settings,
    connection_worker: ConnectionWorker,
    multicast_sender: MulticastSender,
    multicast_receiver: MulticastReceiver,
    udp_sender: UdpSender,
    udp_receiver: UdpReceiver,
    tcp_service: TcpChatService,
    dedup: Arc<MessageDeduplicator>,
}

impl NetworkService {
    /// Build the whole networking stack and register the service with its
    /// own supervisor. Fails only when the configured multicast group
    /// address is invalid.
    pub fn new(
        config: NetworkConfig,
        settings: Settings,
        error_reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Arc<Self>, NetworkError> {
        debug!("Initializing network");

        let multicast_sender = MulticastSender::new(
            &config.chat_group,
            config.chat_port,
            error_reporter.as_ref(),
        )?;
        let multicast_receiver = MulticastReceiver::new(
            &config.chat_group,
            config.chat_port,
            error_reporter.as_ref(),
        )?;

        let service = Arc::new(Self {
            connection_worker: ConnectionWorker::new(
                config.clone(),
                settings.clone(),
                error_reporter.clone(),
            ),
            multicast_sender,
            multicast_receiver,
            udp_sender: UdpSender::new(),
            udp_receiver: UdpReceiver::new(settings.clone(), error_reporter),
            tcp_service: TcpChatService::new(settings.clone()),
            dedup: Arc::new(MessageDeduplicator::new(settings.clone())),
            config,
            settings,
        });

        service
            .connection_worker
            .register_network_connection_listener(service.clone());

        Ok(service)
    }

    /// Start looking for the network. The transports come up through the
    /// listener callbacks once an interface is found.
    pub fn connect(&self) {
        self.connection_worker.start();
    }

    pub fn disconnect(&self) {
        self.connection_worker.stop();
    }

    /// Ask the supervisor to re-check the network right away.
    pub fn check_network(&self) {
        self.connection_worker.check_network();
    }

    pub fn is_network_up(&self) -> bool {
        self.connection_worker.is_network_up()
    }

    pub fn is_connection_worker_alive(&self) -> bool {
        self.connection_worker.is_alive()
    }

    pub fn current_network_interface(&self) -> Option<InterfaceInfo> {
        self.connection_worker.current_network_interface()
    }

    pub fn register_network_connection_listener(
        &self,
        listener: Arc<dyn NetworkConnectionListener>,
    ) {
        self.connection_worker
            .register_network_connection_listener(listener);
    }

    /// The registry the deduplicator and the TCP transport use to look up
    /// users by code.
    pub fn register_user_registry(&self, registry: Arc<dyn UserRegistry>) {
        self.dedup.register_user_registry(registry.clone());
        self.tcp_service.register_user_registry(registry);
    }

    /// Wire the main chat: multicast and TCP arrivals go through the
    /// deduplicator and end up at the given listener.
    pub fn register_main_chat_listener(&self, listener: Arc<dyn ReceiverListener>) {
        self.dedup.register_main_chat_listener(listener);
        self.multicast_receiver
            .register_listener(self.dedup.clone() as Arc<dyn ReceiverListener>);
        self.tcp_service
            .register_listener(self.dedup.clone() as Arc<dyn TcpReceiverListener>);
    }

    /// Wire the private chat: unicast UDP arrivals go through the
    /// deduplicator and end up at the given listener.
    pub fn register_private_chat_listener(&self, listener: Arc<dyn ReceiverListener>) {
        self.dedup.register_private_chat_listener(listener);
        self.udp_receiver
            .register_listener(self.dedup.clone() as Arc<dyn ReceiverListener>);
    }

    /// Send a main chat line to everyone, over every transport we have.
    /// Returns whether the multicast copy went out, since that is the one
    /// every client receives.
    pub async fn send_message_to_all_users(&self, message: &str) -> bool {
        self.tcp_service.send_to_all(message).await;
        self.multicast_sender.send(message).await
    }

    /// Send a private line to one user, preferring the TCP connection and
    /// falling back to the user's advertised UDP port.
    pub async fn send_message_to_user(&self, message: &str, user: &User) -> bool {
        if self.tcp_service.send_to_user(message, user).await {
            return true;
        }

        match (user.ip_address, user.private_chat_port) {
            (Some(ip), port) if port > 0 => self.udp_sender.send(message, ip, port).await,
            _ => {
                debug!(code = user.code(), "User has no reachable private chat port");
                false
            }
        }
    }
}

impl NetworkConnectionListener for NetworkService {
    fn before_network_came_up(&self) {
        debug!("Network is about to come up");
    }

    fn network_came_up(&self, _silent: bool) {
        let interface = self.connection_worker.current_network_interface();

        debug!(interface = ?interface.as_ref().map(|i| i.name.clone()), "Network came up");

        self.multicast_receiver.start(interface.as_ref());
        self.multicast_sender.start(interface.as_ref());

        if !self.settings.is_no_private_chat() {
            self.udp_receiver.start(self.config.private_chat_port);
            self.udp_sender.start();
        }

        self.tcp_service.start(self.config.tcp_chat_port);
    }

    fn network_went_down(&self, _silent: bool) {
        debug!("Network went down");

        self.tcp_service.stop();
        self.udp_sender.stop();
        self.udp_receiver.stop();
        self.multicast_sender.stop();
        self.multicast_receiver.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanicReporter;

    impl ErrorReporter for PanicReporter {
        fn show_error(&self, message: &str) {
            panic!("unexpected error: {message}");
        }

        fn show_critical_error(&self, message: &str) {
            panic!("unexpected critical error: {message}");
        }
    }

    struct SilentReporter;

    impl ErrorReporter for SilentReporter {
        fn show_error(&self, _message: &str) {}
        fn show_critical_error(&self, _message: &str) {}
    }

    #[tokio::test]
    async fn test_new_with_default_config() {
        let service = NetworkService::new(
            NetworkConfig::default(),
            Settings::new("Tester"),
            Arc::new(PanicReporter),
        );

        let service = service.unwrap();
        assert!(!service.is_network_up());
        assert!(!service.is_connection_worker_alive());
    }

    #[tokio::test]
    async fn test_new_with_invalid_group_fails() {
        let config = NetworkConfig {
            chat_group: "bogus".to_string(),
            ..NetworkConfig::default()
        };

        let result = NetworkService::new(config, Settings::new("Tester"), Arc::new(SilentReporter));
        assert!(matches!(result, Err(NetworkError::Fatal(_))));
    }

    #[tokio::test]
    async fn test_disabled_private_chat_skips_udp() {
        let settings = Settings::new("Tester");
        settings.set_no_private_chat(true);

        let mut config = NetworkConfig::default();
        config.private_chat_port = 43000;
        config.tcp_chat_port = 43100;

        let service =
            NetworkService::new(config, settings.clone(), Arc::new(PanicReporter)).unwrap();

        service.network_came_up(false);

        assert_eq!(settings.me().read().private_chat_port, 0);
        assert!(settings.me().read().tcp_chat_port >= 43100);

        service.network_went_down(false);
        assert_eq!(settings.me().read().tcp_chat_port, 0);
    }

    #[tokio::test]
    async fn test_send_to_user_without_address_fails() {
        let service = NetworkService::new(
            NetworkConfig::default(),
            Settings::new("Tester"),
            Arc::new(PanicReporter),
        )
        .unwrap();

        let user = User::new("Bob", 12345678);
        assert!(!service.send_message_to_user("12345678!PRIVMSG#Tester:(12345678)[0]hi", &user).await);
    }
}
