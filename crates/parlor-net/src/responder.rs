//! Async wrapper around the message responder.
//!
//! Events can arrive from users we have never seen, typically right after
//! joining a busy chat. The wrapper asks such users to identify themselves
//! and, for events worth keeping, waits a bounded time for the user to
//! show up in the registry before delivering. Events that repeat on their
//! own (topic, away, nick, idle) are simply dropped; the next announcement
//! will find a known user.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use parlor_shared::constants::{IDENTIFY_POLL_ATTEMPTS, IDENTIFY_POLL_INTERVAL};
use parlor_shared::types::User;
use parlor_shared::WaitingList;

use crate::event::UserRegistry;
use crate::parser::MessageResponder;

/// Sends the identification requests. Implemented by the send helpers;
/// kept synchronous so it can be called from receive-loop callbacks.
pub trait IdentifyRequester: Send + Sync {
    /// Ask everyone to announce themselves.
    fn request_expose(&self);

    /// Ask for the current topic.
    fn request_topic(&self);
}

pub struct AsyncMessageResponderWrapper {
    responder: Arc<dyn MessageResponder>,
    registry: Arc<dyn UserRegistry>,
    requester: Arc<dyn IdentifyRequester>,
    waiting_list: Arc<WaitingList>,
}

impl AsyncMessageResponderWrapper {
    pub fn new(
        responder: Arc<dyn MessageResponder>,
        registry: Arc<dyn UserRegistry>,
        requester: Arc<dyn IdentifyRequester>,
        waiting_list: Arc<WaitingList>,
    ) -> Self {
        Self {
            responder,
            registry,
            requester,
            waiting_list,
        }
    }

    /// Put the user on the waiting list and send the identification
    /// requests, unless we are already waiting for this user.
    fn ask_user_to_identify(&self, user_code: i32) {
        if !self.waiting_list.is_waiting_user(user_code) {
            debug!(user_code, "Asking unknown user to identify");
            self.waiting_list.add_waiting_user(user_code);
            self.requester.request_expose();
            self.requester.request_topic();
        }
    }
}

/// Poll until the user shows up in the registry, for at most two seconds.
async fn wait_for_user_to_identify(registry: &dyn UserRegistry, user_code: i32) {
    for _ in 0..IDENTIFY_POLL_ATTEMPTS {
        if !registry.is_new_user(user_code) {
            return;
        }

        tokio::time::sleep(IDENTIFY_POLL_INTERVAL).await;
    }

    debug!(user_code, "User never identified");
}

impl MessageResponder for AsyncMessageResponderWrapper {
    /// Chat messages are worth a wait: deliver late rather than lose them.
    fn message_arrived(&self, user_code: i32, msg: &str, color: i32) {
        if self.registry.is_new_user(user_code) {
            self.ask_user_to_identify(user_code);

            let responder = self.responder.clone();
            let registry = self.registry.clone();
            let msg = msg.to_string();

            tokio::spawn(async move {
                wait_for_user_to_identify(registry.as_ref(), user_code).await;
                responder.message_arrived(user_code, &msg, color);
            });
        } else {
            self.responder.message_arrived(user_code, msg, color);
        }
    }

    fn topic_changed(&self, user_code: i32, new_topic: &str, nick: &str, time: i64) {
        if self.registry.is_new_user(user_code) {
            self.ask_user_to_identify(user_code);
        } else {
            self.responder.topic_changed(user_code, new_topic, nick, time);
        }
    }

    fn topic_requested(&self) {
        self.responder.topic_requested();
    }

    fn away_changed(&self, user_code: i32, away: bool, away_msg: &str) {
        if self.registry.is_new_user(user_code) {
            self.ask_user_to_identify(user_code);
        } else {
            self.responder.away_changed(user_code, away, away_msg);
        }
    }

    fn nick_changed(&self, user_code: i32, new_nick: &str) {
        if self.registry.is_new_user(user_code) {
            self.ask_user_to_identify(user_code);
        } else {
            self.responder.nick_changed(user_code, new_nick);
        }
    }

    fn nick_crash(&self) {
        self.responder.nick_crash();
    }

    fn me_log_on(&self, ip_address: IpAddr) {
        self.responder.me_log_on(ip_address);
    }

    fn user_log_on(&self, user: User) {
        self.responder.user_log_on(user);
    }

    fn user_log_off(&self, user_code: i32) {
        self.responder.user_log_off(user_code);
    }

    fn user_exposing(&self, user: User) {
        self.responder.user_exposing(user);
    }

    fn expose_requested(&self) {
        self.responder.expose_requested();
    }

    fn writing_changed(&self, user_code: i32, writing: bool) {
        self.responder.writing_changed(user_code, writing);
    }

    fn me_idle(&self, ip_address: IpAddr) {
        self.responder.me_idle(ip_address);
    }

    fn user_idle(&self, user_code: i32, ip_address: IpAddr) {
        if self.registry.is_new_user(user_code) {
            self.ask_user_to_identify(user_code);
        } else {
            self.responder.user_idle(user_code, ip_address);
        }
    }

    /// File offers get the same wait treatment as chat messages, and are
    /// always delivered off the receive loop: the downstream handler can
    /// block on the accept/reject decision.
    fn file_send(&self, user_code: i32, byte_size: u64, file_name: &str, file_hash: i32) {
        if self.registry.is_new_user(user_code) {
            self.ask_user_to_identify(user_code);
        }

        let responder = self.responder.clone();
        let registry = self.registry.clone();
        let file_name = file_name.to_string();

        tokio::spawn(async move {
            wait_for_user_to_identify(registry.as_ref(), user_code).await;
            responder.file_send(user_code, byte_size, &file_name, file_hash);
        });
    }

    fn file_send_aborted(&self, user_code: i32, file_name: &str, file_hash: i32) {
        self.responder.file_send_aborted(user_code, file_name, file_hash);
    }

    /// Always delivered off the receive loop: the responder connects to
    /// the receiver from here, which can take a while.
    fn file_send_accepted(&self, user_code: i32, file_name: &str, file_hash: i32, port: u16) {
        let responder = self.responder.clone();
        let file_name = file_name.to_string();

        tokio::spawn(async move {
            responder.file_send_accepted(user_code, &file_name, file_hash, port);
        });
    }

    fn client_info(
        &self,
        user_code: i32,
        client: &str,
        time_since_logon: i64,
        operating_system: &str,
        private_chat_port: u16,
        tcp_chat_port: u16,
    ) {
        self.responder.client_info(
            user_code,
            client,
            time_since_logon,
            operating_system,
            private_chat_port,
            tcp_chat_port,
        );
    }
}
