//! One send helper per protocol verb.
//!
//! Builds the wire lines with the local user's code and nick and hands
//! them to the network service. A failed send wakes the connectivity
//! supervisor; the user-initiated sends also surface the failure to the
//! caller so it can be shown in the chat window.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use parlor_shared::constants::APP_NAME;
use parlor_shared::types::{Topic, User};
use parlor_shared::{CommandError, MessageBody, Settings, WireMessage};

use crate::responder::IdentifyRequester;
use crate::service::NetworkService;

#[derive(Clone)]
pub struct NetworkMessages {
    service: Arc<NetworkService>,
    settings: Settings,
}

impl NetworkMessages {
    pub fn new(service: Arc<NetworkService>, settings: Settings) -> Self {
        Self { service, settings }
    }

    pub async fn send_logon_message(&self) {
        self.send_to_all(MessageBody::Logon).await;
    }

    pub async fn send_logoff_message(&self) {
        self.send_to_all(MessageBody::Logoff).await;
    }

    /// Announce ourselves and our away state, in response to an EXPOSE.
    pub async fn send_exposing_message(&self) {
        let away_msg = self.settings.me().read().away_msg.clone();
        self.send_to_all(MessageBody::Exposing { away_msg }).await;
    }

    /// Ask everyone to announce themselves.
    pub async fn send_expose_message(&self) {
        self.send_to_all(MessageBody::Expose).await;
    }

    pub async fn send_get_topic_message(&self) {
        self.send_to_all(MessageBody::GetTopic).await;
    }

    pub async fn send_idle_message(&self) {
        self.send_to_all(MessageBody::Idle).await;
    }

    pub async fn send_topic_change_message(&self, topic: &Topic) {
        self.send_topic(topic).await;
    }

    /// Announce the current topic in response to a GETTOPIC.
    pub async fn send_topic_requested_message(&self, topic: &Topic) {
        self.send_topic(topic).await;
    }

    async fn send_topic(&self, topic: &Topic) {
        self.send_to_all(MessageBody::Topic {
            nick: topic.nick().to_string(),
            time: topic.time(),
            topic: topic.topic().to_string(),
        })
        .await;
    }

    pub async fn send_away_message(&self, away_msg: &str) {
        self.send_to_all(MessageBody::Away {
            away_msg: away_msg.to_string(),
        })
        .await;
    }

    pub async fn send_back_message(&self) {
        self.send_to_all(MessageBody::Back).await;
    }

    /// Send a public chat message. Failure means nobody got it and the
    /// caller should tell the user.
    pub async fn send_chat_message(&self, msg: &str) -> Result<(), CommandError> {
        let sent = self
            .send_to_all(MessageBody::Msg {
                color: self.settings.own_color(),
                text: msg.to_string(),
            })
            .await;

        if sent {
            Ok(())
        } else {
            Err(CommandError(format!("Failed to send message: {msg}")))
        }
    }

    pub async fn send_writing_message(&self) {
        self.send_to_all(MessageBody::Writing).await;
    }

    pub async fn send_stopped_writing_message(&self) {
        self.send_to_all(MessageBody::StoppedWriting).await;
    }

    /// Announce a nick change. The new nick rides in the header, so the
    /// line is built with it instead of the current nick.
    pub async fn send_nick_message(&self, new_nick: &str) {
        let line = WireMessage::new(self.settings.me().code(), new_nick, MessageBody::Nick).encode();
        self.send_line(&line).await;
    }

    /// Tell a user its nick collides with ours.
    pub async fn send_nick_crash_message(&self, nick: &str) {
        self.send_to_all(MessageBody::NickCrash {
            nick: nick.to_string(),
        })
        .await;
    }

    /// Offer a file to a user.
    pub async fn send_file(
        &self,
        user: &User,
        file_name: &str,
        size: u64,
        file_hash: i32,
    ) -> Result<(), CommandError> {
        let sent = self
            .send_to_all(MessageBody::SendFile {
                to: user.code(),
                size,
                hash: file_hash,
                name: file_name.to_string(),
            })
            .await;

        if sent {
            Ok(())
        } else {
            Err(CommandError(format!(
                "Failed to offer {} the file {file_name}",
                user.nick
            )))
        }
    }

    pub async fn send_file_abort(&self, user: &User, file_hash: i32, file_name: &str) {
        self.send_to_all(MessageBody::SendFileAbort {
            to: user.code(),
            hash: file_hash,
            name: file_name.to_string(),
        })
        .await;
    }

    /// Accept a file offer, telling the sender which port to connect to.
    pub async fn send_file_accept(
        &self,
        user: &User,
        port: u16,
        file_hash: i32,
        file_name: &str,
    ) -> Result<(), CommandError> {
        let sent = self
            .send_to_all(MessageBody::SendFileAccept {
                to: user.code(),
                port,
                hash: file_hash,
                name: file_name.to_string(),
            })
            .await;

        if sent {
            Ok(())
        } else {
            Err(CommandError(format!(
                "Failed to accept the file {file_name} from {}",
                user.nick
            )))
        }
    }

    /// Send a private message straight to one user.
    pub async fn send_private_message(&self, msg: &str, user: &User) -> Result<(), CommandError> {
        let me = self.settings.me();
        let line = WireMessage::new(
            me.code(),
            me.nick(),
            MessageBody::PrivMsg {
                to: user.code(),
                color: self.settings.own_color(),
                text: msg.to_string(),
            },
        )
        .encode();

        let sent = self.service.send_message_to_user(&line, user).await;

        if !sent {
            self.service.check_network();
            return Err(CommandError(format!(
                "Failed to send private message to {}: {msg}",
                user.nick
            )));
        }

        Ok(())
    }

    /// Announce client name, uptime, operating system, and the ports the
    /// other clients can reach us on.
    pub async fn send_client_info(&self) {
        let (logon_time, private_chat_port, tcp_chat_port) = {
            let me = self.settings.me().read();
            (me.logon_time, me.private_chat_port, me.tcp_chat_port)
        };

        self.send_to_all(MessageBody::Client {
            client: format!("{APP_NAME} v{}", env!("CARGO_PKG_VERSION")),
            since_logon: Utc::now().timestamp_millis() - logon_time,
            operating_system: std::env::consts::OS.to_string(),
            private_chat_port,
            tcp_chat_port,
        })
        .await;
    }

    async fn send_to_all(&self, body: MessageBody) -> bool {
        let me = self.settings.me();
        let line = WireMessage::new(me.code(), me.nick(), body).encode();
        self.send_line(&line).await
    }

    async fn send_line(&self, line: &str) -> bool {
        let sent = self.service.send_message_to_all_users(line).await;

        if !sent {
            debug!(message = %line, "Send failed, waking the supervisor");
            self.service.check_network();
        }

        sent
    }
}

/// The async wrapper asks unknown users to identify through these. The
/// callbacks run on receive loops, so the actual sends are spawned.
impl IdentifyRequester for NetworkMessages {
    fn request_expose(&self) {
        let messages = self.clone();
        tokio::spawn(async move { messages.send_expose_message().await });
    }

    fn request_topic(&self) {
        let messages = self.clone();
        tokio::spawn(async move { messages.send_get_topic_message().await });
    }
}
