//! Turns decoded private-chat wire messages into responder callbacks.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use parlor_shared::{MessageBody, Settings, WireMessage};

use crate::event::ReceiverListener;

/// Receives parsed private messages addressed to the local user.
pub trait PrivateMessageResponder: Send + Sync {
    fn message_arrived(&self, user_code: i32, msg: &str, color: i32);
}

/// Decodes private-chat lines and dispatches them to a
/// [`PrivateMessageResponder`]. Only messages from someone else that are
/// addressed to the local user get through.
pub struct PrivateMessageParser {
    responder: Arc<dyn PrivateMessageResponder>,
    settings: Settings,
}

impl PrivateMessageParser {
    pub fn new(responder: Arc<dyn PrivateMessageResponder>, settings: Settings) -> Self {
        Self {
            responder,
            settings,
        }
    }
}

impl ReceiverListener for PrivateMessageParser {
    fn message_arrived(&self, message: &str, _ip_address: IpAddr) {
        let decoded = match WireMessage::decode(message) {
            Some(decoded) => decoded,
            None => return,
        };

        let me = self.settings.me().code();

        match decoded.body {
            MessageBody::PrivMsg { to, color, text } => {
                if decoded.code != me && to == me {
                    self.responder.message_arrived(decoded.code, &text, color);
                } else {
                    debug!(from = decoded.code, to, "Private message not for us, ignoring");
                }
            }
            other => {
                debug!(verb = other.verb(), "Not a private message, ignoring");
            }
        }
    }
}
