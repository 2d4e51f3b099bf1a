//! The line-oriented wire protocol.
//!
//! Every control message is a single UTF-8 line of the form
//! `<code>!<VERB>#<nick>:<payload>`, where the payload grammar is
//! verb-specific and uses ad-hoc delimiters: `[...]` for integers,
//! `{...}` for hash codes and the operating system, `(...)` for a second
//! code or a string, `<...>` and `/...\` for ports, and trailing raw text
//! for message bodies. Delimiters are located with first-occurrence scans.
//!
//! Decoding is total: malformed input never produces an error, only a
//! logged drop. The receive loops depend on that.

use tracing::{debug, warn};

/// A decoded (or to-be-encoded) protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct WireMessage {
    /// Code of the sending user
    pub code: i32,
    /// Nick of the sending user. For NICK this is the new nick.
    pub nick: String,
    pub body: MessageBody,
}

/// One variant per protocol verb, carrying only the fields that verb uses.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Public chat message with the sender's text color
    Msg { color: i32, text: String },
    /// Announce logon
    Logon,
    /// Announce presence and away state, in response to an EXPOSE
    Exposing { away_msg: String },
    /// Announce logoff
    Logoff,
    /// Going away, with the reason
    Away { away_msg: String },
    /// Back from away
    Back,
    /// Request that everyone announce themselves
    Expose,
    /// Tell a user its nick collides with ours
    NickCrash { nick: String },
    /// Started writing
    Writing,
    /// Stopped writing
    StoppedWriting,
    /// Request the current topic
    GetTopic,
    /// Announce the topic, its setter, and when it was set (epoch millis)
    Topic {
        nick: String,
        time: i64,
        topic: String,
    },
    /// Nick change. The new nick rides in the header nick field.
    Nick,
    /// Periodic liveness refresh
    Idle,
    /// Accept a file offer, addressed to `to`, telling the sender which
    /// port to connect to
    SendFileAccept {
        to: i32,
        port: u16,
        hash: i32,
        name: String,
    },
    /// Abort a file transfer, addressed to `to`
    SendFileAbort { to: i32, hash: i32, name: String },
    /// Offer a file to `to`
    SendFile {
        to: i32,
        size: u64,
        hash: i32,
        name: String,
    },
    /// Client details: client string, millis since logon, operating system,
    /// private-chat UDP port, and TCP chat port
    Client {
        client: String,
        since_logon: i64,
        operating_system: String,
        private_chat_port: u16,
        tcp_chat_port: u16,
    },
    /// Private message, addressed to `to`, delivered over unicast
    PrivMsg { to: i32, color: i32, text: String },
}

impl MessageBody {
    /// The wire verb for this message.
    pub fn verb(&self) -> &'static str {
        match self {
            MessageBody::Msg { .. } => "MSG",
            MessageBody::Logon => "LOGON",
            MessageBody::Exposing { .. } => "EXPOSING",
            MessageBody::Logoff => "LOGOFF",
            MessageBody::Away { .. } => "AWAY",
            MessageBody::Back => "BACK",
            MessageBody::Expose => "EXPOSE",
            MessageBody::NickCrash { .. } => "NICKCRASH",
            MessageBody::Writing => "WRITING",
            MessageBody::StoppedWriting => "STOPPEDWRITING",
            MessageBody::GetTopic => "GETTOPIC",
            MessageBody::Topic { .. } => "TOPIC",
            MessageBody::Nick => "NICK",
            MessageBody::Idle => "IDLE",
            MessageBody::SendFileAccept { .. } => "SENDFILEACCEPT",
            MessageBody::SendFileAbort { .. } => "SENDFILEABORT",
            MessageBody::SendFile { .. } => "SENDFILE",
            MessageBody::Client { .. } => "CLIENT",
            MessageBody::PrivMsg { .. } => "PRIVMSG",
        }
    }
}

impl WireMessage {
    pub fn new(code: i32, nick: impl Into<String>, body: MessageBody) -> Self {
        Self {
            code,
            nick: nick.into(),
            body,
        }
    }

    /// Encode to the single-line wire form.
    pub fn encode(&self) -> String {
        let head = format!("{}!{}#{}:", self.code, self.body.verb(), self.nick);

        match &self.body {
            MessageBody::Msg { color, text } => format!("{head}[{color}]{text}"),
            MessageBody::Logon
            | MessageBody::Logoff
            | MessageBody::Back
            | MessageBody::Expose
            | MessageBody::Writing
            | MessageBody::StoppedWriting
            | MessageBody::GetTopic
            | MessageBody::Nick
            | MessageBody::Idle => head,
            MessageBody::Exposing { away_msg } => format!("{head}{away_msg}"),
            MessageBody::Away { away_msg } => format!("{head}{away_msg}"),
            MessageBody::NickCrash { nick } => format!("{head}{nick}"),
            MessageBody::Topic { nick, time, topic } => {
                format!("{head}({nick})[{time}]{topic}")
            }
            MessageBody::SendFileAccept {
                to,
                port,
                hash,
                name,
            } => format!("{head}({to})[{port}]{{{hash}}}{name}"),
            MessageBody::SendFileAbort { to, hash, name } => {
                format!("{head}({to}){{{hash}}}{name}")
            }
            MessageBody::SendFile {
                to,
                size,
                hash,
                name,
            } => format!("{head}({to})[{size}]{{{hash}}}{name}"),
            MessageBody::Client {
                client,
                since_logon,
                operating_system,
                private_chat_port,
                tcp_chat_port,
            } => format!(
                "{head}({client})[{since_logon}]{{{operating_system}}}<{private_chat_port}>/{tcp_chat_port}\\"
            ),
            MessageBody::PrivMsg { to, color, text } => {
                format!("{head}({to})[{color}]{text}")
            }
        }
    }

    /// Decode a wire line. Malformed input is dropped with a warning,
    /// never an error.
    pub fn decode(line: &str) -> Option<WireMessage> {
        match try_decode(line) {
            Some(message) => Some(message),
            None => {
                warn!(message = %line, "Failed to parse message, dropping it");
                None
            }
        }
    }

    /// Parse only the leading sender code, as the deduplicator does.
    pub fn parse_sender_code(line: &str) -> Option<i32> {
        let exclamation = line.find('!')?;
        line.get(..exclamation)?.parse().ok()
    }
}

fn try_decode(line: &str) -> Option<WireMessage> {
    let exclamation = line.find('!')?;
    let hash = line.find('#')?;
    let colon = line.find(':')?;

    let code: i32 = line.get(..exclamation)?.parse().ok()?;
    let verb = line.get(exclamation + 1..hash)?;
    let nick = line.get(hash + 1..colon)?.to_string();
    let payload = line.get(colon + 1..)?;

    let body = match verb {
        "MSG" => {
            let (color, rest) = bracketed_int(payload, '[', ']')?;
            MessageBody::Msg {
                color,
                text: rest.to_string(),
            }
        }
        "LOGON" => MessageBody::Logon,
        "EXPOSING" => MessageBody::Exposing {
            away_msg: payload.to_string(),
        },
        "LOGOFF" => MessageBody::Logoff,
        "AWAY" => MessageBody::Away {
            away_msg: payload.to_string(),
        },
        "BACK" => MessageBody::Back,
        "EXPOSE" => MessageBody::Expose,
        "NICKCRASH" => MessageBody::NickCrash {
            nick: payload.to_string(),
        },
        "WRITING" => MessageBody::Writing,
        "STOPPEDWRITING" => MessageBody::StoppedWriting,
        "GETTOPIC" => MessageBody::GetTopic,
        "TOPIC" => {
            let setter = delimited(payload, '(', ')')?;
            let (time, rest) = bracketed_int::<i64>(payload, '[', ']')?;
            MessageBody::Topic {
                nick: setter.to_string(),
                time,
                topic: rest.to_string(),
            }
        }
        "NICK" => MessageBody::Nick,
        "IDLE" => MessageBody::Idle,
        "SENDFILEACCEPT" => {
            let to = delimited(payload, '(', ')')?.parse().ok()?;
            let (port, _) = bracketed_int(payload, '[', ']')?;
            let (hash, name) = bracketed_int(payload, '{', '}')?;
            MessageBody::SendFileAccept {
                to,
                port,
                hash,
                name: name.to_string(),
            }
        }
        "SENDFILEABORT" => {
            let to = delimited(payload, '(', ')')?.parse().ok()?;
            let (hash, name) = bracketed_int(payload, '{', '}')?;
            MessageBody::SendFileAbort {
                to,
                hash,
                name: name.to_string(),
            }
        }
        "SENDFILE" => {
            let to = delimited(payload, '(', ')')?.parse().ok()?;
            let (size, _) = bracketed_int(payload, '[', ']')?;
            let (hash, name) = bracketed_int(payload, '{', '}')?;
            MessageBody::SendFile {
                to,
                size,
                hash,
                name: name.to_string(),
            }
        }
        "CLIENT" => {
            let client = delimited(payload, '(', ')')?;
            let (since_logon, _) = bracketed_int(payload, '[', ']')?;
            let operating_system = delimited(payload, '{', '}')?;

            // The original client tolerates unparsable port fields and
            // falls back to 0, so older clients still interoperate.
            let private_chat_port = delimited(payload, '<', '>')
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| {
                    warn!(message = %line, "Failed to parse private chat port");
                    0
                });
            let tcp_chat_port = delimited(payload, '/', '\\')
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(|| {
                    warn!(message = %line, "Failed to parse tcp chat port");
                    0
                });

            MessageBody::Client {
                client: client.to_string(),
                since_logon,
                operating_system: operating_system.to_string(),
                private_chat_port,
                tcp_chat_port,
            }
        }
        "PRIVMSG" => {
            let to = delimited(payload, '(', ')')?.parse().ok()?;
            let (color, text) = bracketed_int(payload, '[', ']')?;
            MessageBody::PrivMsg {
                to,
                color,
                text: text.to_string(),
            }
        }
        _ => {
            debug!(verb = %verb, "Unknown message verb");
            return None;
        }
    };

    Some(WireMessage { code, nick, body })
}

/// Content between the first occurrence of `open` and the first occurrence
/// of `close`. Fails when either is missing or they are out of order.
fn delimited(payload: &str, open: char, close: char) -> Option<&str> {
    let left = payload.find(open)?;
    let right = payload.find(close)?;
    payload.get(left + open.len_utf8()..right)
}

/// Parse an integer between `open` and `close`, returning it together with
/// the rest of the payload after `close`.
fn bracketed_int<T: std::str::FromStr>(
    payload: &str,
    open: char,
    close: char,
) -> Option<(T, &str)> {
    let value = delimited(payload, open, close)?.parse().ok()?;
    let right = payload.find(close)?;
    let rest = payload.get(right + close.len_utf8()..)?;
    Some((value, rest))
}
