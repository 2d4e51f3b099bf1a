//! Turns decoded main-chat wire messages into responder callbacks.
//!
//! The parser owns the logged-on gate: nothing is delivered before our own
//! logon echo has come back, and after that our own messages are ignored
//! except the periodic idle refresh. The responder on the other side of
//! the trait is the controller layer that owns the user list.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use parlor_shared::types::User;
use parlor_shared::{MessageBody, Settings, WireMessage};

use crate::event::ReceiverListener;

/// Receives parsed main-chat events. One method per protocol event.
pub trait MessageResponder: Send + Sync {
    fn message_arrived(&self, user_code: i32, msg: &str, color: i32);
    fn topic_changed(&self, user_code: i32, new_topic: &str, nick: &str, time: i64);
    fn topic_requested(&self);
    fn away_changed(&self, user_code: i32, away: bool, away_msg: &str);
    fn nick_changed(&self, user_code: i32, new_nick: &str);
    fn nick_crash(&self);
    fn me_log_on(&self, ip_address: IpAddr);
    fn user_log_on(&self, user: User);
    fn user_log_off(&self, user_code: i32);
    fn user_exposing(&self, user: User);
    fn expose_requested(&self);
    fn writing_changed(&self, user_code: i32, writing: bool);
    fn me_idle(&self, ip_address: IpAddr);
    fn user_idle(&self, user_code: i32, ip_address: IpAddr);
    fn file_send(&self, user_code: i32, byte_size: u64, file_name: &str, file_hash: i32);
    fn file_send_aborted(&self, user_code: i32, file_name: &str, file_hash: i32);
    fn file_send_accepted(&self, user_code: i32, file_name: &str, file_hash: i32, port: u16);
    fn client_info(
        &self,
        user_code: i32,
        client: &str,
        time_since_logon: i64,
        operating_system: &str,
        private_chat_port: u16,
        tcp_chat_port: u16,
    );
}

/// Decodes main-chat lines and dispatches them to a [`MessageResponder`].
pub struct MessageParser {
    responder: Arc<dyn MessageResponder>,
    settings: Settings,
    logged_on: AtomicBool,
}

impl MessageParser {
    pub fn new(responder: Arc<dyn MessageResponder>, settings: Settings) -> Self {
        Self {
            responder,
            settings,
            logged_on: AtomicBool::new(false),
        }
    }

    pub fn is_logged_on(&self) -> bool {
        self.logged_on.load(Ordering::SeqCst)
    }

    fn handle(&self, message: WireMessage, ip_address: IpAddr) {
        let me = self.settings.me();
        let from_me = message.code == me.code();
        let logged_on = self.is_logged_on();

        // Our own logon echo confirms the network actually works; before
        // it nothing else is of interest, after it only our idle refresh.
        if from_me {
            match message.body {
                MessageBody::Logon if !logged_on => {
                    self.logged_on.store(true, Ordering::SeqCst);
                    self.responder.me_log_on(ip_address);
                }
                MessageBody::Idle if logged_on => self.responder.me_idle(ip_address),
                _ => debug!(verb = message.body.verb(), "Ignoring own message"),
            }
            return;
        }

        if !logged_on {
            debug!(verb = message.body.verb(), "Not logged on yet, ignoring");
            return;
        }

        let code = message.code;

        match message.body {
            MessageBody::Msg { color, text } => {
                self.responder.message_arrived(code, &text, color);
            }
            MessageBody::Logon => {
                self.responder
                    .user_log_on(new_user(code, &message.nick, ip_address, ""));
            }
            MessageBody::Exposing { away_msg } => {
                self.responder
                    .user_exposing(new_user(code, &message.nick, ip_address, &away_msg));
            }
            MessageBody::Logoff => self.responder.user_log_off(code),
            MessageBody::Away { away_msg } => self.responder.away_changed(code, true, &away_msg),
            MessageBody::Back => self.responder.away_changed(code, false, ""),
            MessageBody::Expose => self.responder.expose_requested(),
            MessageBody::NickCrash { nick } => {
                if me.nick() == nick {
                    self.responder.nick_crash();
                }
            }
            MessageBody::Writing => self.responder.writing_changed(code, true),
            MessageBody::StoppedWriting => self.responder.writing_changed(code, false),
            MessageBody::GetTopic => self.responder.topic_requested(),
            MessageBody::Topic { nick, time, topic } => {
                self.responder.topic_changed(code, &topic, &nick, time);
            }
            MessageBody::Nick => self.responder.nick_changed(code, &message.nick),
            MessageBody::Idle => self.responder.user_idle(code, ip_address),
            MessageBody::SendFileAccept {
                to,
                port,
                hash,
                name,
            } => {
                if to == me.code() {
                    self.responder.file_send_accepted(code, &name, hash, port);
                }
            }
            MessageBody::SendFileAbort { to, hash, name } => {
                if to == me.code() {
                    self.responder.file_send_aborted(code, &name, hash);
                }
            }
            MessageBody::SendFile {
                to,
                size,
                hash,
                name,
            } => {
                if to == me.code() {
                    self.responder.file_send(code, size, &name, hash);
                }
            }
            MessageBody::Client {
                client,
                since_logon,
                operating_system,
                private_chat_port,
                tcp_chat_port,
            } => {
                self.responder.client_info(
                    code,
                    &client,
                    since_logon,
                    &operating_system,
                    private_chat_port,
                    tcp_chat_port,
                );
            }
            MessageBody::PrivMsg { .. } => {
                // Routed to the private-chat parser by the deduplicator.
                debug!(code, "Private message on the main chat path, ignoring");
            }
        }
    }
}

fn new_user(code: i32, nick: &str, ip_address: IpAddr, away_msg: &str) -> User {
    let mut user = User::new(nick, code);
    user.ip_address = Some(ip_address);
    user.logon_time = Utc::now().timestamp_millis();
    user.last_idle = user.logon_time;

    if !away_msg.is_empty() {
        user.away = true;
        user.away_msg = away_msg.to_string();
    }

    user
}

impl ReceiverListener for MessageParser {
    fn message_arrived(&self, message: &str, ip_address: IpAddr) {
        if let Some(decoded) = WireMessage::decode(message) {
            self.handle(decoded, ip_address);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingResponder {
        events: Mutex<Vec<String>>,
    }

    impl RecordingResponder {
        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl MessageResponder for RecordingResponder {
        fn message_arrived(&self, user_code: i32, msg: &str, color: i32) {
            self.push(format!("msg {user_code} {msg} {color}"));
        }

        fn topic_changed(&self, user_code: i32, new_topic: &str, nick: &str, time: i64) {
            self.push(format!("topic {user_code} {new_topic} {nick} {time}"));
        }

        fn topic_requested(&self) {
            self.push("topic_requested".to_string());
        }

        fn away_changed(&self, user_code: i32, away: bool, away_msg: &str) {
            self.push(format!("away {user_code} {away} {away_msg}"));
        }

        fn nick_changed(&self, user_code: i32, new_nick: &str) {
            self.push(format!("nick {user_code} {new_nick}"));
        }

        fn nick_crash(&self) {
            self.push("nick_crash".to_string());
        }

        fn me_log_on(&self, ip_address: IpAddr) {
            self.push(format!("me_log_on {ip_address}"));
        }

        fn user_log_on(&self, user: User) {
            self.push(format!("user_log_on {} {}", user.code(), user.nick));
        }

        fn user_log_off(&self, user_code: i32) {
            self.push(format!("user_log_off {user_code}"));
        }

        fn user_exposing(&self, user: User) {
            self.push(format!(
                "user_exposing {} {} {}",
                user.code(),
                user.nick,
                user.away_msg
            ));
        }

        fn expose_requested(&self) {
            self.push("expose_requested".to_string());
        }

        fn writing_changed(&self, user_code: i32, writing: bool) {
            self.push(format!("writing {user_code} {writing}"));
        }

        fn me_idle(&self, ip_address: IpAddr) {
            self.push(format!("me_idle {ip_address}"));
        }

        fn user_idle(&self, user_code: i32, ip_address: IpAddr) {
            self.push(format!("user_idle {user_code} {ip_address}"));
        }

        fn file_send(&self, user_code: i32, byte_size: u64, file_name: &str, file_hash: i32) {
            self.push(format!("file_send {user_code} {byte_size} {file_name} {file_hash}"));
        }

        fn file_send_aborted(&self, user_code: i32, file_name: &str, file_hash: i32) {
            self.push(format!("file_send_aborted {user_code} {file_name} {file_hash}"));
        }

        fn file_send_accepted(&self, user_code: i32, file_name: &str, file_hash: i32, port: u16) {
            self.push(format!(
                "file_send_accepted {user_code} {file_name} {file_hash} {port}"
            ));
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
            self.push(format!(
                "client_info {user_code} {client} {time_since_logon} {operating_system} {private_chat_port} {tcp_chat_port}"
            ));
        }
    }

    struct Fixture {
        parser: MessageParser,
        responder: Arc<RecordingResponder>,
        me: i32,
    }

    fn fixture() -> Fixture {
        let settings = Settings::new("Tester");
        let me = settings.me().code();
        let responder = Arc::new(RecordingResponder::default());

        Fixture {
            parser: MessageParser::new(responder.clone(), settings),
            responder,
            me,
        }
    }

    fn ip() -> IpAddr {
        "192.168.1.4".parse().unwrap()
    }

    fn log_on(f: &Fixture) {
        f.parser
            .message_arrived(&format!("{}!LOGON#Tester:", f.me), ip());
    }

    #[test]
    fn test_nothing_is_delivered_before_own_logon_echo() {
        let f = fixture();

        f.parser
            .message_arrived("12345678!MSG#Bob:[-15987646]hello", ip());
        f.parser.message_arrived("12345678!LOGON#Bob:", ip());

        assert!(f.responder.events().is_empty());
        assert!(!f.parser.is_logged_on());
    }

    #[test]
    fn test_own_logon_echo_flips_the_gate() {
        let f = fixture();

        log_on(&f);
        assert!(f.parser.is_logged_on());
        assert_eq!(f.responder.events(), vec![format!("me_log_on {}", ip())]);

        // A second echo of our own logon is ignored.
        log_on(&f);
        assert_eq!(f.responder.events().len(), 1);
    }

    #[test]
    fn test_own_idle_is_delivered_only_after_logon() {
        let f = fixture();

        f.parser
            .message_arrived(&format!("{}!IDLE#Tester:", f.me), ip());
        assert!(f.responder.events().is_empty());

        log_on(&f);
        f.parser
            .message_arrived(&format!("{}!IDLE#Tester:", f.me), ip());

        assert_eq!(f.responder.events()[1], format!("me_idle {}", ip()));
    }

    #[test]
    fn test_other_own_messages_are_ignored_after_logon() {
        let f = fixture();
        log_on(&f);

        f.parser
            .message_arrived(&format!("{}!MSG#Tester:[-15987646]own echo", f.me), ip());
        f.parser
            .message_arrived(&format!("{}!LOGOFF#Tester:", f.me), ip());

        assert_eq!(f.responder.events().len(), 1);
    }

    #[test]
    fn test_chat_message_from_other_user() {
        let f = fixture();
        log_on(&f);

        f.parser
            .message_arrived("12345678!MSG#Bob:[-15987646]hello there", ip());

        assert_eq!(
            f.responder.events()[1],
            "msg 12345678 hello there -15987646"
        );
    }

    #[test]
    fn test_logon_builds_user_with_address() {
        let f = fixture();
        log_on(&f);

        f.parser.message_arrived("12345678!LOGON#Bob:", ip());

        assert_eq!(f.responder.events()[1], "user_log_on 12345678 Bob");
    }

    #[test]
    fn test_exposing_carries_away_message() {
        let f = fixture();
        log_on(&f);

        f.parser
            .message_arrived("12345678!EXPOSING#Bob:out for lunch", ip());

        assert_eq!(
            f.responder.events()[1],
            "user_exposing 12345678 Bob out for lunch"
        );
    }

    #[test]
    fn test_nick_crash_only_for_matching_nick() {
        let f = fixture();
        log_on(&f);

        f.parser
            .message_arrived("12345678!NICKCRASH#Bob:SomeoneElse", ip());
        assert_eq!(f.responder.events().len(), 1);

        f.parser
            .message_arrived("12345678!NICKCRASH#Bob:Tester", ip());
        assert_eq!(f.responder.events()[1], "nick_crash");
    }

    #[test]
    fn test_file_messages_for_someone_else_are_ignored() {
        let f = fixture();
        log_on(&f);

        f.parser.message_arrived(
            "12345678!SENDFILE#Bob:(55555555)[2048]{98765}notes.txt",
            ip(),
        );
        f.parser.message_arrived(
            "12345678!SENDFILEACCEPT#Bob:(55555555)[40756]{98765}notes.txt",
            ip(),
        );
        f.parser.message_arrived(
            "12345678!SENDFILEABORT#Bob:(55555555){98765}notes.txt",
            ip(),
        );

        assert_eq!(f.responder.events().len(), 1);
    }

    #[test]
    fn test_file_messages_addressed_to_me_are_delivered() {
        let f = fixture();
        log_on(&f);

        f.parser.message_arrived(
            &format!("12345678!SENDFILE#Bob:({})[2048]{{98765}}notes.txt", f.me),
            ip(),
        );
        f.parser.message_arrived(
            &format!(
                "12345678!SENDFILEACCEPT#Bob:({})[40756]{{98765}}notes.txt",
                f.me
            ),
            ip(),
        );

        assert_eq!(
            f.responder.events()[1],
            "file_send 12345678 2048 notes.txt 98765"
        );
        assert_eq!(
            f.responder.events()[2],
            "file_send_accepted 12345678 notes.txt 98765 40756"
        );
    }

    #[test]
    fn test_topic_and_client_info() {
        let f = fixture();
        log_on(&f);

        f.parser.message_arrived(
            "12345678!TOPIC#Bob:(Alice)[1620000000000]Lunch plans",
            ip(),
        );
        f.parser.message_arrived(
            "12345678!CLIENT#Bob:(Parlor v1.0.0)[120000]{Linux}<40656>/40656\\",
            ip(),
        );

        assert_eq!(
            f.responder.events()[1],
            "topic 12345678 Lunch plans Alice 1620000000000"
        );
        assert_eq!(
            f.responder.events()[2],
            "client_info 12345678 Parlor v1.0.0 120000 Linux 40656 40656"
        );
    }

    #[test]
    fn test_malformed_line_is_dropped() {
        let f = fixture();
        log_on(&f);

        f.parser.message_arrived("complete garbage", ip());
        f.parser.message_arrived("", ip());

        assert_eq!(f.responder.events().len(), 1);
    }
}
