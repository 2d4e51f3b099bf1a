//! Core domain types: users, the chat topic, and the identify waiting list.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::Rng;

/// A chat participant, local or remote.
///
/// The code is session-random and stable for the process lifetime of the
/// peer it belongs to. It never changes once assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    code: i32,
    pub nick: String,
    pub ip_address: Option<IpAddr>,
    pub host_name: Option<String>,
    pub away: bool,
    pub away_msg: String,
    /// Unix epoch millis of the last idle refresh
    pub last_idle: i64,
    /// Unix epoch millis of when the user logged on
    pub logon_time: i64,
    pub client: String,
    pub operating_system: String,
    pub private_chat_port: u16,
    pub tcp_chat_port: u16,
    pub me: bool,
    /// Whether the user's client advertises the TCP fallback transport
    pub tcp_enabled: bool,
}

impl User {
    pub fn new(nick: impl Into<String>, code: i32) -> Self {
        Self {
            code,
            nick: nick.into(),
            ip_address: None,
            host_name: None,
            away: false,
            away_msg: String::new(),
            last_idle: 0,
            logon_time: 0,
            client: String::new(),
            operating_system: String::new(),
            private_chat_port: 0,
            tcp_chat_port: 0,
            me: false,
            tcp_enabled: false,
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    /// Generate a session-random user code.
    pub fn random_code() -> i32 {
        rand::thread_rng().gen_range(10_000_000..20_000_000)
    }
}

/// Shared handle to the local user record.
///
/// Read by almost every component, written by the responder path, so the
/// record lives behind a lock. The code is cached outside the lock since
/// it is immutable.
#[derive(Debug, Clone)]
pub struct SharedUser {
    code: i32,
    inner: Arc<RwLock<User>>,
}

impl SharedUser {
    pub fn new(user: User) -> Self {
        Self {
            code: user.code(),
            inner: Arc::new(RwLock::new(user)),
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn nick(&self) -> String {
        self.read().nick.clone()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, User> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, User> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The current chat topic.
///
/// Updates are monotonic in time: a topic announcement only wins if its
/// timestamp is strictly greater than the one currently held. This is the
/// conflict-resolution rule for concurrently announced topics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topic {
    topic: String,
    nick: String,
    time: i64,
}

impl Topic {
    pub fn new(topic: impl Into<String>, nick: impl Into<String>, time: i64) -> Self {
        Self {
            topic: topic.into(),
            nick: nick.into(),
            time,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn has_topic(&self) -> bool {
        !self.topic.is_empty()
    }

    /// Apply a topic update if it is strictly newer than the current one.
    /// Nick, text, and time always change together. Returns whether the
    /// update was accepted.
    pub fn update_if_newer(&mut self, topic: &str, nick: &str, time: i64) -> bool {
        if time > self.time {
            self.topic = topic.to_string();
            self.nick = nick.to_string();
            self.time = time;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.topic.clear();
        self.nick.clear();
        self.time = 0;
    }
}

/// User codes we have asked to identify themselves and are waiting on.
#[derive(Debug, Default)]
pub struct WaitingList {
    users: Mutex<HashSet<i32>>,
}

impl WaitingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_waiting_user(&self, code: i32) {
        self.lock().insert(code);
    }

    pub fn is_waiting_user(&self, code: i32) -> bool {
        self.lock().contains(&code)
    }

    pub fn remove_waiting_user(&self, code: i32) {
        self.lock().remove(&code);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<i32>> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_update_accepts_strictly_newer() {
        let mut topic = Topic::new("Lunch plans", "Alice", 100);

        assert!(topic.update_if_newer("Dinner plans", "Bob", 101));
        assert_eq!(topic.topic(), "Dinner plans");
        assert_eq!(topic.nick(), "Bob");
        assert_eq!(topic.time(), 101);
    }

    #[test]
    fn test_topic_update_rejects_equal_and_older() {
        let mut topic = Topic::new("Lunch plans", "Alice", 100);

        assert!(!topic.update_if_newer("Stale", "Bob", 100));
        assert!(!topic.update_if_newer("Staler", "Bob", 99));

        assert_eq!(topic.topic(), "Lunch plans");
        assert_eq!(topic.nick(), "Alice");
        assert_eq!(topic.time(), 100);
    }

    #[test]
    fn test_topic_fields_change_together() {
        let mut topic = Topic::default();
        assert!(!topic.has_topic());

        assert!(topic.update_if_newer("New topic", "Carol", 5));
        assert!(topic.has_topic());
        assert_eq!(topic.nick(), "Carol");
        assert_eq!(topic.time(), 5);
    }

    #[test]
    fn test_waiting_list() {
        let list = WaitingList::new();

        assert!(!list.is_waiting_user(123));
        list.add_waiting_user(123);
        assert!(list.is_waiting_user(123));
        list.remove_waiting_user(123);
        assert!(!list.is_waiting_user(123));
    }

    #[test]
    fn test_user_code_is_in_session_range() {
        for _ in 0..100 {
            let code = User::random_code();
            assert!((10_000_000..20_000_000).contains(&code));
        }
    }

    #[test]
    fn test_shared_user_caches_code() {
        let me = SharedUser::new(User::new("Alice", 12345678));
        assert_eq!(me.code(), 12345678);

        me.write().private_chat_port = 40660;
        assert_eq!(me.read().private_chat_port, 40660);
        assert_eq!(me.code(), 12345678);
    }
}
