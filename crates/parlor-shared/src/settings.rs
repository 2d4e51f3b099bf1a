//! Application settings and the user-facing error sink.
//!
//! Components receive these explicitly through construction instead of
//! reaching for globals, so every piece can be tested in isolation.

use std::sync::{Arc, PoisonError, RwLock};

use crate::types::{SharedUser, User};

/// Receives errors that should be presented to the user.
pub trait ErrorReporter: Send + Sync {
    /// Show a non-fatal error. The application keeps running.
    fn show_error(&self, message: &str);

    /// Show a fatal error. The caller may terminate the process afterwards.
    fn show_critical_error(&self, message: &str);
}

#[derive(Debug)]
struct SettingsState {
    own_color: i32,
    network_interface: Option<String>,
    no_private_chat: bool,
}

/// Shared application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    me: SharedUser,
    state: Arc<RwLock<SettingsState>>,
}

impl Settings {
    pub fn new(nick: impl Into<String>) -> Self {
        let mut me = User::new(nick, User::random_code());
        me.me = true;

        Self {
            me: SharedUser::new(me),
            state: Arc::new(RwLock::new(SettingsState {
                own_color: 0,
                network_interface: None,
                no_private_chat: false,
            })),
        }
    }

    /// The local user.
    pub fn me(&self) -> &SharedUser {
        &self.me
    }

    /// The color the local user sends chat messages with.
    pub fn own_color(&self) -> i32 {
        self.read().own_color
    }

    pub fn set_own_color(&self, color: i32) {
        self.write().own_color = color;
    }

    /// The name of the network interface the user has chosen, if any.
    pub fn network_interface(&self) -> Option<String> {
        self.read().network_interface.clone()
    }

    pub fn set_network_interface(&self, name: Option<String>) {
        self.write().network_interface = name;
    }

    /// Whether private chat over unicast UDP is disabled.
    pub fn is_no_private_chat(&self) -> bool {
        self.read().no_private_chat
    }

    pub fn set_no_private_chat(&self, no_private_chat: bool) {
        self.write().no_private_chat = no_private_chat;
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SettingsState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SettingsState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
