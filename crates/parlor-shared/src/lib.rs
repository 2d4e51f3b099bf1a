//! Shared domain types, constants, errors, and the line-oriented wire codec.

pub mod constants;
pub mod error;
pub mod settings;
pub mod types;
pub mod wire;

pub use error::{CommandError, NetworkError, ServerError};
pub use settings::{ErrorReporter, Settings};
pub use types::{SharedUser, Topic, User, WaitingList};
pub use wire::{MessageBody, WireMessage};
