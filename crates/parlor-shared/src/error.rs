use thiserror::Error;

/// Errors from the networking layer.
///
/// Most transport failures are handled in place and reported as booleans,
/// so this enum only covers the paths that must propagate.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// The configured multicast group address could not be resolved.
    /// The application cannot run without it.
    #[error("Failed to initialize the network: {0}")]
    Fatal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A user-initiated send failed after the network layer gave up.
/// The embedding user interface should show the message to the user.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CommandError(pub String);

/// The file-transfer server socket could not be opened on any candidate port.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ServerError(pub String);
