//! Server error types.

use std::fmt;

use huddle_core::{RoomId, SessionError};

/// Errors that can occur in the server process.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (unreadable config file, invalid bind address,
    /// zero intervals, etc.).
    ///
    /// These are fatal errors that prevent server startup. Fix configuration
    /// and restart.
    Config(String),

    /// Transport/network error (bind failure, accept failure, I/O error).
    ///
    /// May be transient (a single connection failing) or fatal (bind address
    /// in use). Check error message for details.
    Transport(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Errors returned by [`Coordinator`](crate::Coordinator) operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The room session rejected the operation.
    ///
    /// Passed through unchanged from `huddle-core`.
    Session(SessionError),

    /// The runtime is shutting down or a room task died.
    ///
    /// Transient from the caller's point of view. Retry against a restarted
    /// server.
    Unavailable(String),

    /// The room retired while the command was queued.
    ///
    /// Internal to the coordinator, which retries joins once on a fresh room.
    /// Other operations surface it as room-not-found.
    RoomClosed(RoomId),
}

impl CoordinatorError {
    /// Stable wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Session(err) => err.kind().as_str(),
            Self::RoomClosed(_) => "NotFound",
            Self::Unavailable(_) => "Unavailable",
        }
    }
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(err) => write!(f, "{err}"),
            Self::Unavailable(msg) => write!(f, "coordinator unavailable: {msg}"),
            Self::RoomClosed(room_id) => write!(f, "room closed: {room_id}"),
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session(err) => std::error::Error::source(err),
            _ => None,
        }
    }
}

impl From<SessionError> for CoordinatorError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}
