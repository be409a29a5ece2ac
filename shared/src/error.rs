//! Error taxonomy for remote control operations
//!
//! Only [`ControlError::Transport`] is recoverable by retrying; every other
//! kind passes straight through the connection manager.

use thiserror::Error;

/// Convenience alias used throughout the control crates
pub type ControlResult<T> = Result<T, ControlError>;

/// Broad classification of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connect, handshake or command did not finish in time
    Timeout,
    /// Remote host refused or could not be reached
    Refused,
    /// Credentials rejected
    Auth,
    /// Session was closed underneath us
    Closed,
    /// Any other I/O or protocol failure
    Io,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportErrorKind::Timeout => write!(f, "timeout"),
            TransportErrorKind::Refused => write!(f, "connection refused"),
            TransportErrorKind::Auth => write!(f, "authentication failed"),
            TransportErrorKind::Closed => write!(f, "session closed"),
            TransportErrorKind::Io => write!(f, "i/o error"),
        }
    }
}

/// Failure reported by a remote transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Refused, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Auth, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Closed, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Io, message)
    }

    /// Whether the session that produced this error can no longer be used
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::Timeout | TransportErrorKind::Closed
        )
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::AddrNotAvailable
            | ErrorKind::NotFound => TransportErrorKind::Refused,
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => TransportErrorKind::Closed,
            ErrorKind::PermissionDenied => TransportErrorKind::Auth,
            _ => TransportErrorKind::Io,
        };
        Self::new(kind, e.to_string())
    }
}

/// Errors surfaced by the connection manager and animatronic service
#[derive(Error, Debug, Clone)]
pub enum ControlError {
    #[error("Unknown animatronic system: {0}")]
    UnknownSystem(String),

    #[error("Invalid command: {0}")]
    Validation(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Command `{command}` on {system_id} exited with status {exit_code}: {stderr}")]
    RemoteCommand {
        system_id: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command on {system_id} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        system_id: String,
        attempts: u32,
        last_error: Box<ControlError>,
    },

    #[error("Operation on {system_id} cancelled by disconnect")]
    Cancelled { system_id: String },
}

impl ControlError {
    /// Only transport failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ControlError::Transport(_))
    }

    /// The transport error at the root of this failure, if any
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            ControlError::Transport(e) => Some(e),
            ControlError::RetriesExhausted { last_error, .. } => last_error.transport(),
            _ => None,
        }
    }
}
