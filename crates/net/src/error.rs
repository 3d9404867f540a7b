//! Network error types

use std::io;

use crate::protocol::{ErrorKind, RemoteError};

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not connected")]
    NotConnected,

    /// The server processed the request and refused it
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },
}

impl Error {
    /// Kind of a server-side failure, if this is one
    pub fn remote_kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Error::Remote {
            kind: err.kind,
            message: err.message,
        }
    }
}
