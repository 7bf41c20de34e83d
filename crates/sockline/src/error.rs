//! Error types for the socket client

use std::io;

/// Errors that can occur while driving a [`Client`](crate::Client)
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The call was made with arguments that can never succeed, such as a
    /// missing path or a zero length.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// `connect` or `accept` was called on a client that is already open
    #[error("client is already open")]
    AlreadyOpen,

    /// An I/O operation was attempted on a closed client
    #[error("client is not open")]
    NotOpen,

    /// The peer went away or the socket failed fatally
    #[error("connection lost: {0}")]
    ConnectionLost(#[source] io::Error),

    /// Any other I/O error, typically while establishing the connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error came from the transport rather than from how the
    /// client was called.
    ///
    /// `try_connect` and `try_accept` convert these into `false`.
    pub fn is_establishment_failure(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ConnectionLost(_))
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
