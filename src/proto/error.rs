//! The crate-wide error type and result alias.

use thiserror::Error;

/// Result type alias for shoal operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a Redis-compatible server.
///
/// The variants partition failures by recovery policy:
///
/// - [`Io`](Error::Io) — the transport failed; the connection is poisoned
///   and must not be reused.
/// - [`Protocol`](Error::Protocol) — the reply stream violated RESP or an
///   expected reply shape; the parser may be mid-frame, so the connection is
///   poisoned as well.
/// - [`Server`](Error::Server) — the server answered with an error reply.
///   The connection stays usable; the message may carry a cluster
///   redirection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred; the connection is unusable.
    #[error("io error: {message}")]
    Io {
        /// Description of the failure.
        message: String,
    },

    /// The reply violated the protocol or an expected shape.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// The server returned an error reply.
    #[error("server error: {message}")]
    Server {
        /// Error text exactly as sent by the server.
        message: String,
    },
}

impl Error {
    pub(crate) fn io(message: impl Into<String>) -> Self {
        Error::Io {
            message: message.into(),
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol {
            message: message.into(),
        }
    }

    pub(crate) fn server(message: impl Into<String>) -> Self {
        Error::Server {
            message: message.into(),
        }
    }

    /// Returns true for transport failures that poison the connection.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io { .. })
    }

    /// Returns true for protocol violations.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol { .. })
    }

    /// Returns true for error replies negotiated over RESP.
    pub fn is_server_reply(&self) -> bool {
        matches!(self, Error::Server { .. })
    }

    /// The error message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::Io { message } | Error::Protocol { message } | Error::Server { message } => {
                message
            }
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io {
            message: e.to_string(),
        }
    }
}
