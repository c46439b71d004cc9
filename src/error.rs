//! The core's internal error taxonomy for the codec/transport layer below
//! the session's own command handlers.
//!
//! [`crate::command::Command::parse`] and [`crate::reader::read_line_timeout`]
//! return a [`SessionError`] rather than an opaque `anyhow::Error`, so the
//! session loop can match on *kind* and pick the right wire response instead
//! of string-matching an error chain. Errors that describe a single
//! command's outcome once it has already been parsed and dispatched — a bad
//! sequence, a filter denial, a failed store call — are represented
//! directly as a [`Response`] in `session::DispatchOutcome`, since by that
//! point the handler already knows exactly which reply to send and an
//! intermediate error type would only be pass-through. The outer
//! orchestration layer (`Server::run`, `lib::run`, configuration loading)
//! keeps using `anyhow::Result` the way the rest of this codebase does.

use thiserror::Error;

use crate::response::Response;

/// Failures from parsing a command line or reading one off the wire.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed verb/argument/parameter or an oversize command line.
    #[error("protocol syntax error: {0}")]
    ProtocolSyntax(String),

    /// A command or DATA idle timeout elapsed.
    #[error("operation timed out")]
    TransportTimeout,

    /// The peer reset the connection, the TLS handshake failed, or the pipe
    /// broke.
    #[error("transport fault: {0}")]
    TransportFault(#[from] std::io::Error),
}

impl SessionError {
    /// The wire response this error should produce, if the session is meant
    /// to keep running afterwards. Errors that map to `None` always close
    /// the connection (the caller is responsible for writing a final
    /// response first if the transport still permits it).
    pub fn response(&self) -> Option<Response> {
        match self {
            SessionError::ProtocolSyntax(msg) => Some(Response::syntax_error(msg)),
            SessionError::TransportTimeout => None,
            SessionError::TransportFault(_) => None,
        }
    }
}
