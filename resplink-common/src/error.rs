//! # Codec Errors
//!
//! Purpose: Separate the three ways a RESP exchange can go wrong at the codec
//! level so higher layers can apply different recovery rules to each.
//!
//! ## Design Principles
//! 1. **Transport vs. Framing**: I/O failures are retryable, framing failures
//!    mean the stream is desynchronized and must not be reused.
//! 2. **Server Replies Are Data**: `-ERR` only becomes an error when a caller
//!    asked for a non-error reply.

use std::io;

use crate::message::Kind;

/// Result alias used throughout the codec.
pub type RespResult<T> = Result<T, RespError>;

/// Framing violations detected while decoding or validating replies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The leading byte is not one of `+ - : $ *`.
    #[error("invalid type tag: {0:#04x}")]
    InvalidTag(u8),

    /// An integer or length field is not a valid signed decimal.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// A length below -1, or a bulk length above `MAX_BULK_LEN`.
    #[error("invalid length: {0}")]
    InvalidLength(i64),

    /// A line or bulk payload was not terminated by CRLF.
    #[error("missing CRLF terminator")]
    MissingCrlf,

    /// Text could not be decoded with the configured charset.
    #[error("invalid text for configured charset")]
    InvalidText,

    /// The reply kind does not match what the parser requires.
    #[error("expected {expected} reply, found {found}")]
    UnexpectedKind { expected: Kind, found: Kind },

    /// A composite parser saw a different element count than it registered.
    #[error("expected {expected} elements, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    /// The reply has the right kind but unusable content.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    /// Multi-bulk nesting exceeded the decoder's depth limit.
    #[error("nesting too deep: depth {0} exceeds limit")]
    NestingTooDeep(usize),
}

/// Errors surfaced by the RESP reader and writer.
#[derive(Debug, thiserror::Error)]
pub enum RespError {
    /// Network or stream failure (reset, timeout, broken pipe).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream while a reply was expected.
    #[error("connection closed by peer")]
    Closed,

    /// The stream carried bytes that are not valid RESP.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered with an error reply.
    #[error("server error: {0}")]
    Server(String),
}

impl RespError {
    /// Returns true for failures of the underlying transport.
    #[inline]
    pub fn is_transport(&self) -> bool {
        matches!(self, RespError::Io(_) | RespError::Closed)
    }

    /// Returns true when the stream can no longer be trusted to be in sync.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RespError::Server(_))
    }

    pub(crate) fn unexpected_kind(expected: Kind, found: Kind) -> Self {
        RespError::Protocol(ProtocolError::UnexpectedKind { expected, found })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification() {
        let io = RespError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(io.is_transport());
        assert!(RespError::Closed.is_transport());
        assert!(!RespError::Protocol(ProtocolError::MissingCrlf).is_transport());
        assert!(!RespError::Server("ERR".into()).is_transport());
    }

    #[test]
    fn server_errors_are_not_fatal() {
        assert!(!RespError::Server("ERR wrong type".into()).is_fatal());
        assert!(RespError::Closed.is_fatal());
        assert!(RespError::Protocol(ProtocolError::InvalidTag(b'?')).is_fatal());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            ProtocolError::InvalidTag(0x42).to_string(),
            "invalid type tag: 0x42"
        );
        assert_eq!(
            ProtocolError::UnexpectedKind {
                expected: Kind::Bulk,
                found: Kind::Integer
            }
            .to_string(),
            "expected bulk reply, found integer"
        );
        assert_eq!(
            RespError::Server("ERR bad".into()).to_string(),
            "server error: ERR bad"
        );
    }
}
