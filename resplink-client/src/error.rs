//! # Client Errors
//!
//! Purpose: One error type for every client operation, keeping the four
//! failure families of the protocol distinct: transport, protocol, server and
//! usage.

use std::io;

use resplink_common::{ProtocolError, RespError};

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Misuse of the client API; never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    /// Mode-switching commands must go through their overlay.
    #[error("{0} must be issued through its dedicated API")]
    ReservedCommand(String),

    /// MULTI issued while a transaction is already open.
    #[error("transaction already active")]
    TransactionActive,

    /// EXEC or DISCARD issued without MULTI.
    #[error("no active transaction")]
    NoTransaction,

    /// SUBSCRIBE/PSUBSCRIBE need at least one channel.
    #[error("channel list must not be empty")]
    EmptyChannelList,

    /// Subscription operation after the subscription ended.
    #[error("not subscribed")]
    NotSubscribed,

    /// A command needs a name.
    #[error("command name must not be empty")]
    EmptyCommand,

    /// The slot was issued by a different pipeline or transaction.
    #[error("slot does not belong to this batch")]
    ForeignSlot,
}

/// Errors surfaced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[source] io::Error),

    /// The server closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// RESP framing or reply-shape error.
    #[error("protocol error: {0}")]
    Protocol(#[source] ProtocolError),

    /// Server returned an error reply.
    #[error("server error: {message}")]
    Server { message: String },

    /// The API was used out of order.
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    /// Every reconnection attempt failed.
    #[error("reconnect failed after {attempts} attempt(s): {source}")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// The connection has no usable stream and reconnection is disabled.
    #[error("not connected")]
    NotConnected,

    /// EXEC returned null (a watched key changed).
    #[error("transaction aborted")]
    TransactionAborted,

    /// The queued command was dropped by DISCARD.
    #[error("transaction discarded")]
    TransactionDiscarded,

    /// Pool is at capacity and no idle connections are available.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ClientError {
    /// Failures of the byte stream itself; these trigger reconnection.
    pub fn is_transport(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::Closed)
    }

    /// Failures that leave the stream in an unknown position.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ClientError::Protocol(_))
    }

    /// Server error text, if this is a server error.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ClientError::Server { message } => Some(message),
            _ => None,
        }
    }

    pub(crate) fn server(message: impl Into<String>) -> Self {
        ClientError::Server {
            message: message.into(),
        }
    }
}

impl From<RespError> for ClientError {
    fn from(err: RespError) -> Self {
        match err {
            RespError::Io(err) => ClientError::Io(err),
            RespError::Closed => ClientError::Closed,
            RespError::Protocol(err) => ClientError::Protocol(err),
            RespError::Server(message) => ClientError::Server { message },
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(err: ProtocolError) -> Self {
        ClientError::Protocol(err)
    }
}

impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        ClientError::Io(err)
    }
}
