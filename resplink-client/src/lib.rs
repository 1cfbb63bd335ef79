//! # resplink Client
//!
//! Purpose: A blocking and an async RESP client built on `resplink-common`:
//! typed commands, a reconnecting connection, and pipeline, transaction and
//! subscription modes.
//!
//! ## Design Principles
//! 1. **Replies In Order**: RESP has no correlation ids, so every layer keeps
//!    the Nth reply paired with the Nth request.
//! 2. **Parsers Are Values**: a `Command<T>` carries the function that turns
//!    its reply into `T`.
//! 3. **Modes Borrow The Connection**: overlays hold `&mut Connection`, so
//!    at most one mode is active and it ends when the overlay is dropped.
//! 4. **Bounded Recovery**: transport failures are retried through an
//!    explicit, bounded reconnection loop.

pub mod aio;
pub mod batch;
pub mod client;
pub mod command;
pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod pipeline;
pub mod pool;
pub mod reply;
pub mod subscription;
pub mod transaction;
pub mod transport;

pub use aio::AsyncConnection;
pub use batch::{Replies, Slot};
pub use client::Client;
pub use command::Command;
pub use commands::Ttl;
pub use config::{Attempts, ClientConfig, ReconnectPolicy};
pub use connection::{Connection, ConnectionState, Mode};
pub use error::{ClientError, ClientResult, UsageError};
pub use event::{ChangeKind, ChannelChange, Event, EventReceiver, PubSubMessage};
pub use pipeline::Pipeline;
pub use pool::{ConnectionPool, PooledConnection};
pub use reply::{Parser, ScanPage};
pub use subscription::{Monitor, PubSubEvent, Subscription};
pub use transaction::Transaction;
pub use transport::{ShutdownHandle, TcpTransport, Transport};

pub use resplink_common::{Arg, Charset, Kind, Message, NumberFormat, ProtocolError, TextCodec};
