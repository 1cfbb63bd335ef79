//! # Connection Events
//!
//! Purpose: Notifications a connection emits while it works: reconnects,
//! transaction acknowledgements, subscription traffic and monitor lines.
//!
//! ## Design Principles
//! 1. **Drained, Not Called Back**: events go into a bounded broadcast
//!    channel; observers pull them at their own pace and never run inside
//!    the read loop.
//! 2. **Lossy Under Pressure**: a slow observer sees `RecvError::Lagged`
//!    instead of stalling the connection.

use std::fmt;

use bytes::Bytes;
use resplink_common::Arg;
use tokio::sync::broadcast;

/// Receiving end of a connection's event channel.
pub type EventReceiver = broadcast::Receiver<Event>;

/// Which subscription command produced a `ChannelChange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
}

impl ChangeKind {
    pub(crate) fn from_keyword(keyword: &[u8]) -> Option<Self> {
        match keyword {
            b"subscribe" => Some(ChangeKind::Subscribe),
            b"unsubscribe" => Some(ChangeKind::Unsubscribe),
            b"psubscribe" => Some(ChangeKind::PSubscribe),
            b"punsubscribe" => Some(ChangeKind::PUnsubscribe),
            _ => None,
        }
    }

    pub fn is_pattern(self) -> bool {
        matches!(self, ChangeKind::PSubscribe | ChangeKind::PUnsubscribe)
    }

    pub fn is_removal(self) -> bool {
        matches!(self, ChangeKind::Unsubscribe | ChangeKind::PUnsubscribe)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Subscribe => "subscribe",
            ChangeKind::Unsubscribe => "unsubscribe",
            ChangeKind::PSubscribe => "psubscribe",
            ChangeKind::PUnsubscribe => "punsubscribe",
        };
        f.write_str(name)
    }
}

/// The server confirmed a subscription change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelChange {
    pub kind: ChangeKind,
    /// Channel or pattern the change applies to; `None` when the server
    /// reports an unsubscribe with nothing subscribed.
    pub channel: Option<String>,
    /// Channels plus patterns still subscribed after this change.
    pub count: i64,
}

/// A published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub channel: String,
    /// Pattern that matched, for `psubscribe` deliveries.
    pub pattern: Option<String>,
    pub payload: Bytes,
}

/// Everything a connection reports to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The stream was rebuilt after `attempts` connection attempts.
    Reconnected { attempts: u32 },
    /// MULTI was acknowledged.
    TransactionStarted,
    /// The server answered a queued command inside a transaction.
    TransactionQueued {
        command: String,
        args: Vec<Arg>,
        status: String,
    },
    SubscriptionChanged(ChannelChange),
    Message(PubSubMessage),
    /// One line of MONITOR output.
    Monitor(String),
}

pub(crate) fn channel(capacity: usize) -> broadcast::Sender<Event> {
    // broadcast panics on a zero capacity
    let (sender, _) = broadcast::channel(capacity.max(1));
    sender
}
