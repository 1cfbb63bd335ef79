//! # Subscriptions
//!
//! Purpose: Pub/sub and MONITOR modes, where the server pushes frames
//! instead of answering requests. Both are exposed as iterators the caller
//! drains at its own pace.
//!
//! ## Design Principles
//! 1. **Pull, Don't Push**: frames are decoded only when `next` is called;
//!    handlers registered with `on_message` run on the caller's thread.
//! 2. **Lifetime = Mode**: the iterator borrows the connection. Dropping it
//!    while the server still pushes frames marks the stream broken, so the
//!    next request starts on a fresh connection.
//!
//! ## Usage Notes
//! - The iterator ends once the server reports zero subscriptions and every
//!   command sent in subscribed mode has been acknowledged, or after a
//!   transport failure.
//! - Server error replies are yielded. An error that rejects the initial
//!   SUBSCRIBE ends iteration; otherwise iteration continues.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use bytes::Bytes;
use resplink_common::{Arg, Message, ProtocolError, TextCodec};
use tracing::{debug, warn};

use crate::command::Command;
use crate::connection::{Connection, Mode, Retry};
use crate::error::{ClientError, ClientResult, UsageError};
use crate::event::{ChangeKind, ChannelChange, Event, PubSubMessage};
use crate::reply;
use crate::transport::Transport;

/// One frame received in subscribed mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubEvent {
    Changed(ChannelChange),
    Message(PubSubMessage),
    /// Answer to `Subscription::ping`.
    Pong(Bytes),
}

type Handler<'a> = Box<dyn FnMut(&PubSubMessage) + Send + 'a>;

/// Replies still owed for a command sent in subscribed mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// One acknowledgement per named channel or pattern.
    Acks(usize),
    /// Argument-less (P)UNSUBSCRIBE: one acknowledgement per tracked
    /// name of that kind, or a single one naming nothing.
    AllOf(ChangeKind),
    Pong,
}

/// A connection in subscribed mode.
pub struct Subscription<'a, T: Transport> {
    conn: &'a mut Connection<T>,
    handlers: HashMap<String, Handler<'a>>,
    channels: HashSet<String>,
    patterns: HashSet<String>,
    pending: VecDeque<Pending>,
    count: i64,
    active: bool,
}

impl<T: Transport> Connection<T> {
    /// Subscribes to `channels` and switches to subscribed mode.
    pub fn subscribe<I, A>(&mut self, channels: I) -> ClientResult<Subscription<'_, T>>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.enter_subscription("SUBSCRIBE", collect(channels)?)
    }

    /// Subscribes to channel `patterns` and switches to subscribed mode.
    pub fn psubscribe<I, A>(&mut self, patterns: I) -> ClientResult<Subscription<'_, T>>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.enter_subscription("PSUBSCRIBE", collect(patterns)?)
    }

    /// Sends MONITOR and returns the stream of monitor lines.
    pub fn monitor(&mut self) -> ClientResult<Monitor<'_, T>> {
        self.ensure_ready()?;
        let monitor = Command::new("MONITOR", reply::ok());
        self.run(Retry::Never, |io| io.round_trip(&monitor))?;
        self.set_mode(Mode::Monitoring);
        debug!("monitor started");
        Ok(Monitor {
            conn: self,
            active: true,
        })
    }

    fn enter_subscription(&mut self, keyword: &str, args: Vec<Arg>) -> ClientResult<Subscription<'_, T>> {
        self.ensure_ready()?;
        let cmd = Command::raw(keyword).args(args);
        self.run(Retry::Never, |io| io.write_command(&cmd))?;
        self.set_mode(Mode::Subscribed);
        let acks = cmd.arguments().len();
        debug!(command = keyword, channels = acks, "subscription started");
        Ok(Subscription {
            conn: self,
            handlers: HashMap::new(),
            channels: HashSet::new(),
            patterns: HashSet::new(),
            pending: VecDeque::from([Pending::Acks(acks)]),
            count: 0,
            active: true,
        })
    }
}

fn collect<I, A>(channels: I) -> ClientResult<Vec<Arg>>
where
    I: IntoIterator<Item = A>,
    A: Into<Arg>,
{
    let args: Vec<Arg> = channels.into_iter().map(Into::into).collect();
    if args.is_empty() {
        return Err(UsageError::EmptyChannelList.into());
    }
    Ok(args)
}

impl<'a, T: Transport> Subscription<'a, T> {
    pub fn subscribe<I, A>(&mut self, channels: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let args = collect(channels)?;
        self.send("SUBSCRIBE", args)
    }

    pub fn psubscribe<I, A>(&mut self, patterns: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let args = collect(patterns)?;
        self.send("PSUBSCRIBE", args)
    }

    /// Unsubscribes from `channels`; an empty list means all channels.
    pub fn unsubscribe<I, A>(&mut self, channels: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let args = channels.into_iter().map(Into::into).collect();
        self.send("UNSUBSCRIBE", args)
    }

    /// Unsubscribes from `patterns`; an empty list means all patterns.
    pub fn punsubscribe<I, A>(&mut self, patterns: I) -> ClientResult<()>
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        let args = patterns.into_iter().map(Into::into).collect();
        self.send("PUNSUBSCRIBE", args)
    }

    /// Asks the server for a `Pong` frame, e.g. as a keepalive.
    pub fn ping(&mut self) -> ClientResult<()> {
        self.send("PING", Vec::new())
    }

    /// Runs `handler` for every message on `channel`, or on `pattern` for
    /// pattern deliveries. The message is still yielded by the iterator.
    pub fn on_message<F>(&mut self, channel: impl Into<String>, handler: F)
    where
        F: FnMut(&PubSubMessage) + Send + 'a,
    {
        self.handlers.insert(channel.into(), Box::new(handler));
    }

    /// Channels plus patterns subscribed, as last reported by the server.
    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    fn send(&mut self, keyword: &str, args: Vec<Arg>) -> ClientResult<()> {
        if !self.active {
            return Err(UsageError::NotSubscribed.into());
        }
        let expected = match (keyword, args.is_empty()) {
            ("PING", _) => Pending::Pong,
            ("UNSUBSCRIBE", true) => Pending::AllOf(ChangeKind::Unsubscribe),
            ("PUNSUBSCRIBE", true) => Pending::AllOf(ChangeKind::PUnsubscribe),
            _ => Pending::Acks(args.len()),
        };
        let cmd = Command::raw(keyword).args(args);
        debug!(command = keyword, channels = cmd.arguments().len(), "subscription change");
        match self.conn.run(Retry::Never, |io| io.write_command(&cmd)) {
            Ok(()) => {
                self.pending.push_back(expected);
                Ok(())
            }
            Err(err) => {
                self.active = false;
                Err(err)
            }
        }
    }

    /// Applies an acknowledgement to the tracked names and the oldest
    /// command still waiting for replies.
    fn acknowledge(&mut self, change: &ChannelChange) {
        let names = if change.kind.is_pattern() {
            &mut self.patterns
        } else {
            &mut self.channels
        };
        if let Some(name) = &change.channel {
            if change.kind.is_removal() {
                names.remove(name);
            } else {
                names.insert(name.clone());
            }
        }
        let emptied = names.is_empty();

        match self.pending.front_mut() {
            Some(Pending::Acks(left)) => {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    self.pending.pop_front();
                }
            }
            Some(Pending::AllOf(kind)) if *kind == change.kind => {
                if change.channel.is_none() || emptied {
                    self.pending.pop_front();
                }
            }
            _ => {}
        }
    }

    /// Leaves subscribed mode once nothing is subscribed and no reply is owed.
    fn finish_if_idle(&mut self) {
        if self.count == 0 && self.pending.is_empty() {
            // The server is back in request/reply mode.
            self.active = false;
            self.conn.set_mode(Mode::Normal);
            debug!("subscription ended");
        }
    }

    fn dispatch(&mut self, message: Message) -> ClientResult<PubSubEvent> {
        let event = decode_frame(message, self.conn.text())?;
        match &event {
            PubSubEvent::Changed(change) => {
                self.count = change.count;
                self.acknowledge(change);
                self.conn.publish(Event::SubscriptionChanged(change.clone()));
                self.finish_if_idle();
            }
            PubSubEvent::Message(msg) => {
                let key = msg.pattern.as_deref().unwrap_or(&msg.channel);
                if let Some(handler) = self.handlers.get_mut(key) {
                    handler(msg);
                }
                self.conn.publish(Event::Message(msg.clone()));
            }
            PubSubEvent::Pong(_) => {
                if self.pending.front() == Some(&Pending::Pong) {
                    self.pending.pop_front();
                }
                self.finish_if_idle();
            }
        }
        Ok(event)
    }
}

impl<T: Transport> Iterator for Subscription<'_, T> {
    type Item = ClientResult<PubSubEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.active {
            return None;
        }
        let message = match self.conn.run(Retry::Never, |io| io.read_message()) {
            Ok(message) => message,
            Err(err) => {
                self.active = false;
                return Some(Err(err));
            }
        };
        if let Message::Error(err) = message {
            // A rejected command answers with one error instead of its acks.
            self.pending.pop_front();
            self.finish_if_idle();
            return Some(Err(ClientError::server(err)));
        }
        match self.dispatch(message) {
            Ok(event) => Some(Ok(event)),
            Err(err) => {
                self.active = false;
                self.conn.mark_broken();
                Some(Err(err))
            }
        }
    }
}

impl<T: Transport> Drop for Subscription<'_, T> {
    fn drop(&mut self) {
        if self.active {
            warn!(count = self.count, "subscription dropped while active, dropping stream");
            self.conn.mark_broken();
        }
    }
}

impl<T: Transport> fmt::Debug for Subscription<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("count", &self.count)
            .field("active", &self.active)
            .field("pending", &self.pending.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Decodes one pushed multi-bulk frame.
fn decode_frame(message: Message, text: &TextCodec) -> ClientResult<PubSubEvent> {
    let items = match message {
        Message::MultiBulk(Some(items)) => items,
        other => {
            return Err(ProtocolError::UnexpectedReply(format!(
                "expected push frame, got {} reply",
                other.kind()
            ))
            .into())
        }
    };
    let mut items = items.into_iter();
    let keyword = match items.next() {
        Some(Message::Bulk(Some(keyword))) => keyword,
        _ => return Err(ProtocolError::UnexpectedReply("push frame without keyword".into()).into()),
    };

    if let Some(kind) = ChangeKind::from_keyword(&keyword) {
        let channel = match items.next() {
            Some(Message::Bulk(Some(name))) => Some(text.decode(&name)?),
            Some(Message::Bulk(None)) => None,
            _ => return Err(malformed(&keyword)),
        };
        let count = match items.next() {
            Some(Message::Integer(count)) => count,
            _ => return Err(malformed(&keyword)),
        };
        return Ok(PubSubEvent::Changed(ChannelChange {
            kind,
            channel,
            count,
        }));
    }

    let mut next_bulk = || match items.next() {
        Some(Message::Bulk(Some(data))) => Ok(data),
        _ => Err(malformed(&keyword)),
    };
    match &keyword[..] {
        b"message" => {
            let channel = text.decode(&next_bulk()?)?;
            let payload = next_bulk()?;
            Ok(PubSubEvent::Message(PubSubMessage {
                channel,
                pattern: None,
                payload,
            }))
        }
        b"pmessage" => {
            let pattern = text.decode(&next_bulk()?)?;
            let channel = text.decode(&next_bulk()?)?;
            let payload = next_bulk()?;
            Ok(PubSubEvent::Message(PubSubMessage {
                channel,
                pattern: Some(pattern),
                payload,
            }))
        }
        b"pong" => Ok(PubSubEvent::Pong(next_bulk()?)),
        _ => Err(malformed(&keyword)),
    }
}

fn malformed(keyword: &[u8]) -> ClientError {
    ProtocolError::UnexpectedReply(format!(
        "malformed {} frame",
        String::from_utf8_lossy(keyword)
    ))
    .into()
}

/// A connection streaming MONITOR output.
pub struct Monitor<'a, T: Transport> {
    conn: &'a mut Connection<T>,
    active: bool,
}

impl<T: Transport> Iterator for Monitor<'_, T> {
    type Item = ClientResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.active {
            return None;
        }
        match self.conn.run(Retry::Never, |io| io.read_message()) {
            Ok(Message::Status(line)) => {
                self.conn.publish(Event::Monitor(line.clone()));
                Some(Ok(line))
            }
            Ok(Message::Error(err)) => Some(Err(ClientError::server(err))),
            Ok(other) => {
                self.active = false;
                self.conn.mark_broken();
                Some(Err(ProtocolError::UnexpectedReply(format!(
                    "expected monitor line, got {} reply",
                    other.kind()
                ))
                .into()))
            }
            Err(err) => {
                self.active = false;
                Some(Err(err))
            }
        }
    }
}

impl<T: Transport> Drop for Monitor<'_, T> {
    fn drop(&mut self) {
        // MONITOR cannot be left without closing the stream.
        if self.active {
            self.conn.mark_broken();
        }
    }
}
