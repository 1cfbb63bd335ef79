//! # Async Connection
//!
//! Purpose: The same request/reply contract as `Connection`, on tokio.
//! One `AsyncConnection` can be shared by many tasks.
//!
//! ## Design Principles
//! 1. **FIFO Pairing**: a `tokio::sync::Mutex` covers each write-then-read
//!    exchange, so the Nth write on the stream always gets the Nth reply.
//!    A call dropped mid-exchange leaves its replies unread; the next
//!    exchange discards that stream rather than read them as its own.
//! 2. **Incremental Decoding**: replies are decoded from a `BytesMut`
//!    accumulator; partial frames wait for more bytes.
//! 3. **Same Policy**: transport failures go through the bounded
//!    reconnection loop, with `tokio::time::sleep` as the wait.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use resplink_common::{decode, Message, TextCodec, Writer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::commands;
use crate::config::ClientConfig;
use crate::connection::ConnectionState;
use crate::error::{ClientError, ClientResult};
use crate::event::{self, Event, EventReceiver};

struct Inner {
    stream: Option<TcpStream>,
    state: ConnectionState,
    /// Set from the first byte written until the last reply is decoded. Still
    /// set on entry means a cancelled exchange left replies on the stream.
    in_flight: bool,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

/// A shareable async RESP connection over TCP.
pub struct AsyncConnection {
    config: ClientConfig,
    writer: Writer,
    inner: Mutex<Inner>,
    events: broadcast::Sender<Event>,
}

impl AsyncConnection {
    /// Connects to `config.addr` with a single attempt.
    pub async fn connect(config: ClientConfig) -> ClientResult<Self> {
        let writer = Writer::new(config.text_codec());
        let events = event::channel(config.event_capacity);
        let conn = AsyncConnection {
            config,
            writer,
            inner: Mutex::new(Inner {
                stream: None,
                state: ConnectionState::Unconnected,
                in_flight: false,
                read_buf: BytesMut::with_capacity(8 * 1024),
                write_buf: BytesMut::with_capacity(256),
            }),
            events,
        };
        {
            let mut inner = conn.inner.lock().await;
            conn.establish(&mut inner).await?;
        }
        Ok(conn)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Text rules replies are decoded with.
    pub fn text(&self) -> &TextCodec {
        self.writer.text()
    }

    pub fn events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Sends `cmd` and parses its reply.
    pub async fn call<R: 'static>(&self, cmd: &Command<R>) -> ClientResult<R> {
        cmd.check_callable()?;
        debug!(command = cmd.name(), args = cmd.arguments().len(), "async call");
        let mut replies = self.exchange(std::slice::from_ref(cmd)).await?;
        match replies.pop() {
            Some(message) => cmd.parse(message, self.writer.text()),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Sends every command in one write and parses the replies in order.
    ///
    /// Each element is what `call` would have returned for that command;
    /// a transport failure fails the whole batch.
    pub async fn pipeline<R: 'static>(&self, cmds: &[Command<R>]) -> ClientResult<Vec<ClientResult<R>>> {
        for cmd in cmds {
            cmd.check_callable()?;
        }
        if cmds.is_empty() {
            return Ok(Vec::new());
        }
        debug!(commands = cmds.len(), "async pipeline flush");
        let replies = self.exchange(cmds).await?;
        let text = self.writer.text();
        Ok(cmds
            .iter()
            .zip(replies)
            .map(|(cmd, message)| cmd.parse(message, text))
            .collect())
    }

    /// Drops the stream; later calls fail with `NotConnected`.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(mut stream) = inner.stream.take() {
            let _ = stream.shutdown().await;
            info!(addr = %self.config.addr, "connection closed");
        }
        inner.state = ConnectionState::Closed;
    }

    async fn exchange<R: 'static>(&self, cmds: &[Command<R>]) -> ClientResult<Vec<Message>> {
        let mut inner = self.inner.lock().await;
        if inner.in_flight {
            warn!(addr = %self.config.addr, "previous exchange was cancelled, dropping stream");
            self.mark_broken(&mut inner);
        }
        inner.write_buf.clear();
        for cmd in cmds {
            cmd.encode(&self.writer, &mut inner.write_buf);
        }

        self.ensure_ready(&mut inner).await?;
        let mut replayed = false;
        loop {
            let err = match self.round_trip(&mut inner, cmds.len()).await {
                Ok(replies) => return Ok(replies),
                Err(err) => err,
            };
            if err.is_protocol() {
                warn!(error = %err, "protocol failure, dropping stream");
                self.mark_broken(&mut inner);
                return Err(err);
            }
            if !err.is_transport() {
                return Err(err);
            }
            warn!(addr = %self.config.addr, error = %err, "transport failure");
            self.mark_broken(&mut inner);
            if replayed || !self.config.reconnect.is_enabled() {
                return Err(err);
            }
            self.reconnect(&mut inner).await?;
            replayed = true;
        }
    }

    async fn round_trip(&self, inner: &mut Inner, expected: usize) -> ClientResult<Vec<Message>> {
        let Inner {
            stream,
            in_flight,
            read_buf,
            write_buf,
            ..
        } = inner;
        let stream = stream.as_mut().ok_or(ClientError::NotConnected)?;
        *in_flight = true;
        with_timeout(self.config.write_timeout, stream.write_all(&write_buf[..])).await?;
        with_timeout(self.config.write_timeout, stream.flush()).await?;

        // Leftover bytes belong to a dead exchange.
        read_buf.clear();
        let text = self.writer.text();
        let mut replies = Vec::with_capacity(expected);
        while replies.len() < expected {
            if let Some((message, used)) = decode(&read_buf[..], text)? {
                read_buf.advance(used);
                replies.push(message);
                continue;
            }
            let read = with_timeout(self.config.read_timeout, stream.read_buf(read_buf)).await?;
            if read == 0 {
                return Err(ClientError::Closed);
            }
        }
        *in_flight = false;
        Ok(replies)
    }

    async fn ensure_ready(&self, inner: &mut Inner) -> ClientResult<()> {
        if inner.stream.is_some() {
            return Ok(());
        }
        match inner.state {
            ConnectionState::Unconnected => self.establish(inner).await,
            ConnectionState::Reconnecting | ConnectionState::Connected => {
                self.reconnect(inner).await.map(|_| ())
            }
            ConnectionState::Failed | ConnectionState::Closed => Err(ClientError::NotConnected),
        }
    }

    fn mark_broken(&self, inner: &mut Inner) {
        inner.stream = None;
        inner.in_flight = false;
        inner.read_buf.clear();
        if inner.state != ConnectionState::Closed {
            inner.state = if self.config.reconnect.is_enabled() {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Failed
            };
        }
    }

    async fn establish(&self, inner: &mut Inner) -> ClientResult<()> {
        let connect = TcpStream::connect(self.config.addr.as_str());
        let stream = with_timeout(self.config.connect_timeout, connect).await?;
        stream.set_nodelay(self.config.nodelay)?;

        let mut session = Inner {
            stream: Some(stream),
            state: ConnectionState::Connected,
            in_flight: false,
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_buf: BytesMut::with_capacity(256),
        };
        let mut setup = Vec::new();
        if let Some(password) = &self.config.password {
            setup.push(commands::auth(password.as_str()));
        }
        if let Some(database) = self.config.database {
            setup.push(commands::select(database));
        }
        for cmd in &setup {
            session.write_buf.clear();
            cmd.encode(&self.writer, &mut session.write_buf);
            let mut replies = self.round_trip(&mut session, 1).await?;
            if let Some(message) = replies.pop() {
                cmd.parse(message, self.writer.text())?;
            }
        }

        inner.stream = session.stream;
        inner.state = ConnectionState::Connected;
        inner.in_flight = false;
        inner.read_buf.clear();
        info!(addr = %self.config.addr, "connected");
        Ok(())
    }

    async fn reconnect(&self, inner: &mut Inner) -> ClientResult<u32> {
        let policy = self.config.reconnect;
        inner.state = ConnectionState::Reconnecting;

        let mut attempt: u32 = 0;
        let mut last_err = None;
        while policy.allows(attempt.saturating_add(1)) {
            if attempt > 0 && !policy.wait.is_zero() {
                sleep(policy.wait).await;
            }
            attempt = attempt.saturating_add(1);

            match self.establish(inner).await {
                Ok(()) => {
                    info!(addr = %self.config.addr, attempt, "reconnected");
                    let _ = self.events.send(Event::Reconnected { attempts: attempt });
                    return Ok(attempt);
                }
                Err(ClientError::Io(err)) => {
                    warn!(addr = %self.config.addr, attempt, error = %err, "reconnect attempt failed");
                    last_err = Some(err);
                }
                Err(ClientError::Closed) => {
                    last_err = Some(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed during handshake",
                    ));
                }
                Err(err) => {
                    inner.state = ConnectionState::Failed;
                    return Err(err);
                }
            }
        }

        inner.state = ConnectionState::Failed;
        Err(ClientError::ReconnectExhausted {
            attempts: attempt,
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "reconnection disabled")),
        })
    }
}

/// Applies an optional deadline; expiry is reported as `TimedOut`.
async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => match timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "operation timed out")),
        },
        None => fut.await,
    }
}
