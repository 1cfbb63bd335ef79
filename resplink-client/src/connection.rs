//! # Connection
//!
//! Purpose: Own one duplex stream, serialize every request/reply exchange on
//! it and rebuild it under a bounded reconnection policy when the transport
//! fails.
//!
//! ## Design Principles
//! 1. **Single Owner**: the reader/writer pair lives inside the connection
//!    and is rebuilt wholesale on reconnect; nothing else holds the stream.
//! 2. **Broken Means Gone**: after a transport or framing failure the stream
//!    is dropped, never resynchronized.
//! 3. **Bounded Retry**: reconnection is an explicit loop with a fixed wait
//!    and an attempt budget; the failed operation is retried once.
//! 4. **Exclusive Modes**: pipelines, transactions and subscriptions borrow
//!    the connection mutably, so only one can be active at a time.

use std::io::{self, Read, Write};
use std::thread;

use resplink_common::{Message, Reader, TextCodec, Writer};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::command::Command;
use crate::commands;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::event::{self, Event, EventReceiver};
use crate::reply::Parser;
use crate::transport::{ShutdownHandle, TcpTransport, Transport};

/// Lifecycle of the underlying stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No stream has been opened yet.
    Unconnected,
    Connected,
    /// The stream broke; the next operation reconnects first.
    Reconnecting,
    /// Reconnection is disabled or exhausted.
    Failed,
    /// Closed by the caller.
    Closed,
}

/// Protocol mode the stream is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Pipelining,
    Transaction,
    Subscribed,
    Monitoring,
}

/// Whether a failed operation may be replayed on a fresh stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retry {
    /// Reconnect before starting and replay once after a transport failure.
    Reconnect,
    /// Requires the current stream; failures surface as they are.
    Never,
}

/// Reader/writer pair over one live stream.
pub(crate) struct Io<S> {
    reader: Reader<S>,
    writer: Writer,
}

impl<S: Read + Write> Io<S> {
    fn new(stream: S, text: TextCodec) -> Self {
        Io {
            reader: Reader::new(stream, text),
            writer: Writer::new(text),
        }
    }

    pub(crate) fn text(&self) -> &TextCodec {
        self.writer.text()
    }

    pub(crate) fn writer(&self) -> &Writer {
        &self.writer
    }

    pub(crate) fn write_command<T: 'static>(&mut self, cmd: &Command<T>) -> ClientResult<()> {
        self.writer
            .write_to(cmd.name(), cmd.arguments(), self.reader.get_mut())?;
        Ok(())
    }

    /// Writes an already-encoded batch with a single flush.
    pub(crate) fn send(&mut self, payload: &[u8]) -> ClientResult<()> {
        let stream = self.reader.get_mut();
        stream.write_all(payload)?;
        stream.flush()?;
        Ok(())
    }

    pub(crate) fn read_message(&mut self) -> ClientResult<Message> {
        let message = self.reader.read_message()?;
        trace!(kind = %message.kind(), "reply");
        Ok(message)
    }

    pub(crate) fn round_trip<T: 'static>(&mut self, cmd: &Command<T>) -> ClientResult<T> {
        self.write_command(cmd)?;
        let message = self.read_message()?;
        cmd.parse(message, self.writer.text())
    }

    fn stream_bulk<W: Write + ?Sized>(&mut self, sink: &mut W, chunk: usize) -> ClientResult<Option<u64>> {
        Ok(self.reader.stream_bulk(sink, chunk)?)
    }
}

/// A RESP connection over a pluggable transport.
pub struct Connection<T: Transport = TcpTransport> {
    transport: T,
    config: ClientConfig,
    text: TextCodec,
    io: Option<Io<T::Stream>>,
    state: ConnectionState,
    mode: Mode,
    events: broadcast::Sender<Event>,
}

impl Connection<TcpTransport> {
    /// Connects over TCP to `config.addr`.
    pub fn open(config: ClientConfig) -> ClientResult<Self> {
        let transport = TcpTransport::from_config(&config)?;
        Connection::connect(transport, config)
    }

    /// Handle that can close the live socket from another thread.
    pub fn shutdown_handle(&self) -> ClientResult<ShutdownHandle> {
        let io = self.io.as_ref().ok_or(ClientError::NotConnected)?;
        Ok(ShutdownHandle::new(io.reader.get_ref())?)
    }
}

impl<T: Transport> Connection<T> {
    /// Creates a connection without opening a stream; the first operation
    /// connects.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        let text = config.text_codec();
        let events = event::channel(config.event_capacity);
        Connection {
            transport,
            config,
            text,
            io: None,
            state: ConnectionState::Unconnected,
            mode: Mode::Normal,
            events,
        }
    }

    /// Opens the first stream with a single attempt; the reconnection policy
    /// only applies once a connection has been established.
    pub fn connect(transport: T, config: ClientConfig) -> ClientResult<Self> {
        let mut conn = Connection::new(transport, config);
        conn.establish()?;
        Ok(conn)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn text(&self) -> &TextCodec {
        &self.text
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// True when the stream is live and in normal request/reply mode.
    pub fn is_healthy(&self) -> bool {
        self.io.is_some() && self.state == ConnectionState::Connected && self.mode == Mode::Normal
    }

    /// Subscribes to this connection's notifications.
    pub fn events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Sends `cmd` and parses its reply, reconnecting on transport failure.
    pub fn call<R: 'static>(&mut self, cmd: &Command<R>) -> ClientResult<R> {
        cmd.check_callable()?;
        debug!(command = cmd.name(), args = cmd.arguments().len(), "call");
        self.run(Retry::Reconnect, |io| io.round_trip(cmd))
    }

    /// Sends `cmd` without reading its reply.
    ///
    /// Pair every `write` with one `read`. A write is replayed after a
    /// reconnect; the matching read is not, since the reply died with the
    /// old stream.
    pub fn write<R: 'static>(&mut self, cmd: &Command<R>) -> ClientResult<()> {
        cmd.check_callable()?;
        debug!(command = cmd.name(), args = cmd.arguments().len(), "write");
        self.run(Retry::Reconnect, |io| io.write_command(cmd))
    }

    /// Reads the next reply and parses it with `parser`.
    pub fn read<R: 'static>(&mut self, parser: &Parser<R>) -> ClientResult<R> {
        self.run(Retry::Never, |io| {
            let message = io.read_message()?;
            parser.parse(message, io.text())
        })
    }

    /// Reads the next reply undecoded, error replies included.
    pub fn read_message(&mut self) -> ClientResult<Message> {
        self.run(Retry::Never, |io| io.read_message())
    }

    /// Sends `cmd` and copies its bulk reply into `sink` in chunks of the
    /// configured size. Returns `None` for a null bulk.
    pub fn stream_to<R: 'static, W: Write + ?Sized>(
        &mut self,
        cmd: &Command<R>,
        sink: &mut W,
    ) -> ClientResult<Option<u64>> {
        let chunk = self.config.stream_chunk_size;
        self.stream_to_with(cmd, sink, chunk)
    }

    /// `stream_to` with an explicit chunk size.
    pub fn stream_to_with<R: 'static, W: Write + ?Sized>(
        &mut self,
        cmd: &Command<R>,
        sink: &mut W,
        chunk: usize,
    ) -> ClientResult<Option<u64>> {
        cmd.check_callable()?;
        debug!(command = cmd.name(), chunk, "stream");
        self.run(Retry::Reconnect, |io| io.write_command(cmd))?;
        // Bytes may already be in the sink once reading starts.
        self.run(Retry::Never, |io| io.stream_bulk(&mut *sink, chunk))
    }

    /// Drops the current stream and connects again.
    ///
    /// Uses the reconnection policy when it is enabled, otherwise makes one
    /// attempt. Clears a `Failed` or `Closed` state on success.
    pub fn reconnect(&mut self) -> ClientResult<()> {
        self.io = None;
        if self.config.reconnect.is_enabled() {
            self.reconnect_with_policy().map(|_| ())
        } else {
            self.establish().map_err(|err| {
                self.state = ConnectionState::Failed;
                err
            })
        }
    }

    /// Drops the stream; later operations fail with `NotConnected`.
    pub fn close(&mut self) {
        if self.io.take().is_some() {
            info!(addr = %self.config.addr, "connection closed");
        }
        self.state = ConnectionState::Closed;
        self.mode = Mode::Normal;
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub(crate) fn publish(&self, event: Event) {
        // No receivers is not an error.
        let _ = self.events.send(event);
    }

    /// Forgets the stream; it is in an unknown position.
    pub(crate) fn mark_broken(&mut self) {
        self.io = None;
        self.mode = Mode::Normal;
        if self.state != ConnectionState::Closed {
            self.state = if self.config.reconnect.is_enabled() {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Failed
            };
        }
    }

    /// Makes sure a stream is available, reconnecting if the state allows.
    pub(crate) fn ensure_ready(&mut self) -> ClientResult<()> {
        if self.io.is_some() && self.mode != Mode::Normal {
            // An overlay was leaked without cleanup.
            warn!(mode = ?self.mode, "stream left in overlay mode, reconnecting");
            self.mark_broken();
        }
        if self.io.is_some() {
            return Ok(());
        }
        match self.state {
            ConnectionState::Unconnected => self.establish(),
            ConnectionState::Reconnecting => self.reconnect_with_policy().map(|_| ()),
            ConnectionState::Connected => {
                self.mark_broken();
                self.ensure_ready()
            }
            ConnectionState::Failed | ConnectionState::Closed => Err(ClientError::NotConnected),
        }
    }

    /// Runs `op` against the live stream.
    ///
    /// Transport and protocol failures mark the stream broken. With
    /// `Retry::Reconnect` a transport failure triggers the reconnection loop
    /// and one replay of `op`.
    pub(crate) fn run<R>(
        &mut self,
        retry: Retry,
        mut op: impl FnMut(&mut Io<T::Stream>) -> ClientResult<R>,
    ) -> ClientResult<R> {
        if retry == Retry::Reconnect {
            self.ensure_ready()?;
        }
        let mut replayed = false;
        loop {
            let io = self.io.as_mut().ok_or(ClientError::NotConnected)?;
            let err = match op(io) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if err.is_protocol() {
                warn!(error = %err, "protocol failure, dropping stream");
                self.mark_broken();
                return Err(err);
            }
            if !err.is_transport() {
                return Err(err);
            }

            warn!(addr = %self.config.addr, error = %err, "transport failure");
            self.mark_broken();
            if retry == Retry::Never || replayed || !self.config.reconnect.is_enabled() {
                return Err(err);
            }
            self.reconnect_with_policy()?;
            replayed = true;
        }
    }

    /// Opens a stream and replays the session setup (AUTH, SELECT).
    fn establish(&mut self) -> ClientResult<()> {
        let stream = self.transport.connect()?;
        let mut io = Io::new(stream, self.text);
        if let Some(password) = &self.config.password {
            io.round_trip(&commands::auth(password.as_str()))?;
        }
        if let Some(database) = self.config.database {
            io.round_trip(&commands::select(database))?;
        }
        self.io = Some(io);
        self.state = ConnectionState::Connected;
        self.mode = Mode::Normal;
        info!(addr = %self.config.addr, "connected");
        Ok(())
    }

    fn reconnect_with_policy(&mut self) -> ClientResult<u32> {
        let policy = self.config.reconnect;
        self.state = ConnectionState::Reconnecting;

        let mut attempt: u32 = 0;
        let mut last_err = None;
        while policy.allows(attempt.saturating_add(1)) {
            if attempt > 0 && !policy.wait.is_zero() {
                thread::sleep(policy.wait);
            }
            attempt = attempt.saturating_add(1);

            match self.establish() {
                Ok(()) => {
                    info!(addr = %self.config.addr, attempt, "reconnected");
                    self.publish(Event::Reconnected { attempts: attempt });
                    return Ok(attempt);
                }
                Err(ClientError::Io(err)) => {
                    warn!(addr = %self.config.addr, attempt, error = %err, "reconnect attempt failed");
                    last_err = Some(err);
                }
                Err(ClientError::Closed) => {
                    warn!(addr = %self.config.addr, attempt, "closed during handshake");
                    last_err = Some(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed during handshake",
                    ));
                }
                Err(err) => {
                    // Setup rejected by the server; retrying will not help.
                    self.state = ConnectionState::Failed;
                    return Err(err);
                }
            }
        }

        self.state = ConnectionState::Failed;
        Err(ClientError::ReconnectExhausted {
            attempts: attempt,
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "reconnection disabled")),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::config::ReconnectPolicy;
    use crate::error::UsageError;
    use crate::reply;

    /// Replies come from a fixed script; writes are recorded.
    struct Scripted {
        input: Cursor<Vec<u8>>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct ScriptTransport {
        scripts: VecDeque<&'static [u8]>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Transport for ScriptTransport {
        type Stream = Scripted;

        fn connect(&mut self) -> io::Result<Scripted> {
            let script = self
                .scripts
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no script"))?;
            Ok(Scripted {
                input: Cursor::new(script.to_vec()),
                written: self.written.clone(),
            })
        }
    }

    fn scripted(
        scripts: Vec<&'static [u8]>,
        policy: ReconnectPolicy,
    ) -> (Connection<ScriptTransport>, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptTransport {
            scripts: scripts.into(),
            written: written.clone(),
        };
        let mut config = ClientConfig::default();
        config.reconnect = policy;
        (Connection::new(transport, config), written)
    }

    #[test]
    fn lazy_connection_connects_on_first_call() {
        let (mut conn, written) = scripted(vec![&b"+PONG\r\n"[..]], ReconnectPolicy::disabled());
        assert_eq!(conn.state(), ConnectionState::Unconnected);
        assert_eq!(conn.call(&commands::ping()).unwrap(), "PONG");
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(&written.lock().unwrap()[..], b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn replays_after_eof_and_reports_reconnect() {
        let (mut conn, _) = scripted(
            vec![&b""[..], &b"$5\r\nhello\r\n"[..]],
            ReconnectPolicy::limited(1, Duration::ZERO),
        );
        let mut events = conn.events();
        let value = conn.call(&commands::get("k")).unwrap();
        assert_eq!(value.as_deref(), Some(&b"hello"[..]));
        assert_eq!(events.try_recv().unwrap(), Event::Reconnected { attempts: 1 });
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn disabled_policy_fails_and_stays_failed() {
        let (mut conn, _) = scripted(vec![&b""[..], &b"+PONG\r\n"[..]], ReconnectPolicy::disabled());
        assert!(matches!(conn.call(&commands::ping()), Err(ClientError::Closed)));
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(matches!(conn.call(&commands::ping()), Err(ClientError::NotConnected)));
    }

    #[test]
    fn exhausted_policy_reports_attempts() {
        let (mut conn, _) = scripted(vec![&b""[..]], ReconnectPolicy::limited(2, Duration::ZERO));
        match conn.call(&commands::ping()) {
            Err(ClientError::ReconnectExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[test]
    fn server_error_keeps_stream() {
        let (mut conn, _) = scripted(
            vec![&b"-ERR bad\r\n+PONG\r\n"[..]],
            ReconnectPolicy::disabled(),
        );
        let err = conn.call(&commands::ping()).unwrap_err();
        assert_eq!(err.server_message(), Some("ERR bad"));
        assert!(conn.is_healthy());
        assert_eq!(conn.call(&commands::ping()).unwrap(), "PONG");
    }

    #[test]
    fn protocol_error_drops_stream() {
        let (mut conn, _) = scripted(vec![&b"?oops\r\n"[..]], ReconnectPolicy::disabled());
        assert!(conn.call(&commands::ping()).unwrap_err().is_protocol());
        assert!(!conn.is_healthy());
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[test]
    fn split_write_and_read() {
        let (mut conn, written) = scripted(vec![&b":1\r\n:2\r\n"[..]], ReconnectPolicy::disabled());
        conn.write(&commands::incr("a")).unwrap();
        conn.write(&commands::incr("b")).unwrap();
        assert_eq!(conn.read(&reply::integer()).unwrap(), 1);
        assert_eq!(conn.read_message().unwrap(), Message::Integer(2));
        assert_eq!(written.lock().unwrap().iter().filter(|b| **b == b'*').count(), 2);
    }

    #[test]
    fn reserved_commands_are_refused() {
        let (mut conn, _) = scripted(vec![], ReconnectPolicy::disabled());
        assert!(matches!(
            conn.call(&Command::raw("SUBSCRIBE").arg("x")),
            Err(ClientError::Usage(UsageError::ReservedCommand(_)))
        ));
        assert_eq!(conn.state(), ConnectionState::Unconnected);
    }

    #[test]
    fn streams_bulk_into_sink() {
        let (mut conn, _) = scripted(vec![&b"$11\r\nhello world\r\n$-1\r\n"[..]], ReconnectPolicy::disabled());
        let mut sink = Vec::new();
        assert_eq!(conn.stream_to_with(&commands::get("k"), &mut sink, 4).unwrap(), Some(11));
        assert_eq!(sink, b"hello world");
        assert_eq!(conn.stream_to(&commands::get("k"), &mut sink).unwrap(), None);
    }

    #[test]
    fn handshake_sends_auth_and_select() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptTransport {
            scripts: vec![&b"+OK\r\n+OK\r\n+PONG\r\n"[..]].into(),
            written: written.clone(),
        };
        let mut config = ClientConfig::default();
        config.password = Some("secret".into());
        config.database = Some(3);
        let mut conn = Connection::connect(transport, config).unwrap();
        assert_eq!(conn.call(&commands::ping()).unwrap(), "PONG");

        let sent = written.lock().unwrap();
        let expected: &[u8] = b"*2\r\n$4\r\nAUTH\r\n$6\r\nsecret\r\n*2\r\n$6\r\nSELECT\r\n$1\r\n3\r\n*1\r\n$4\r\nPING\r\n";
        assert_eq!(&sent[..], expected);
    }

    #[test]
    fn close_is_final_until_reconnect() {
        let (mut conn, _) = scripted(vec![&b""[..], &b"+PONG\r\n"[..]], ReconnectPolicy::disabled());
        conn.ensure_ready().unwrap();
        conn.close();
        assert!(matches!(conn.call(&commands::ping()), Err(ClientError::NotConnected)));
        conn.reconnect().unwrap();
        assert_eq!(conn.call(&commands::ping()).unwrap(), "PONG");
    }
}
