#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::Duration;

use resplink_client::{ClientConfig, ReconnectPolicy, Transport};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Routes client logs to the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub type Handler = fn(usize, Vec<Vec<u8>>, &mut TcpStream);

/// Accepts one connection and answers `expected_commands` requests.
pub fn spawn_server(expected_commands: usize, handler: Handler) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
        // Keep the socket open until the client is done with it.
        let mut rest = Vec::new();
        let _ = reader.read_to_end(&mut rest);
    });

    addr
}

pub fn read_command(reader: &mut BufReader<TcpStream>) -> io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?.ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "eof"))?;
    if line.first() != Some(&b'*') {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "eof"))?;
        if line.first() != Some(&b'$') {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "missing crlf"));
        }
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "length"))
}

pub fn write_raw(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(data);
    let _ = stream.flush();
}

pub fn write_simple(stream: &mut TcpStream, msg: &str) {
    write_raw(stream, format!("+{}\r\n", msg).as_bytes());
}

pub fn write_error(stream: &mut TcpStream, msg: &str) {
    write_raw(stream, format!("-{}\r\n", msg).as_bytes());
}

pub fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    write_raw(stream, &out);
}

pub fn write_null(stream: &mut TcpStream) {
    write_raw(stream, b"$-1\r\n");
}

pub fn write_integer(stream: &mut TcpStream, value: i64) {
    write_raw(stream, format!(":{}\r\n", value).as_bytes());
}

pub fn config_with_addr(addr: String) -> ClientConfig {
    let mut config = ClientConfig::new(addr);
    config.max_idle = 1;
    config.max_total = 1;
    config.read_timeout = Some(Duration::from_secs(1));
    config.write_timeout = Some(Duration::from_secs(1));
    config.connect_timeout = Some(Duration::from_secs(1));
    config
}

pub fn config_with_policy(policy: ReconnectPolicy) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.reconnect = policy;
    config
}

/// In-memory stream: replies come from a script, writes are recorded.
pub struct MockStream {
    input: Cursor<Vec<u8>>,
    written: Arc<Mutex<Vec<u8>>>,
    fail_reads: Option<io::ErrorKind>,
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(kind) = self.fail_reads {
            return Err(io::Error::new(kind, "injected failure"));
        }
        self.input.read(buf)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out one scripted stream per connect; refuses once they run out.
pub struct ScriptedTransport {
    streams: VecDeque<MockStream>,
    written: Arc<Mutex<Vec<u8>>>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        ScriptedTransport {
            streams: VecDeque::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Next stream answers with `replies`.
    pub fn replying(mut self, replies: &[u8]) -> Self {
        self.streams.push_back(MockStream {
            input: Cursor::new(replies.to_vec()),
            written: self.written.clone(),
            fail_reads: None,
        });
        self
    }

    /// Next stream fails every read with `kind`.
    pub fn failing(mut self, kind: io::ErrorKind) -> Self {
        self.streams.push_back(MockStream {
            input: Cursor::new(Vec::new()),
            written: self.written.clone(),
            fail_reads: Some(kind),
        });
        self
    }

    pub fn connects(&self) -> Arc<AtomicUsize> {
        self.connects.clone()
    }

    /// Everything written across all streams.
    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        self.written.clone()
    }
}

impl Transport for ScriptedTransport {
    type Stream = MockStream;

    fn connect(&mut self) -> io::Result<MockStream> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.streams
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no more streams"))
    }
}
