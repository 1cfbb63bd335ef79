//! # Transports
//!
//! Purpose: The seam between a `Connection` and the byte stream it talks
//! over. A transport knows how to open a fresh duplex stream; everything
//! above it (framing, retry, modes) is transport-agnostic.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Opens duplex byte streams on demand.
///
/// `connect` is called once for the initial stream and once per
/// reconnection attempt; each call must return an independent stream.
pub trait Transport: Send {
    type Stream: Read + Write + Send;

    fn connect(&mut self) -> io::Result<Self::Stream>;
}

/// TCP transport honoring the configured timeouts and `nodelay`.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addrs: Vec<SocketAddr>,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    nodelay: bool,
}

impl TcpTransport {
    /// Resolves `config.addr` once; later connects reuse the result.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let addrs: Vec<SocketAddr> = config
            .addr
            .to_socket_addrs()
            .map_err(|_| ClientError::InvalidAddress(config.addr.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(ClientError::InvalidAddress(config.addr.clone()));
        }
        Ok(TcpTransport {
            addrs,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            nodelay: config.nodelay,
        })
    }

    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    fn connect_one(&self, addr: &SocketAddr) -> io::Result<TcpStream> {
        let stream = match self.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(self.read_timeout)?;
        stream.set_write_timeout(self.write_timeout)?;
        stream.set_nodelay(self.nodelay)?;
        Ok(stream)
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;

    fn connect(&mut self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in &self.addrs {
            match self.connect_one(addr) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    debug!(%addr, error = %err, "tcp connect failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address")))
    }
}

/// Closes a TCP connection's socket from another thread.
///
/// A read blocked on the socket fails once `shutdown` runs, so a stuck call
/// or subscription loop returns instead of hanging.
#[derive(Debug)]
pub struct ShutdownHandle {
    stream: TcpStream,
}

impl ShutdownHandle {
    pub(crate) fn new(stream: &TcpStream) -> io::Result<Self> {
        Ok(ShutdownHandle {
            stream: stream.try_clone()?,
        })
    }

    pub fn shutdown(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }
}
