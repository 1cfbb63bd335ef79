//! # RESP Reply Reader
//!
//! Purpose: Decode one reply at a time from a blocking byte stream.
//!
//! ## Design Principles
//! 1. **Header First**: every reply starts with a tag line; `read_header`
//!    exposes it so callers can branch before touching the payload.
//! 2. **Buffer Reuse**: one line buffer lives as long as the reader.
//! 3. **Binary-Safe**: bulk payloads are read by length, never by scanning.
//! 4. **Fail Fast**: framing violations surface as `ProtocolError`
//!    immediately; the stream is not resynchronized.

use std::io::{self, BufRead, BufReader, Read, Write};

use bytes::Bytes;

use crate::error::{ProtocolError, RespError, RespResult};
use crate::message::{Kind, Message};
use crate::text::{self, TextCodec};

/// Maximum multi-bulk nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

/// Largest bulk payload accepted, matching the server's own 512 MiB limit.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// The tag line of a reply, before any payload is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Status(String),
    Error(String),
    Integer(i64),
    /// Declared payload length; -1 is null.
    Bulk(i64),
    /// Declared element count; -1 is null.
    MultiBulk(i64),
}

impl Header {
    pub fn kind(&self) -> Kind {
        match self {
            Header::Status(_) => Kind::Status,
            Header::Error(_) => Kind::Error,
            Header::Integer(_) => Kind::Integer,
            Header::Bulk(_) => Kind::Bulk,
            Header::MultiBulk(_) => Kind::MultiBulk,
        }
    }
}

/// Buffered RESP decoder over a readable stream.
///
/// The stream is also reachable through `get_mut` so the owner can write
/// requests on the same handle the replies come back on.
pub struct Reader<S> {
    inner: BufReader<S>,
    line: Vec<u8>,
    text: TextCodec,
}

impl<S: Read> Reader<S> {
    /// Wraps `stream` with the default 8 KiB read buffer.
    pub fn new(stream: S, text: TextCodec) -> Self {
        Reader {
            inner: BufReader::new(stream),
            line: Vec::with_capacity(128),
            text,
        }
    }

    /// Wraps `stream` with a read buffer of `capacity` bytes.
    pub fn with_capacity(capacity: usize, stream: S, text: TextCodec) -> Self {
        Reader {
            inner: BufReader::with_capacity(capacity, stream),
            line: Vec::with_capacity(128),
            text,
        }
    }

    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    pub fn get_mut(&mut self) -> &mut S {
        self.inner.get_mut()
    }

    /// Bytes already buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.inner.buffer().len()
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }

    /// Reads one tag byte and the rest of its line.
    pub fn read_header(&mut self) -> RespResult<Header> {
        self.read_line()?;
        let (&tag, rest) = self
            .line
            .split_first()
            .ok_or(ProtocolError::InvalidTag(b'\r'))?;

        let header = match Kind::from_tag(tag) {
            Some(Kind::Status) => Header::Status(self.text.decode(rest)?),
            Some(Kind::Error) => Header::Error(String::from_utf8_lossy(rest).into_owned()),
            Some(Kind::Integer) => Header::Integer(text::parse_int(rest)?),
            Some(Kind::Bulk) => Header::Bulk(checked_bulk_len(text::parse_int(rest)?)?),
            Some(Kind::MultiBulk) => Header::MultiBulk(checked_len(text::parse_int(rest)?)?),
            None => return Err(ProtocolError::InvalidTag(tag).into()),
        };
        Ok(header)
    }

    /// Reads one complete reply.
    pub fn read_message(&mut self) -> RespResult<Message> {
        let header = self.read_header()?;
        self.read_body(header, 0)
    }

    /// Reads a header and fails unless it has the required kind.
    ///
    /// An error reply is returned as `RespError::Server`; any other mismatch
    /// is a protocol error and leaves the payload unread.
    pub fn expect(&mut self, kind: Kind) -> RespResult<Header> {
        let header = self.read_header()?;
        match header {
            Header::Error(message) if kind != Kind::Error => Err(RespError::Server(message)),
            header if header.kind() == kind => Ok(header),
            header => Err(RespError::unexpected_kind(kind, header.kind())),
        }
    }

    /// `expect` followed by the payload.
    pub fn read_expected(&mut self, kind: Kind) -> RespResult<Message> {
        let header = self.expect(kind)?;
        self.read_body(header, 0)
    }

    /// Copies the next bulk payload into `sink` without materializing it.
    ///
    /// At most `chunk_size` bytes are held at once. Returns `None` for a null
    /// bulk, otherwise the number of bytes copied.
    pub fn stream_bulk<W: Write + ?Sized>(
        &mut self,
        sink: &mut W,
        chunk_size: usize,
    ) -> RespResult<Option<u64>> {
        let len = match self.expect(Kind::Bulk)? {
            Header::Bulk(len) if len < 0 => return Ok(None),
            Header::Bulk(len) => len as u64,
            header => return Err(RespError::unexpected_kind(Kind::Bulk, header.kind())),
        };

        let chunk_size = chunk_size.max(1);
        let mut chunk = vec![0u8; chunk_size.min(len as usize)];
        let mut remaining = len;
        while remaining > 0 {
            let take = remaining.min(chunk_size as u64) as usize;
            self.inner.read_exact(&mut chunk[..take]).map_err(eof_to_closed)?;
            sink.write_all(&chunk[..take])?;
            remaining -= take as u64;
        }
        self.consume_crlf()?;
        sink.flush()?;
        Ok(Some(len))
    }

    fn read_body(&mut self, header: Header, depth: usize) -> RespResult<Message> {
        match header {
            Header::Status(text) => Ok(Message::Status(text)),
            Header::Error(text) => Ok(Message::Error(text)),
            Header::Integer(value) => Ok(Message::Integer(value)),
            Header::Bulk(len) if len < 0 => Ok(Message::Bulk(None)),
            Header::Bulk(len) => Ok(Message::Bulk(Some(self.read_bulk_payload(len as usize)?))),
            Header::MultiBulk(count) if count < 0 => Ok(Message::MultiBulk(None)),
            Header::MultiBulk(count) => {
                if depth >= MAX_DEPTH {
                    return Err(ProtocolError::NestingTooDeep(depth + 1).into());
                }
                let count = count as usize;
                // Cap the up-front reservation; the count is server-controlled.
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let header = self.read_header()?;
                    items.push(self.read_body(header, depth + 1)?);
                }
                Ok(Message::MultiBulk(Some(items)))
            }
        }
    }

    fn read_bulk_payload(&mut self, len: usize) -> RespResult<Bytes> {
        let mut data = vec![0u8; len];
        self.inner.read_exact(&mut data).map_err(eof_to_closed)?;
        self.consume_crlf()?;
        Ok(Bytes::from(data))
    }

    fn consume_crlf(&mut self) -> RespResult<()> {
        let mut crlf = [0u8; 2];
        self.inner.read_exact(&mut crlf).map_err(eof_to_closed)?;
        if crlf != *b"\r\n" {
            return Err(ProtocolError::MissingCrlf.into());
        }
        Ok(())
    }

    fn read_line(&mut self) -> RespResult<()> {
        self.line.clear();
        let bytes = self.inner.read_until(b'\n', &mut self.line)?;
        if bytes == 0 || self.line.last() != Some(&b'\n') {
            return Err(RespError::Closed);
        }
        if self.line.len() < 2 || self.line[self.line.len() - 2] != b'\r' {
            return Err(ProtocolError::MissingCrlf.into());
        }
        self.line.truncate(self.line.len() - 2);
        Ok(())
    }
}

fn checked_len(len: i64) -> RespResult<i64> {
    if len < -1 {
        return Err(ProtocolError::InvalidLength(len).into());
    }
    Ok(len)
}

/// Bulk lengths are also capped: the payload is allocated up front.
pub(crate) fn checked_bulk_len(len: i64) -> RespResult<i64> {
    if len > MAX_BULK_LEN {
        return Err(ProtocolError::InvalidLength(len).into());
    }
    checked_len(len)
}

fn eof_to_closed(err: io::Error) -> RespError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        RespError::Closed
    } else {
        RespError::Io(err)
    }
}
