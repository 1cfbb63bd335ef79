//! Incremental RESP decoding over an in-memory buffer.
//!
//! Used where bytes arrive asynchronously: the caller appends to a buffer,
//! calls [`decode`], and retries after the next read when it returns
//! `Ok(None)`.

use bytes::Bytes;

use crate::error::{ProtocolError, RespResult};
use crate::message::{Kind, Message};
use crate::reader::{checked_bulk_len, MAX_DEPTH};
use crate::text::{self, TextCodec};

/// Decodes one message from the front of `buf`.
///
/// Returns the message and the number of bytes it occupied, or `None` when
/// `buf` does not yet hold a complete message.
pub fn decode(buf: &[u8], text: &TextCodec) -> RespResult<Option<(Message, usize)>> {
    let mut pos = 0;
    match decode_at(buf, &mut pos, text, 0)? {
        Some(message) => Ok(Some((message, pos))),
        None => Ok(None),
    }
}

fn decode_at(
    buf: &[u8],
    pos: &mut usize,
    text: &TextCodec,
    depth: usize,
) -> RespResult<Option<Message>> {
    let Some(line) = read_line(buf, pos)? else {
        return Ok(None);
    };
    let (&tag, rest) = line.split_first().ok_or(ProtocolError::InvalidTag(b'\r'))?;

    let message = match Kind::from_tag(tag) {
        Some(Kind::Status) => Message::Status(text.decode(rest)?),
        Some(Kind::Error) => Message::Error(String::from_utf8_lossy(rest).into_owned()),
        Some(Kind::Integer) => Message::Integer(text::parse_int(rest)?),
        Some(Kind::Bulk) => {
            let len = checked_bulk_len(text::parse_int(rest)?)?;
            if len == -1 {
                return Ok(Some(Message::Bulk(None)));
            }
            let len = len as usize;
            let end = *pos + len;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != b"\r\n" {
                return Err(ProtocolError::MissingCrlf.into());
            }
            let data = Bytes::copy_from_slice(&buf[*pos..end]);
            *pos = end + 2;
            Message::Bulk(Some(data))
        }
        Some(Kind::MultiBulk) => {
            let count = text::parse_int(rest)?;
            if count < -1 {
                return Err(ProtocolError::InvalidLength(count).into());
            }
            if count == -1 {
                return Ok(Some(Message::MultiBulk(None)));
            }
            if depth >= MAX_DEPTH {
                return Err(ProtocolError::NestingTooDeep(depth + 1).into());
            }
            let count = count as usize;
            let mut items = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                match decode_at(buf, pos, text, depth + 1)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            Message::MultiBulk(Some(items))
        }
        None => return Err(ProtocolError::InvalidTag(tag).into()),
    };
    Ok(Some(message))
}

fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> RespResult<Option<&'a [u8]>> {
    let start = *pos;
    let Some(offset) = buf[start..].iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let end = start + offset;
    if end == start || buf[end - 1] != b'\r' {
        return Err(ProtocolError::MissingCrlf.into());
    }
    *pos = end + 1;
    Ok(Some(&buf[start..end - 1]))
}
