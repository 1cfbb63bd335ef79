//! # Reply Parsers
//!
//! Purpose: Turn a decoded `Message` into a typed value. Parsers are plain
//! function values, so composite replies ("array of pairs", "cursor plus
//! page") are built by combining smaller parsers.
//!
//! ## Design Principles
//! 1. **Errors Are Not Values**: every parser except `raw_with_errors` turns
//!    an error reply into `ClientError::Server`.
//! 2. **Strict Kinds**: a reply of the wrong kind is a protocol error, never
//!    a silent coercion.
//! 3. **Counted Composites**: `sequence`, `tuple2` and `pairs` check the
//!    element count before parsing anything.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use resplink_common::{Kind, Message, ProtocolError, TextCodec};

use crate::error::{ClientError, ClientResult};

type ParseFn<T> = dyn Fn(Message, &TextCodec) -> ClientResult<T> + Send + Sync;

/// A shareable function from a reply to a typed result.
pub struct Parser<T> {
    f: Arc<ParseFn<T>>,
}

impl<T> Clone for Parser<T> {
    fn clone(&self) -> Self {
        Parser { f: self.f.clone() }
    }
}

impl<T> fmt::Debug for Parser<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Parser")
    }
}

impl<T: 'static> Parser<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Message, &TextCodec) -> ClientResult<T> + Send + Sync + 'static,
    {
        Parser { f: Arc::new(f) }
    }

    pub fn parse(&self, message: Message, text: &TextCodec) -> ClientResult<T> {
        (self.f)(message, text)
    }

    /// Applies `f` to a successfully parsed value.
    pub fn map<U: 'static>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Parser<U> {
        Parser::new(move |message, text| self.parse(message, text).map(&f))
    }

    /// Applies a fallible conversion to a successfully parsed value.
    pub fn and_then<U: 'static>(
        self,
        f: impl Fn(T) -> ClientResult<U> + Send + Sync + 'static,
    ) -> Parser<U> {
        Parser::new(move |message, text| self.parse(message, text).and_then(&f))
    }
}

/// One page of a cursor-based scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage<T> {
    /// Cursor for the next call; zero when the iteration is complete.
    pub cursor: u64,
    pub items: Vec<T>,
}

impl<T> ScanPage<T> {
    pub fn is_last(&self) -> bool {
        self.cursor == 0
    }
}

fn unexpected(expected: Kind, found: &Message) -> ClientError {
    ProtocolError::UnexpectedKind {
        expected,
        found: found.kind(),
    }
    .into()
}

fn reject_error(message: Message) -> ClientResult<Message> {
    match message {
        Message::Error(text) => Err(ClientError::server(text)),
        other => Ok(other),
    }
}

fn items(message: Message) -> ClientResult<Vec<Message>> {
    match reject_error(message)? {
        Message::MultiBulk(Some(items)) => Ok(items),
        Message::MultiBulk(None) => Err(ProtocolError::UnexpectedReply("null multi-bulk".into()).into()),
        other => Err(unexpected(Kind::MultiBulk, &other)),
    }
}

fn counted(message: Message, expected: usize) -> ClientResult<Vec<Message>> {
    let items = items(message)?;
    if items.len() != expected {
        return Err(ProtocolError::ArityMismatch {
            expected,
            found: items.len(),
        }
        .into());
    }
    Ok(items)
}

/// The reply as decoded; error replies become `ClientError::Server`.
pub fn raw() -> Parser<Message> {
    Parser::new(|message, _| reject_error(message))
}

/// The reply as decoded, error replies included.
pub fn raw_with_errors() -> Parser<Message> {
    Parser::new(|message, _| Ok(message))
}

/// Status text such as `OK` or `PONG`.
pub fn status() -> Parser<String> {
    Parser::new(|message, _| match reject_error(message)? {
        Message::Status(text) => Ok(text),
        other => Err(unexpected(Kind::Status, &other)),
    })
}

/// A status reply that must read `OK`.
pub fn ok() -> Parser<()> {
    status().and_then(|text| {
        if text == "OK" {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedReply(format!("expected OK, got {}", text)).into())
        }
    })
}

pub fn integer() -> Parser<i64> {
    Parser::new(|message, _| match reject_error(message)? {
        Message::Integer(value) => Ok(value),
        other => Err(unexpected(Kind::Integer, &other)),
    })
}

/// Integer reply read as a flag (`EXPIRE`, `SISMEMBER`).
pub fn boolean() -> Parser<bool> {
    integer().map(|value| value != 0)
}

/// Bulk payload; `None` for a null bulk.
pub fn bulk() -> Parser<Option<Bytes>> {
    Parser::new(|message, _| match reject_error(message)? {
        Message::Bulk(data) => Ok(data),
        other => Err(unexpected(Kind::Bulk, &other)),
    })
}

/// Bulk payload that must not be null.
pub fn bytes() -> Parser<Bytes> {
    bulk().and_then(|data| {
        data.ok_or_else(|| ProtocolError::UnexpectedReply("null bulk".into()).into())
    })
}

/// Text from a bulk or status reply, decoded with the connection charset.
pub fn string() -> Parser<Option<String>> {
    Parser::new(|message, text| match reject_error(message)? {
        Message::Bulk(Some(data)) => Ok(Some(text.decode(&data)?)),
        Message::Bulk(None) => Ok(None),
        Message::Status(value) => Ok(Some(value)),
        other => Err(unexpected(Kind::Bulk, &other)),
    })
}

/// Float carried in a bulk string (`ZSCORE`, `INCRBYFLOAT`).
pub fn float() -> Parser<Option<f64>> {
    Parser::new(|message, text| match reject_error(message)? {
        Message::Bulk(Some(data)) => Ok(Some(text.parse_float(&data)?)),
        Message::Bulk(None) => Ok(None),
        other => Err(unexpected(Kind::Bulk, &other)),
    })
}

/// `None` for a null bulk or null multi-bulk, otherwise `inner`.
pub fn nullable<T: 'static>(inner: Parser<T>) -> Parser<Option<T>> {
    Parser::new(move |message, text| {
        if message.is_null() {
            return Ok(None);
        }
        inner.parse(message, text).map(Some)
    })
}

/// Every element parsed with `element`; a null array is an error, wrap in
/// `nullable` where the command may return one.
pub fn array<T: 'static>(element: Parser<T>) -> Parser<Vec<T>> {
    Parser::new(move |message, text| {
        items(message)?
            .into_iter()
            .map(|item| element.parse(item, text))
            .collect()
    })
}

/// Flat key/value array (`HGETALL`, `ZRANGE ... WITHSCORES`).
pub fn pairs<K: 'static, V: 'static>(key: Parser<K>, value: Parser<V>) -> Parser<Vec<(K, V)>> {
    Parser::new(move |message, text| {
        let items = items(message)?;
        if items.len() % 2 != 0 {
            return Err(ProtocolError::ArityMismatch {
                expected: items.len() + 1,
                found: items.len(),
            }
            .into());
        }
        let mut out = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            out.push((key.parse(k, text)?, value.parse(v, text)?));
        }
        Ok(out)
    })
}

/// Two-element array with a parser per position.
pub fn tuple2<A: 'static, B: 'static>(first: Parser<A>, second: Parser<B>) -> Parser<(A, B)> {
    Parser::new(move |message, text| {
        let mut iter = counted(message, 2)?.into_iter();
        match (iter.next(), iter.next()) {
            (Some(a), Some(b)) => Ok((first.parse(a, text)?, second.parse(b, text)?)),
            _ => Err(ProtocolError::ArityMismatch { expected: 2, found: 0 }.into()),
        }
    })
}

/// One parser per element, applied in registration order.
///
/// The reply must carry exactly as many elements as there are parsers.
pub fn sequence<T: 'static>(parsers: Vec<Parser<T>>) -> Parser<Vec<T>> {
    Parser::new(move |message, text| {
        counted(message, parsers.len())?
            .into_iter()
            .zip(parsers.iter())
            .map(|(item, parser)| parser.parse(item, text))
            .collect()
    })
}

/// `[cursor, [items...]]` as returned by `SCAN`, `SSCAN`, `HSCAN`, `ZSCAN`.
pub fn scan<T: 'static>(element: Parser<T>) -> Parser<ScanPage<T>> {
    let cursor = bytes().and_then(|raw| {
        std::str::from_utf8(&raw)
            .ok()
            .and_then(|text| text.parse::<u64>().ok())
            .ok_or_else(|| ProtocolError::InvalidInteger(String::from_utf8_lossy(&raw).into_owned()).into())
    });
    tuple2(cursor, array(element)).map(|(cursor, items)| ScanPage { cursor, items })
}
