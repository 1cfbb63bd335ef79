//! # Typed Commands
//!
//! Purpose: Ready-made `Command` values for common keyspace, pub/sub and
//! session commands, each bound to the parser for its reply shape.

use std::time::Duration;

use bytes::Bytes;
use resplink_common::{Arg, Message, ProtocolError};

use crate::command::Command;
use crate::reply::{self, ScanPage};

/// TTL state of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

pub fn ping() -> Command<String> {
    Command::new("PING", reply::status())
}

pub fn echo(message: impl Into<Arg>) -> Command<Bytes> {
    Command::new("ECHO", reply::bytes()).arg(message)
}

/// `None` when the key is missing.
pub fn get(key: impl Into<Arg>) -> Command<Option<Bytes>> {
    Command::new("GET", reply::bulk()).arg(key)
}

pub fn set(key: impl Into<Arg>, value: impl Into<Arg>) -> Command<()> {
    Command::new("SET", reply::ok()).arg(key).arg(value)
}

/// `SET key value EX seconds`.
pub fn set_ex(key: impl Into<Arg>, value: impl Into<Arg>, ttl: Duration) -> Command<()> {
    set(key, value).arg("EX").arg(ttl.as_secs())
}

/// Number of keys removed.
pub fn del<I, A>(keys: I) -> Command<i64>
where
    I: IntoIterator<Item = A>,
    A: Into<Arg>,
{
    Command::new("DEL", reply::integer()).args(keys)
}

pub fn incr(key: impl Into<Arg>) -> Command<i64> {
    Command::new("INCR", reply::integer()).arg(key)
}

pub fn incr_by_float(key: impl Into<Arg>, delta: f64) -> Command<f64> {
    let parser = reply::float().and_then(|value| {
        value.ok_or_else(|| ProtocolError::UnexpectedReply("null bulk".into()).into())
    });
    Command::new("INCRBYFLOAT", parser).arg(key).arg(delta)
}

/// True when the timeout was set.
pub fn expire(key: impl Into<Arg>, ttl: Duration) -> Command<bool> {
    Command::new("EXPIRE", reply::boolean())
        .arg(key)
        .arg(ttl.as_secs())
}

pub fn ttl(key: impl Into<Arg>) -> Command<Ttl> {
    let parser = reply::integer().map(|value| match value {
        -1 => Ttl::NoExpiry,
        value if value >= 0 => Ttl::ExpiresIn(Duration::from_secs(value as u64)),
        _ => Ttl::Missing,
    });
    Command::new("TTL", parser).arg(key)
}

pub fn mget<I, A>(keys: I) -> Command<Vec<Option<Bytes>>>
where
    I: IntoIterator<Item = A>,
    A: Into<Arg>,
{
    Command::new("MGET", reply::array(reply::bulk())).args(keys)
}

/// Field/value pairs, fields decoded as text.
pub fn hgetall(key: impl Into<Arg>) -> Command<Vec<(String, Bytes)>> {
    let field = reply::string().map(Option::unwrap_or_default);
    Command::new("HGETALL", reply::pairs(field, reply::bytes())).arg(key)
}

/// `(list, element)`, or `None` when the timeout expired.
pub fn blpop<I, A>(keys: I, timeout: Duration) -> Command<Option<(String, Bytes)>>
where
    I: IntoIterator<Item = A>,
    A: Into<Arg>,
{
    let list = reply::string().map(Option::unwrap_or_default);
    Command::new("BLPOP", reply::nullable(reply::tuple2(list, reply::bytes())))
        .args(keys)
        .arg(timeout.as_secs())
}

/// One page of `SCAN cursor [MATCH pattern] [COUNT count]`.
pub fn scan(cursor: u64, pattern: Option<&str>, count: Option<u64>) -> Command<ScanPage<Bytes>> {
    let mut cmd = Command::new("SCAN", reply::scan(reply::bytes())).arg(cursor);
    if let Some(pattern) = pattern {
        cmd = cmd.arg("MATCH").arg(pattern);
    }
    if let Some(count) = count {
        cmd = cmd.arg("COUNT").arg(count);
    }
    cmd
}

/// Number of subscribers that received the message.
pub fn publish(channel: impl Into<Arg>, message: impl Into<Arg>) -> Command<i64> {
    Command::new("PUBLISH", reply::integer())
        .arg(channel)
        .arg(message)
}

pub fn info(section: Option<&str>) -> Command<String> {
    let cmd = Command::new("INFO", reply::string().map(Option::unwrap_or_default));
    match section {
        Some(section) => cmd.arg(section),
        None => cmd,
    }
}

pub fn auth(password: impl Into<Arg>) -> Command<()> {
    Command::new("AUTH", reply::ok()).arg(password)
}

pub fn select(database: i64) -> Command<()> {
    Command::new("SELECT", reply::ok()).arg(database)
}

/// Any command, reply returned undecoded.
pub fn raw<I, A>(name: &str, args: I) -> Command<Message>
where
    I: IntoIterator<Item = A>,
    A: Into<Arg>,
{
    Command::raw(name).args(args)
}
