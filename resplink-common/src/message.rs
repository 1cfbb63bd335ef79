//! # RESP Messages
//!
//! The five RESP2 reply kinds and the tag byte that introduces each one.

use std::fmt;

use bytes::Bytes;

/// Reply kind, fully determined by the leading tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// `+OK`
    Status,
    /// `-ERR ...`
    Error,
    /// `:42`
    Integer,
    /// `$5\r\nhello`
    Bulk,
    /// `*2\r\n...`
    MultiBulk,
}

impl Kind {
    /// Maps a tag byte to its kind.
    pub const fn from_tag(tag: u8) -> Option<Kind> {
        match tag {
            b'+' => Some(Kind::Status),
            b'-' => Some(Kind::Error),
            b':' => Some(Kind::Integer),
            b'$' => Some(Kind::Bulk),
            b'*' => Some(Kind::MultiBulk),
            _ => None,
        }
    }

    /// Returns the tag byte written on the wire.
    pub const fn tag(self) -> u8 {
        match self {
            Kind::Status => b'+',
            Kind::Error => b'-',
            Kind::Integer => b':',
            Kind::Bulk => b'$',
            Kind::MultiBulk => b'*',
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Status => "status",
            Kind::Error => "error",
            Kind::Integer => "integer",
            Kind::Bulk => "bulk",
            Kind::MultiBulk => "multi-bulk",
        };
        f.write_str(name)
    }
}

/// A decoded RESP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Single-line status text.
    Status(String),
    /// Single-line error text.
    Error(String),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Binary-safe string, `None` for `$-1`.
    Bulk(Option<Bytes>),
    /// Ordered sequence, `None` for `*-1`.
    MultiBulk(Option<Vec<Message>>),
}

impl Message {
    /// Returns the kind of this message.
    pub fn kind(&self) -> Kind {
        match self {
            Message::Status(_) => Kind::Status,
            Message::Error(_) => Kind::Error,
            Message::Integer(_) => Kind::Integer,
            Message::Bulk(_) => Kind::Bulk,
            Message::MultiBulk(_) => Kind::MultiBulk,
        }
    }

    /// True for `$-1` and `*-1`.
    pub fn is_null(&self) -> bool {
        matches!(self, Message::Bulk(None) | Message::MultiBulk(None))
    }

    /// Shorthand for a non-null bulk message.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Message::Bulk(Some(data.into()))
    }

    /// Shorthand for a non-null multi-bulk message.
    pub fn array(items: Vec<Message>) -> Self {
        Message::MultiBulk(Some(items))
    }

    /// Encodes the message in its wire form.
    ///
    /// Clients never send replies; this is used by tests and tooling that
    /// need to fabricate server output.
    pub fn encode_to(&self, out: &mut Vec<u8>) {
        match self {
            Message::Status(text) | Message::Error(text) => {
                out.push(self.kind().tag());
                out.extend_from_slice(text.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Message::Integer(value) => {
                out.push(b':');
                out.extend_from_slice(value.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Message::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            Message::Bulk(Some(data)) => {
                out.push(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            Message::MultiBulk(None) => out.extend_from_slice(b"*-1\r\n"),
            Message::MultiBulk(Some(items)) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode_to(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for kind in [
            Kind::Status,
            Kind::Error,
            Kind::Integer,
            Kind::Bulk,
            Kind::MultiBulk,
        ] {
            assert_eq!(Kind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(Kind::from_tag(b'%'), None);
    }

    #[test]
    fn null_detection() {
        assert!(Message::Bulk(None).is_null());
        assert!(Message::MultiBulk(None).is_null());
        assert!(!Message::bulk("").is_null());
        assert!(!Message::array(Vec::new()).is_null());
    }

    #[test]
    fn encodes_nested_reply() {
        let msg = Message::array(vec![
            Message::Status("OK".into()),
            Message::Integer(-3),
            Message::Bulk(None),
            Message::bulk("hi"),
        ]);
        let mut out = Vec::new();
        msg.encode_to(&mut out);
        assert_eq!(&out, b"*4\r\n+OK\r\n:-3\r\n$-1\r\n$2\r\nhi\r\n");
    }
}
