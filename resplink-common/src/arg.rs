//! Request arguments.
//!
//! Every argument goes on the wire as a bulk string; the variant only decides
//! how its bytes are produced.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::text::{self, TextCodec};

/// A single command argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Text, encoded with the connection charset.
    Text(String),
    /// Raw bytes, written unmodified.
    Bytes(Bytes),
    /// Signed integer, written in decimal.
    Int(i64),
    /// Unsigned integer, written in decimal.
    UInt(u64),
    /// Float, written according to the connection `NumberFormat`.
    Float(f64),
}

impl Arg {
    /// Builds a text argument from anything implementing `Display`.
    pub fn display(value: impl fmt::Display) -> Self {
        Arg::Text(value.to_string())
    }

    /// Appends the argument's wire bytes (payload only, no framing).
    pub fn write_payload(&self, text: &TextCodec, out: &mut BytesMut) {
        match self {
            Arg::Text(value) => text.encode_str(value, out),
            Arg::Bytes(value) => out.extend_from_slice(value),
            Arg::Int(value) => text::write_int(out, *value),
            Arg::UInt(value) => text::write_uint(out, *value),
            Arg::Float(value) => out.extend_from_slice(text.format_float(*value).as_bytes()),
        }
    }

    /// Returns the payload as bytes, allocating only for non-byte variants.
    pub fn to_bytes(&self, text: &TextCodec) -> Bytes {
        match self {
            Arg::Bytes(value) => value.clone(),
            other => {
                let mut out = BytesMut::new();
                other.write_payload(text, &mut out);
                out.freeze()
            }
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Text(value) => f.write_str(value),
            Arg::Bytes(value) => write!(f, "{}", String::from_utf8_lossy(value)),
            Arg::Int(value) => write!(f, "{}", value),
            Arg::UInt(value) => write!(f, "{}", value),
            Arg::Float(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_owned())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Text(value.clone())
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for Arg {
    fn from(value: &[u8; N]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Self {
        Arg::Bytes(value)
    }
}

macro_rules! int_arg {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Arg::$variant(value.into())
                }
            }
        )+
    };
}

int_arg!(Int: i8, i16, i32, i64);
int_arg!(UInt: u8, u16, u32, u64);

impl From<usize> for Arg {
    fn from(value: usize) -> Self {
        Arg::UInt(value as u64)
    }
}

impl From<isize> for Arg {
    fn from(value: isize) -> Self {
        Arg::Int(value as i64)
    }
}

impl From<f32> for Arg {
    fn from(value: f32) -> Self {
        Arg::Float(value.into())
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payloads_per_variant() {
        let text = TextCodec::default();
        assert_eq!(Arg::from("key").to_bytes(&text), Bytes::from_static(b"key"));
        assert_eq!(
            Arg::from(&b"\x00\xff"[..]).to_bytes(&text),
            Bytes::from_static(b"\x00\xff")
        );
        assert_eq!(Arg::from(-7i32).to_bytes(&text), Bytes::from_static(b"-7"));
        assert_eq!(Arg::from(10usize).to_bytes(&text), Bytes::from_static(b"10"));
        assert_eq!(Arg::from(0.5f64).to_bytes(&text), Bytes::from_static(b"0.5"));
    }

    #[test]
    fn display_values_become_text() {
        struct Point(i32, i32);
        impl fmt::Display for Point {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", self.0, self.1)
            }
        }
        assert_eq!(Arg::display(Point(3, 4)), Arg::Text("3:4".into()));
    }
}
