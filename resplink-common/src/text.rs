//! # Text and Number Rules
//!
//! Purpose: Convert between Rust text/numbers and wire bytes with rules that
//! are passed in explicitly, never taken from the process locale.
//!
//! ## Design Principles
//! 1. **Explicit Formatting**: `NumberFormat` decides how floats are written;
//!    the decimal separator is always `.`.
//! 2. **Configurable Charset**: strings are encoded with the connection's
//!    charset, raw bytes are never touched.
//! 3. **Allocation-Free Integers**: integers are rendered through a stack
//!    buffer.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, RespResult};

/// Character set used for text arguments and text replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    /// UTF-8; decoding rejects invalid sequences.
    #[default]
    Utf8,
    /// ISO-8859-1; characters above U+00FF are written as `?`.
    Latin1,
}

/// Rules for rendering numbers as bulk strings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberFormat {
    /// Fixed number of fractional digits for floats; `None` writes the
    /// shortest representation that round-trips.
    pub float_precision: Option<usize>,
}

/// Charset plus number rules, shared by the writer and the reply parsers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextCodec {
    pub charset: Charset,
    pub numbers: NumberFormat,
}

impl TextCodec {
    pub const fn new(charset: Charset, numbers: NumberFormat) -> Self {
        TextCodec { charset, numbers }
    }

    /// Number of bytes `text` occupies once encoded.
    pub fn encoded_len(&self, text: &str) -> usize {
        match self.charset {
            Charset::Utf8 => text.len(),
            Charset::Latin1 => text.chars().count(),
        }
    }

    /// Appends `text` encoded with the configured charset.
    pub fn encode_str(&self, text: &str, out: &mut BytesMut) {
        match self.charset {
            Charset::Utf8 => out.extend_from_slice(text.as_bytes()),
            Charset::Latin1 => {
                out.reserve(text.len());
                for ch in text.chars() {
                    let code = ch as u32;
                    out.put_u8(if code <= 0xFF { code as u8 } else { b'?' });
                }
            }
        }
    }

    /// Decodes wire bytes into a `String`.
    pub fn decode(&self, data: &[u8]) -> RespResult<String> {
        match self.charset {
            Charset::Utf8 => std::str::from_utf8(data)
                .map(str::to_owned)
                .map_err(|_| ProtocolError::InvalidText.into()),
            Charset::Latin1 => Ok(data.iter().map(|&b| b as char).collect()),
        }
    }

    /// Renders a float following `NumberFormat`.
    pub fn format_float(&self, value: f64) -> String {
        if !value.is_finite() {
            // Redis spells infinities as inf / -inf.
            return value.to_string();
        }
        match self.numbers.float_precision {
            Some(precision) => format!("{:.*}", precision, value),
            None => value.to_string(),
        }
    }

    /// Parses a float reply (`ZSCORE`, `INCRBYFLOAT`).
    pub fn parse_float(&self, data: &[u8]) -> RespResult<f64> {
        std::str::from_utf8(data)
            .ok()
            .and_then(|text| text.trim().parse::<f64>().ok())
            .ok_or_else(|| {
                ProtocolError::UnexpectedReply(format!(
                    "not a float: {}",
                    String::from_utf8_lossy(data)
                ))
                .into()
            })
    }
}

/// Appends the decimal form of `value`.
pub fn write_int(out: &mut BytesMut, value: i64) {
    if value < 0 {
        out.put_u8(b'-');
    }
    write_uint(out, value.unsigned_abs());
}

/// Appends the decimal form of `value`.
pub fn write_uint(out: &mut BytesMut, mut value: u64) {
    // Digits are produced in reverse into a stack buffer.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    buf[..len].reverse();
    out.extend_from_slice(&buf[..len]);
}

/// Parses an ASCII signed decimal with overflow detection.
pub fn parse_int(data: &[u8]) -> RespResult<i64> {
    let invalid = || ProtocolError::InvalidInteger(String::from_utf8_lossy(data).into_owned());
    let (negative, digits) = match data.first() {
        Some(b'-') => (true, &data[1..]),
        Some(b'+') => (false, &data[1..]),
        Some(_) => (false, data),
        None => return Err(invalid().into()),
    };
    if digits.is_empty() {
        return Err(invalid().into());
    }

    // Accumulate negatively so i64::MIN parses.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(invalid().into());
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_sub((b - b'0') as i64))
            .ok_or_else(invalid)?;
    }

    if negative {
        Ok(value)
    } else {
        value.checked_neg().ok_or_else(|| invalid().into())
    }
}
