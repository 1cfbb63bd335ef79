//! # RESP Request Writer
//!
//! Purpose: Encode commands as a multi-bulk of bulk strings, the only request
//! shape RESP servers accept.
//!
//! ## Design Principles
//! 1. **Append, Don't Allocate**: `encode` appends into a caller buffer so a
//!    pipeline can concatenate many requests into a single write.
//! 2. **Buffer Reuse**: `write_to` keeps one scratch buffer per connection.
//! 3. **Binary-Safe**: byte arguments are copied verbatim.

use std::io::Write;

use bytes::{BufMut, BytesMut};

use crate::arg::Arg;
use crate::text::{self, TextCodec};

/// Request encoder bound to a connection's text rules.
#[derive(Debug)]
pub struct Writer {
    text: TextCodec,
    scratch: BytesMut,
}

impl Writer {
    /// Creates a writer using `text` for string and number arguments.
    pub fn new(text: TextCodec) -> Self {
        Writer {
            text,
            scratch: BytesMut::with_capacity(256),
        }
    }

    /// Text rules used by this writer.
    pub fn text(&self) -> &TextCodec {
        &self.text
    }

    /// Appends `*<n>\r\n` followed by one bulk per item (name first).
    pub fn encode(&self, name: &str, args: &[Arg], out: &mut BytesMut) {
        out.put_u8(b'*');
        text::write_uint(out, (args.len() + 1) as u64);
        out.extend_from_slice(b"\r\n");

        out.put_u8(b'$');
        text::write_uint(out, self.text.encoded_len(name) as u64);
        out.extend_from_slice(b"\r\n");
        self.text.encode_str(name, out);
        out.extend_from_slice(b"\r\n");

        for arg in args {
            self.encode_arg(arg, out);
        }
    }

    fn encode_arg(&self, arg: &Arg, out: &mut BytesMut) {
        match arg {
            Arg::Bytes(data) => {
                out.put_u8(b'$');
                text::write_uint(out, data.len() as u64);
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
            }
            other => {
                // Length is only known once the payload is rendered.
                let mut payload = BytesMut::new();
                other.write_payload(&self.text, &mut payload);
                out.put_u8(b'$');
                text::write_uint(out, payload.len() as u64);
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(&payload);
            }
        }
        out.extend_from_slice(b"\r\n");
    }

    /// Encodes one command into the scratch buffer and writes it out.
    pub fn write_to<W: Write>(&mut self, name: &str, args: &[Arg], stream: &mut W) -> std::io::Result<()> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        self.encode(name, args, &mut scratch);
        let result = stream.write_all(&scratch).and_then(|_| stream.flush());
        self.scratch = scratch;
        result
    }
}

impl Default for Writer {
    fn default() -> Self {
        Writer::new(TextCodec::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{Charset, NumberFormat};

    fn encoded(name: &str, args: &[Arg]) -> Vec<u8> {
        let mut out = BytesMut::new();
        Writer::default().encode(name, args, &mut out);
        out.to_vec()
    }

    #[test]
    fn encodes_set_with_spaces() {
        let bytes = encoded("SET", &["test1".into(), "hello world".into()]);
        assert_eq!(
            &bytes,
            b"*3\r\n$3\r\nSET\r\n$5\r\ntest1\r\n$11\r\nhello world\r\n"
        );
    }

    #[test]
    fn encodes_command_without_args() {
        assert_eq!(&encoded("PING", &[]), b"*1\r\n$4\r\nPING\r\n");
    }

    #[test]
    fn encodes_mixed_argument_kinds() {
        let bytes = encoded(
            "ZADD",
            &["z".into(), 1.5f64.into(), (&b"m\r\n"[..]).into(), (-2i64).into()],
        );
        assert_eq!(
            &bytes,
            b"*5\r\n$4\r\nZADD\r\n$1\r\nz\r\n$3\r\n1.5\r\n$3\r\nm\r\n\r\n$2\r\n-2\r\n"
        );
    }

    #[test]
    fn empty_argument_is_zero_length_bulk() {
        assert_eq!(
            &encoded("SET", &["k".into(), "".into()]),
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n"
        );
    }

    #[test]
    fn multiple_commands_concatenate() {
        let writer = Writer::default();
        let mut out = BytesMut::new();
        writer.encode("GET", &["a".into()], &mut out);
        writer.encode("GET", &["b".into()], &mut out);
        assert_eq!(
            &out[..],
            b"*2\r\n$3\r\nGET\r\n$1\r\na\r\n*2\r\n$3\r\nGET\r\n$1\r\nb\r\n"
        );
    }

    #[test]
    fn latin1_lengths_count_encoded_bytes() {
        let writer = Writer::new(TextCodec::new(Charset::Latin1, NumberFormat::default()));
        let mut out = BytesMut::new();
        writer.encode("SET", &["k".into(), "\u{e9}t\u{e9}".into()], &mut out);
        assert_eq!(
            &out[..],
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$3\r\n\xe9t\xe9\r\n"
        );
    }

    #[test]
    fn write_to_flushes_stream() {
        let mut writer = Writer::default();
        let mut sink = Vec::new();
        writer.write_to("GET", &["key".into()], &mut sink).unwrap();
        assert_eq!(&sink, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }
}
