// resplink-common - RESP wire codec shared by the resplink client
//
// This crate owns the byte-exact framing: reply messages, request arguments,
// text/number rules, the blocking reader, the request writer and an
// incremental decoder for buffered (async) input. It performs no connection
// management.

pub mod arg;
pub mod decode;
pub mod error;
pub mod message;
pub mod reader;
pub mod text;
pub mod writer;

// Re-export for convenience
pub use arg::Arg;
pub use decode::decode;
pub use error::{ProtocolError, RespError, RespResult};
pub use message::{Kind, Message};
pub use reader::{Header, Reader, MAX_BULK_LEN, MAX_DEPTH};
pub use text::{Charset, NumberFormat, TextCodec};
pub use writer::Writer;
