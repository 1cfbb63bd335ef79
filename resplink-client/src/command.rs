//! # Commands
//!
//! Purpose: Pair a wire request (keyword + arguments) with the parser that
//! understands its reply.
//!
//! ## Design Principles
//! 1. **Immutable Once Built**: builder methods consume the command; nothing
//!    mutates it after it is handed to a connection.
//! 2. **Function-Valued Parsing**: the reply shape is a `Parser<T>` value, not
//!    a type per command.

use std::fmt;

use bytes::BytesMut;
use resplink_common::{Arg, Message, TextCodec, Writer};

use crate::error::{ClientResult, UsageError};
use crate::reply::{self, Parser};

/// Keywords that switch the connection into another protocol mode.
const RESERVED: [&str; 8] = [
    "MULTI",
    "EXEC",
    "DISCARD",
    "SUBSCRIBE",
    "PSUBSCRIBE",
    "UNSUBSCRIBE",
    "PUNSUBSCRIBE",
    "MONITOR",
];

/// A named request bound to a typed reply parser.
pub struct Command<T> {
    name: String,
    args: Vec<Arg>,
    parser: Parser<T>,
}

impl Command<Message> {
    /// A command whose reply is returned undecoded.
    pub fn raw(name: impl Into<String>) -> Self {
        Command::new(name, reply::raw())
    }
}

impl<T: 'static> Command<T> {
    pub fn new(name: impl Into<String>, parser: Parser<T>) -> Self {
        Command {
            name: name.into(),
            args: Vec::new(),
            parser,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument of `args`.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replaces the parser, keeping name and arguments.
    pub fn with_parser<U: 'static>(self, parser: Parser<U>) -> Command<U> {
        Command {
            name: self.name,
            args: self.args,
            parser,
        }
    }

    /// Maps the parsed value.
    pub fn map<U: 'static>(self, f: impl Fn(T) -> U + Send + Sync + 'static) -> Command<U> {
        let parser = self.parser.clone().map(f);
        self.with_parser(parser)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Arg] {
        &self.args
    }

    pub fn parser(&self) -> &Parser<T> {
        &self.parser
    }

    pub fn parse(&self, message: Message, text: &TextCodec) -> ClientResult<T> {
        self.parser.parse(message, text)
    }

    /// Appends the wire form of this command to `out`.
    pub fn encode(&self, writer: &Writer, out: &mut BytesMut) {
        writer.encode(&self.name, &self.args, out);
    }

    /// True for keywords that only their overlay may send.
    pub fn is_reserved(&self) -> bool {
        RESERVED.iter().any(|kw| kw.eq_ignore_ascii_case(&self.name))
    }

    /// Validates that the command may go through a plain request/reply call.
    pub(crate) fn check_callable(&self) -> ClientResult<()> {
        if self.name.is_empty() {
            return Err(UsageError::EmptyCommand.into());
        }
        if self.is_reserved() {
            return Err(UsageError::ReservedCommand(self.name.to_ascii_uppercase()).into());
        }
        Ok(())
    }
}

impl<T> Clone for Command<T> {
    fn clone(&self) -> Self {
        Command {
            name: self.name.clone(),
            args: self.args.clone(),
            parser: self.parser.clone(),
        }
    }
}

impl<T> fmt::Debug for Command<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

impl<T> fmt::Display for Command<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    #[test]
    fn builds_and_encodes() {
        let cmd = Command::new("SET", reply::ok())
            .arg("test1")
            .arg("hello world");
        let mut out = BytesMut::new();
        cmd.encode(&Writer::default(), &mut out);
        assert_eq!(
            &out[..],
            b"*3\r\n$3\r\nSET\r\n$5\r\ntest1\r\n$11\r\nhello world\r\n"
        );
        assert_eq!(cmd.to_string(), "SET test1 hello world");
    }

    #[test]
    fn args_accepts_iterators() {
        let cmd = Command::new("DEL", reply::integer()).args(["a", "b", "c"]);
        assert_eq!(cmd.arguments().len(), 3);
    }

    #[test]
    fn reserved_keywords_rejected_case_insensitively() {
        let cmd = Command::raw("multi");
        assert!(cmd.is_reserved());
        assert!(matches!(
            cmd.check_callable(),
            Err(ClientError::Usage(UsageError::ReservedCommand(name))) if name == "MULTI"
        ));
        assert!(Command::raw("GET").arg("k").check_callable().is_ok());
        assert!(matches!(
            Command::raw("").check_callable(),
            Err(ClientError::Usage(UsageError::EmptyCommand))
        ));
    }

    #[test]
    fn map_keeps_request() {
        let cmd = Command::new("INCR", reply::integer()).arg("n").map(|v| v * 2);
        assert_eq!(cmd.name(), "INCR");
        assert_eq!(cmd.parse(Message::Integer(21), &TextCodec::default()).unwrap(), 42);
    }
}
