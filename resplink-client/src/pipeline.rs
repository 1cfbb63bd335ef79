//! # Pipeline
//!
//! Purpose: Batch many requests into a single write and read their replies
//! back in order, optionally wrapping part of the batch in MULTI/EXEC.
//!
//! ## Design Principles
//! 1. **Owned Queue**: the encoded buffer and the pending parsers belong to
//!    the `Pipeline` value; `finish` consumes it, so a flushed pipeline
//!    cannot be reused.
//! 2. **Call Equivalence**: every slot resolves to exactly what a plain
//!    `call` of the same command would have returned.
//! 3. **Unit Failure**: a transport or framing failure fails the whole batch;
//!    there are no partial results.

use bytes::BytesMut;
use resplink_common::{Message, ProtocolError, TextCodec, Writer};
use tracing::debug;

use crate::batch::{self, Deferred, Replies, Slot};
use crate::command::Command;
use crate::connection::{Connection, Mode, Retry};
use crate::error::{ClientError, ClientResult, UsageError};
use crate::transport::Transport;

enum Entry {
    Command {
        slot: usize,
        deferred: Deferred,
        queued: bool,
    },
    Multi,
    Exec,
    Discard,
}

/// Commands buffered for one round trip.
pub struct Pipeline<'a, T: Transport> {
    conn: &'a mut Connection<T>,
    writer: Writer,
    batch: u64,
    buffer: BytesMut,
    entries: Vec<Entry>,
    slots: usize,
    in_transaction: bool,
}

impl<T: Transport> Connection<T> {
    /// Starts buffering commands; nothing is sent until `finish`.
    pub fn pipeline(&mut self) -> Pipeline<'_, T> {
        let writer = Writer::new(*self.text());
        self.set_mode(Mode::Pipelining);
        Pipeline {
            conn: self,
            writer,
            batch: batch::next_batch_id(),
            buffer: BytesMut::with_capacity(1024),
            entries: Vec::new(),
            slots: 0,
            in_transaction: false,
        }
    }
}

impl<'a, T: Transport> Pipeline<'a, T> {
    /// Buffers `cmd` and returns the slot its reply will land in.
    pub fn queue<R: Send + 'static>(&mut self, cmd: &Command<R>) -> ClientResult<Slot<R>> {
        cmd.check_callable()?;
        cmd.encode(&self.writer, &mut self.buffer);
        let slot = self.slots;
        self.slots += 1;
        self.entries.push(Entry::Command {
            slot,
            deferred: Deferred::new(cmd.parser().clone()),
            queued: self.in_transaction,
        });
        Ok(Slot::new(self.batch, slot))
    }

    /// Opens a transaction inside the batch.
    pub fn multi(&mut self) -> ClientResult<()> {
        if self.in_transaction {
            return Err(UsageError::TransactionActive.into());
        }
        self.push_control("MULTI", Entry::Multi);
        self.in_transaction = true;
        Ok(())
    }

    /// Closes the open transaction with EXEC.
    pub fn exec(&mut self) -> ClientResult<()> {
        if !self.in_transaction {
            return Err(UsageError::NoTransaction.into());
        }
        self.push_control("EXEC", Entry::Exec);
        self.in_transaction = false;
        Ok(())
    }

    /// Closes the open transaction with DISCARD; its slots resolve to
    /// `TransactionDiscarded`.
    pub fn discard(&mut self) -> ClientResult<()> {
        if !self.in_transaction {
            return Err(UsageError::NoTransaction.into());
        }
        self.push_control("DISCARD", Entry::Discard);
        self.in_transaction = false;
        Ok(())
    }

    /// Number of commands queued (control commands excluded).
    pub fn len(&self) -> usize {
        self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    /// Sends the batch and resolves every slot.
    ///
    /// An open transaction is closed with EXEC first. A transport failure
    /// before all replies arrive replays the whole batch once after
    /// reconnecting.
    pub fn finish(mut self) -> ClientResult<Replies> {
        if self.in_transaction {
            self.exec()?;
        }
        let entries = std::mem::take(&mut self.entries);
        let buffer = std::mem::take(&mut self.buffer);
        let mut replies = Replies::new(self.batch, self.slots);
        self.conn.set_mode(Mode::Normal);
        if entries.is_empty() {
            return Ok(replies);
        }

        debug!(commands = entries.len(), "pipeline flush");
        let expected = entries.len();
        let messages = self.conn.run(Retry::Reconnect, |io| {
            io.send(&buffer)?;
            let mut messages = Vec::with_capacity(expected);
            for _ in 0..expected {
                messages.push(io.read_message()?);
            }
            Ok(messages)
        })?;

        let text = *self.conn.text();
        if let Err(err) = resolve(entries, messages, &text, &mut replies) {
            if err.is_protocol() {
                self.conn.mark_broken();
            }
            return Err(err);
        }
        Ok(replies)
    }

    fn push_control(&mut self, name: &str, entry: Entry) {
        self.writer.encode(name, &[], &mut self.buffer);
        self.entries.push(entry);
    }
}

impl<T: Transport> Drop for Pipeline<'_, T> {
    fn drop(&mut self) {
        self.conn.set_mode(Mode::Normal);
    }
}

/// Matches replies to entries, splitting MULTI/QUEUED/EXEC framing from the
/// results of the queued commands.
fn resolve(
    entries: Vec<Entry>,
    messages: Vec<Message>,
    text: &TextCodec,
    replies: &mut Replies,
) -> ClientResult<()> {
    let mut group: Vec<(usize, Deferred)> = Vec::new();

    for (entry, message) in entries.into_iter().zip(messages) {
        match entry {
            Entry::Command {
                slot,
                deferred,
                queued: false,
            } => replies.resolve(slot, deferred, message, text),
            Entry::Command {
                slot,
                deferred,
                queued: true,
            } => match message {
                Message::Status(status) if status == "QUEUED" => group.push((slot, deferred)),
                Message::Error(err) => {
                    replies.record(slot, Message::Error(err.clone()));
                    replies.set(slot, deferred.reject(ClientError::server(err)));
                }
                other => return Err(unexpected("QUEUED", &other)),
            },
            Entry::Multi => match message {
                Message::Status(status) if status == "OK" => {}
                Message::Error(err) => return Err(ClientError::server(err)),
                other => return Err(unexpected("OK", &other)),
            },
            Entry::Exec => {
                let group = std::mem::take(&mut group);
                match message {
                    Message::MultiBulk(Some(items)) => {
                        if items.len() != group.len() {
                            return Err(ProtocolError::ArityMismatch {
                                expected: group.len(),
                                found: items.len(),
                            }
                            .into());
                        }
                        for ((slot, deferred), item) in group.into_iter().zip(items) {
                            replies.resolve(slot, deferred, item, text);
                        }
                    }
                    Message::MultiBulk(None) => {
                        for (slot, deferred) in group {
                            replies.set(slot, deferred.reject(ClientError::TransactionAborted));
                        }
                    }
                    Message::Error(err) => {
                        for (slot, deferred) in group {
                            replies.record(slot, Message::Error(err.clone()));
                            replies.set(slot, deferred.reject(ClientError::server(err.clone())));
                        }
                    }
                    other => return Err(unexpected("multi-bulk", &other)),
                }
            }
            Entry::Discard => {
                for (slot, deferred) in std::mem::take(&mut group) {
                    replies.set(slot, deferred.reject(ClientError::TransactionDiscarded));
                }
                if let Message::Error(err) = message {
                    return Err(ClientError::server(err));
                }
            }
        }
    }
    Ok(())
}

fn unexpected(expected: &str, found: &Message) -> ClientError {
    ProtocolError::UnexpectedReply(format!("expected {}, got {} reply", expected, found.kind())).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::next_batch_id;
    use crate::reply;

    fn entry<R: Send + 'static>(slot: usize, parser: crate::reply::Parser<R>, queued: bool) -> Entry {
        Entry::Command {
            slot,
            deferred: Deferred::new(parser),
            queued,
        }
    }

    #[test]
    fn splits_queued_statuses_from_exec_array() {
        let batch = next_batch_id();
        let mut replies = Replies::new(batch, 3);
        let entries = vec![
            entry(0, reply::integer(), false),
            Entry::Multi,
            entry(1, reply::status(), true),
            entry(2, reply::integer(), true),
            Entry::Exec,
        ];
        let messages = vec![
            Message::Integer(7),
            Message::Status("OK".into()),
            Message::Status("QUEUED".into()),
            Message::Status("QUEUED".into()),
            Message::array(vec![Message::Status("OK".into()), Message::Integer(2)]),
        ];
        resolve(entries, messages, &TextCodec::default(), &mut replies).unwrap();

        assert_eq!(replies.take(Slot::<i64>::new(batch, 0)).unwrap(), 7);
        assert_eq!(replies.take(Slot::<String>::new(batch, 1)).unwrap(), "OK");
        assert_eq!(replies.take(Slot::<i64>::new(batch, 2)).unwrap(), 2);
    }

    #[test]
    fn rejected_queue_entry_keeps_exec_alignment() {
        let batch = next_batch_id();
        let mut replies = Replies::new(batch, 2);
        let entries = vec![
            Entry::Multi,
            entry(0, reply::integer(), true),
            entry(1, reply::integer(), true),
            Entry::Exec,
        ];
        let messages = vec![
            Message::Status("OK".into()),
            Message::Error("ERR unknown command".into()),
            Message::Status("QUEUED".into()),
            Message::array(vec![Message::Integer(1)]),
        ];
        resolve(entries, messages, &TextCodec::default(), &mut replies).unwrap();

        let err = replies.take(Slot::<i64>::new(batch, 0)).unwrap_err();
        assert_eq!(err.server_message(), Some("ERR unknown command"));
        assert_eq!(replies.take(Slot::<i64>::new(batch, 1)).unwrap(), 1);
    }

    #[test]
    fn null_exec_aborts_group() {
        let batch = next_batch_id();
        let mut replies = Replies::new(batch, 1);
        let entries = vec![Entry::Multi, entry(0, reply::integer(), true), Entry::Exec];
        let messages = vec![
            Message::Status("OK".into()),
            Message::Status("QUEUED".into()),
            Message::MultiBulk(None),
        ];
        resolve(entries, messages, &TextCodec::default(), &mut replies).unwrap();
        assert!(matches!(
            replies.take(Slot::<i64>::new(batch, 0)),
            Err(ClientError::TransactionAborted)
        ));
    }

    #[test]
    fn exec_arity_mismatch_is_protocol_error() {
        let batch = next_batch_id();
        let mut replies = Replies::new(batch, 1);
        let entries = vec![Entry::Multi, entry(0, reply::integer(), true), Entry::Exec];
        let messages = vec![
            Message::Status("OK".into()),
            Message::Status("QUEUED".into()),
            Message::array(Vec::new()),
        ];
        let err = resolve(entries, messages, &TextCodec::default(), &mut replies).unwrap_err();
        assert!(err.is_protocol());
    }
}
