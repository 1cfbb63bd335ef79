//! # Transaction
//!
//! Purpose: MULTI/EXEC with per-command acknowledgements. Each queued command
//! is sent immediately and its `QUEUED` status read back; the results arrive
//! together in the EXEC reply.
//!
//! ## Design Principles
//! 1. **Consumed On Finish**: `exec` and `discard` take the transaction by
//!    value; dropping it unfinished sends a best-effort DISCARD.
//! 2. **No Replay**: queued commands live on the server side of the old
//!    stream, so a transport failure surfaces instead of reconnecting.

use resplink_common::{Kind, Message, ProtocolError};
use tracing::{debug, warn};

use crate::batch::{self, Deferred, Replies, Slot};
use crate::command::Command;
use crate::connection::{Connection, Mode, Retry};
use crate::error::{ClientError, ClientResult};
use crate::event::Event;
use crate::reply;
use crate::transport::Transport;

/// An open MULTI block.
pub struct Transaction<'a, T: Transport> {
    conn: &'a mut Connection<T>,
    batch: u64,
    queued: Vec<Deferred>,
    finished: bool,
}

impl<T: Transport> Connection<T> {
    /// Sends MULTI and returns the open transaction.
    pub fn multi(&mut self) -> ClientResult<Transaction<'_, T>> {
        self.ensure_ready()?;
        let multi = Command::new("MULTI", reply::ok());
        self.run(Retry::Never, |io| io.round_trip(&multi))?;
        self.set_mode(Mode::Transaction);
        self.publish(Event::TransactionStarted);
        debug!("transaction started");
        Ok(Transaction {
            conn: self,
            batch: batch::next_batch_id(),
            queued: Vec::new(),
            finished: false,
        })
    }
}

impl<'a, T: Transport> Transaction<'a, T> {
    /// Sends `cmd` and waits for the server to queue it.
    ///
    /// An error reply (unknown command, wrong arity) is returned as
    /// `ClientError::Server` and the command takes no slot.
    pub fn queue<R: Send + 'static>(&mut self, cmd: &Command<R>) -> ClientResult<Slot<R>> {
        cmd.check_callable()?;
        let ack = self.conn.run(Retry::Never, |io| {
            io.write_command(cmd)?;
            io.read_message()
        })?;

        let status = match ack {
            Message::Status(status) => status,
            Message::Error(err) => {
                self.conn.publish(Event::TransactionQueued {
                    command: cmd.name().to_string(),
                    args: cmd.arguments().to_vec(),
                    status: err.clone(),
                });
                return Err(ClientError::server(err));
            }
            other => {
                self.conn.mark_broken();
                return Err(ProtocolError::UnexpectedKind {
                    expected: Kind::Status,
                    found: other.kind(),
                }
                .into());
            }
        };

        self.conn.publish(Event::TransactionQueued {
            command: cmd.name().to_string(),
            args: cmd.arguments().to_vec(),
            status: status.clone(),
        });
        if status != "QUEUED" {
            self.conn.mark_broken();
            return Err(ProtocolError::UnexpectedReply(format!("expected QUEUED, got {}", status)).into());
        }

        let index = self.queued.len();
        self.queued.push(Deferred::new(cmd.parser().clone()));
        Ok(Slot::new(self.batch, index))
    }

    /// Number of commands the server accepted.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// Sends EXEC. `None` means the server aborted the transaction (a
    /// watched key changed).
    pub fn exec(mut self) -> ClientResult<Option<Replies>> {
        self.finished = true;
        let exec = Command::new("EXEC", reply::raw());
        let result = self.conn.run(Retry::Never, |io| io.round_trip(&exec));
        self.conn.set_mode(Mode::Normal);
        debug!(queued = self.queued.len(), "transaction exec");

        let items = match result? {
            Message::MultiBulk(Some(items)) => items,
            Message::MultiBulk(None) => return Ok(None),
            other => {
                return Err(ProtocolError::UnexpectedKind {
                    expected: Kind::MultiBulk,
                    found: other.kind(),
                }
                .into())
            }
        };
        let queued = std::mem::take(&mut self.queued);
        if items.len() != queued.len() {
            self.conn.mark_broken();
            return Err(ProtocolError::ArityMismatch {
                expected: queued.len(),
                found: items.len(),
            }
            .into());
        }

        let text = *self.conn.text();
        let mut replies = Replies::new(self.batch, queued.len());
        for (index, (deferred, item)) in queued.into_iter().zip(items).enumerate() {
            replies.resolve(index, deferred, item, &text);
        }
        Ok(Some(replies))
    }

    /// Sends DISCARD; nothing queued runs.
    pub fn discard(mut self) -> ClientResult<()> {
        self.finished = true;
        let discard = Command::new("DISCARD", reply::ok());
        let result = self.conn.run(Retry::Never, |io| io.round_trip(&discard));
        self.conn.set_mode(Mode::Normal);
        debug!(queued = self.queued.len(), "transaction discarded");
        result
    }
}

impl<T: Transport> Drop for Transaction<'_, T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let discard = Command::new("DISCARD", reply::ok());
        if let Err(err) = self.conn.run(Retry::Never, |io| io.round_trip(&discard)) {
            warn!(error = %err, "discard on drop failed");
            self.conn.mark_broken();
        }
        self.conn.set_mode(Mode::Normal);
    }
}
