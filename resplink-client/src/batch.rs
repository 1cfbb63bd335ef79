//! Typed placeholders for replies that arrive later.
//!
//! Pipelines and transactions hand out a `Slot<T>` per queued command and
//! keep a type-erased parser for it. Once the replies are read, each parser
//! stores its `ClientResult<T>` in `Replies`, where the slot retrieves it
//! with its original type. The unparsed reply of every slot is kept too, for
//! callers that want the whole batch as messages in issue order.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use resplink_common::{Message, TextCodec};

use crate::error::{ClientError, ClientResult, UsageError};
use crate::reply::Parser;

static NEXT_BATCH: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_batch_id() -> u64 {
    NEXT_BATCH.fetch_add(1, Ordering::Relaxed)
}

type Erased = Box<dyn Any + Send>;

/// Placeholder for the reply to one queued command.
pub struct Slot<T> {
    batch: u64,
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Slot<T> {
    pub(crate) fn new(batch: u64, index: usize) -> Self {
        Slot {
            batch,
            index,
            _marker: PhantomData,
        }
    }

    /// Position of the command within its batch.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("batch", &self.batch)
            .field("index", &self.index)
            .finish()
    }
}

/// A parser whose result type has been erased until `Replies::take`.
pub(crate) struct Deferred {
    parse: Box<dyn FnOnce(Message, &TextCodec) -> Erased + Send>,
    fail: fn(ClientError) -> Erased,
}

fn fail_as<T: Send + 'static>(err: ClientError) -> Erased {
    Box::new(ClientResult::<T>::Err(err))
}

impl Deferred {
    pub(crate) fn new<T: Send + 'static>(parser: Parser<T>) -> Self {
        Deferred {
            parse: Box::new(move |message, text| Box::new(parser.parse(message, text)) as Erased),
            fail: fail_as::<T>,
        }
    }

    pub(crate) fn resolve(self, message: Message, text: &TextCodec) -> Erased {
        (self.parse)(message, text)
    }

    pub(crate) fn reject(self, err: ClientError) -> Erased {
        (self.fail)(err)
    }
}

/// Ordered results of a pipeline or transaction.
pub struct Replies {
    batch: u64,
    values: Vec<Option<Erased>>,
    raw: Vec<Option<Message>>,
}

impl Replies {
    pub(crate) fn new(batch: u64, len: usize) -> Self {
        let mut values = Vec::with_capacity(len);
        values.resize_with(len, || None);
        Replies {
            batch,
            values,
            raw: vec![None; len],
        }
    }

    pub(crate) fn set(&mut self, index: usize, value: Erased) {
        if let Some(entry) = self.values.get_mut(index) {
            *entry = Some(value);
        }
    }

    /// Keeps `message` as the unparsed reply of slot `index`.
    pub(crate) fn record(&mut self, index: usize, message: Message) {
        if let Some(entry) = self.raw.get_mut(index) {
            *entry = Some(message);
        }
    }

    /// Parses `message` for slot `index`, keeping a copy of the reply.
    pub(crate) fn resolve(&mut self, index: usize, deferred: Deferred, message: Message, text: &TextCodec) {
        self.record(index, message.clone());
        self.set(index, deferred.resolve(message, text));
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Takes the result for `slot`, exactly what an un-batched call would
    /// have returned.
    pub fn take<T: 'static>(&mut self, slot: Slot<T>) -> ClientResult<T> {
        if slot.batch != self.batch {
            return Err(UsageError::ForeignSlot.into());
        }
        let value = self
            .values
            .get_mut(slot.index)
            .and_then(Option::take)
            .ok_or(ClientError::Usage(UsageError::ForeignSlot))?;
        match value.downcast::<ClientResult<T>>() {
            Ok(result) => *result,
            Err(_) => Err(UsageError::ForeignSlot.into()),
        }
    }

    /// Takes every slot in order, failing on the first error.
    pub fn take_all<T: 'static>(&mut self, slots: Vec<Slot<T>>) -> ClientResult<Vec<T>> {
        slots.into_iter().map(|slot| self.take(slot)).collect()
    }

    /// The unparsed reply for the command at `index`. Server errors are kept
    /// as `Message::Error`; `None` means the command never ran, e.g. inside
    /// an aborted or discarded transaction.
    pub fn message(&self, index: usize) -> Option<&Message> {
        self.raw.get(index).and_then(Option::as_ref)
    }

    /// Every unparsed reply, in the order the commands were issued.
    pub fn into_messages(self) -> Vec<Option<Message>> {
        self.raw
    }
}

impl fmt::Debug for Replies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replies")
            .field("batch", &self.batch)
            .field("len", &self.values.len())
            .field("answered", &self.raw.iter().filter(|m| m.is_some()).count())
            .finish()
    }
}
