//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API over a connection pool for
//! callers that only need request/reply commands.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `Client` hides pooling and connection management.
//! 2. **One Command, One Checkout**: each call borrows a pooled connection
//!    for exactly one exchange.
//! 3. **Escape Hatch**: `connection` hands out a pooled connection for
//!    pipelines, transactions and subscriptions.

use std::time::Duration;

use bytes::Bytes;
use resplink_common::Arg;

use crate::command::Command;
use crate::commands::{self, Ttl};
use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::pool::{ConnectionPool, PooledConnection};

/// Synchronous client with connection pooling.
#[derive(Clone)]
pub struct Client {
    pool: ConnectionPool,
}

impl Client {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ClientConfig::new(addr))
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        Ok(Client {
            pool: ConnectionPool::new(config)?,
        })
    }

    /// Runs any command on a pooled connection.
    pub fn execute<R: 'static>(&self, cmd: &Command<R>) -> ClientResult<R> {
        let mut conn = self.pool.acquire()?;
        conn.call(cmd)
    }

    /// Checks out a connection; it returns to the pool when dropped.
    pub fn connection(&self) -> ClientResult<PooledConnection> {
        self.pool.acquire()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Pings the server and returns its status text.
    pub fn ping(&self) -> ClientResult<String> {
        self.execute(&commands::ping())
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: impl Into<Arg>) -> ClientResult<Option<Bytes>> {
        self.execute(&commands::get(key))
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: impl Into<Arg>, value: impl Into<Arg>) -> ClientResult<()> {
        self.execute(&commands::set(key, value))
    }

    /// Sets a value and attaches an expiration in seconds.
    pub fn set_with_ttl(&self, key: impl Into<Arg>, value: impl Into<Arg>, ttl: Duration) -> ClientResult<()> {
        self.execute(&commands::set_ex(key, value, ttl))
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, key: impl Into<Arg>) -> ClientResult<bool> {
        self.execute(&commands::del([key.into()])).map(|removed| removed > 0)
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: impl Into<Arg>) -> ClientResult<Ttl> {
        self.execute(&commands::ttl(key))
    }
}
