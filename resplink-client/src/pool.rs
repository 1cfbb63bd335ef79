//! # Connection Pool
//!
//! Purpose: Reuse TCP connections across calls to avoid repeated handshakes
//! (connect, AUTH, SELECT).
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Fail Fast**: Exceeding the pool limit returns an error immediately.
//! 4. **Healthy Only**: A connection whose stream broke is never returned
//!    to the idle set.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{ClientError, ClientResult};
use crate::transport::TcpTransport;

struct PoolState {
    idle: VecDeque<Connection>,
    total: usize,
}

struct PoolInner {
    config: ClientConfig,
    transport: TcpTransport,
    state: Mutex<PoolState>,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool; connections are opened lazily by `acquire`.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let transport = TcpTransport::from_config(&config)?;
        let state = PoolState {
            idle: VecDeque::with_capacity(config.max_idle),
            total: 0,
        };
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                transport,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Acquires a connection from the pool.
    pub fn acquire(&self) -> ClientResult<PooledConnection> {
        if let Some(conn) = self.pop_idle() {
            return Ok(PooledConnection::new(self.inner.clone(), conn));
        }

        if !self.try_reserve() {
            return Err(ClientError::PoolExhausted);
        }

        let transport = self.inner.transport.clone();
        match Connection::connect(transport, self.inner.config.clone()) {
            Ok(conn) => {
                debug!(addr = %self.inner.config.addr, "pool opened connection");
                Ok(PooledConnection::new(self.inner.clone(), conn))
            }
            Err(err) => {
                self.release_slot();
                Err(err)
            }
        }
    }

    /// Idle and total connection counts.
    pub fn stats(&self) -> (usize, usize) {
        let state = self.inner.state.lock().expect("pool mutex poisoned");
        (state.idle.len(), state.total)
    }

    fn pop_idle(&self) -> Option<Connection> {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.idle.pop_front()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if state.total >= self.inner.config.max_total {
            return false;
        }
        state.total += 1;
        true
    }

    fn release_slot(&self) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        state.total = state.total.saturating_sub(1);
    }

    fn return_connection(&self, conn: Connection) {
        let mut state = self.inner.state.lock().expect("pool mutex poisoned");
        if state.idle.len() < self.inner.config.max_idle {
            state.idle.push_back(conn);
        } else {
            state.total = state.total.saturating_sub(1);
        }
    }
}

/// RAII wrapper returning a healthy connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
        }
    }

    /// Removes the connection from the pool's accounting.
    pub fn detach(mut self) -> Option<Connection> {
        let conn = self.conn.take();
        ConnectionPool {
            inner: self.pool.clone(),
        }
        .release_slot();
        conn
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `detach` and `drop` take the connection, both by value.
        self.conn.as_ref().expect("connection exists")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection exists")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };

        let pool = ConnectionPool {
            inner: self.pool.clone(),
        };

        if conn.is_healthy() {
            pool.return_connection(conn);
        } else {
            debug!(state = ?conn.state(), "discarding unhealthy pooled connection");
            pool.release_slot();
        }
    }
}
