//! # Client Configuration
//!
//! Purpose: Collect every tunable of a connection in one serde-friendly
//! struct: address, socket timeouts, reconnection policy, text rules and
//! pool limits.
//!
//! ## Usage Notes
//! - Durations are expressed in milliseconds when (de)serialized.
//! - Missing fields fall back to `ClientConfig::default()`.

use std::time::Duration;

use resplink_common::{Charset, NumberFormat, TextCodec};
use serde::{Deserialize, Serialize};

/// How many reconnection attempts a failed operation may trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attempts {
    /// At most this many attempts; zero disables reconnection.
    Limited(u32),
    /// Keep trying until the transport comes back.
    Unlimited,
}

/// Bounded retry-with-backoff applied to transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub attempts: Attempts,
    /// Fixed wait between two consecutive attempts.
    #[serde(with = "millis")]
    pub wait: Duration,
}

impl ReconnectPolicy {
    /// A policy that never reconnects.
    pub const fn disabled() -> Self {
        ReconnectPolicy {
            attempts: Attempts::Limited(0),
            wait: Duration::ZERO,
        }
    }

    pub const fn limited(attempts: u32, wait: Duration) -> Self {
        ReconnectPolicy {
            attempts: Attempts::Limited(attempts),
            wait,
        }
    }

    pub const fn unlimited(wait: Duration) -> Self {
        ReconnectPolicy {
            attempts: Attempts::Unlimited,
            wait,
        }
    }

    /// True unless reconnection is switched off.
    pub fn is_enabled(&self) -> bool {
        self.attempts != Attempts::Limited(0)
    }

    /// True when the 1-based `attempt` is still within budget.
    pub fn allows(&self, attempt: u32) -> bool {
        match self.attempts {
            Attempts::Limited(max) => attempt <= max,
            Attempts::Unlimited => true,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::limited(3, Duration::from_millis(100))
    }
}

/// Configuration for connections, the pool and the client facade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Optional TCP connect timeout.
    #[serde(with = "opt_millis")]
    pub connect_timeout: Option<Duration>,
    /// Optional TCP read timeout; expiry is a transport failure.
    #[serde(with = "opt_millis")]
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout; expiry is a transport failure.
    #[serde(with = "opt_millis")]
    pub write_timeout: Option<Duration>,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
    /// Reconnection behavior on transport failures.
    pub reconnect: ReconnectPolicy,
    /// Charset for text arguments and replies.
    pub charset: Charset,
    /// Float rendering rules for numeric arguments.
    pub numbers: NumberFormat,
    /// Sent as `AUTH` after every (re)connect.
    pub password: Option<String>,
    /// Sent as `SELECT` after every (re)connect.
    pub database: Option<i64>,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Default chunk size for streamed bulk reads.
    pub stream_chunk_size: usize,
    /// Capacity of the event channel; slow observers see `Lagged`.
    pub event_capacity: usize,
}

impl ClientConfig {
    /// Default configuration pointed at `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        }
    }

    /// Text rules derived from `charset` and `numbers`.
    pub fn text_codec(&self) -> TextCodec {
        TextCodec::new(self.charset, self.numbers)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            nodelay: true,
            reconnect: ReconnectPolicy::default(),
            charset: Charset::Utf8,
            numbers: NumberFormat::default(),
            password: None,
            database: None,
            max_idle: 8,
            max_total: 16,
            stream_chunk_size: 8 * 1024,
            event_capacity: 64,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_some(&(value.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
