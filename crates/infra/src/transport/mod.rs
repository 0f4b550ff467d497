//! Queue transport and status bus.
//!
//! The transport is the only shared mutable state between processor
//! instances: the export queue itself, per-job retry counters and the
//! cross-instance gauges all live behind [`QueueTransport`]. Status events go
//! out through [`StatusBus`]. Both are synchronous and blocking.

use std::sync::Arc;
use std::time::Duration;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_queue;

pub use in_memory::{InMemoryTransport, Published};
#[cfg(feature = "redis")]
pub use redis_queue::RedisTransport;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport connection error: {0}")]
    Connection(String),

    #[error("transport command error: {0}")]
    Command(String),
}

/// Durable FIFO queues plus atomic integer counters addressed by string key.
pub trait QueueTransport: Send + Sync {
    /// Append `payload` to the tail of `queue`.
    fn push(&self, queue: &str, payload: &str) -> Result<(), TransportError>;

    /// Take the head of `queue`, blocking until a message arrives.
    ///
    /// `None` timeout waits indefinitely; otherwise `Ok(None)` is returned
    /// once the timeout elapses with the queue still empty.
    fn pop(&self, queue: &str, timeout: Option<Duration>) -> Result<Option<String>, TransportError>;

    /// Atomically increment `key`, returning the new value (missing key = 0).
    fn incr(&self, key: &str) -> Result<i64, TransportError>;

    /// Atomically decrement `key`, returning the new value.
    fn decr(&self, key: &str) -> Result<i64, TransportError>;

    /// Current value of `key`, if set.
    fn get(&self, key: &str) -> Result<Option<i64>, TransportError>;

    /// Delete `key`. Deleting a missing key is not an error.
    fn del(&self, key: &str) -> Result<(), TransportError>;
}

/// Fire-and-acknowledge publish to a named channel.
pub trait StatusBus: Send + Sync {
    fn publish(&self, channel: &str, message: &str) -> Result<(), TransportError>;
}

impl<T> QueueTransport for Arc<T>
where
    T: QueueTransport + ?Sized,
{
    fn push(&self, queue: &str, payload: &str) -> Result<(), TransportError> {
        (**self).push(queue, payload)
    }

    fn pop(&self, queue: &str, timeout: Option<Duration>) -> Result<Option<String>, TransportError> {
        (**self).pop(queue, timeout)
    }

    fn incr(&self, key: &str) -> Result<i64, TransportError> {
        (**self).incr(key)
    }

    fn decr(&self, key: &str) -> Result<i64, TransportError> {
        (**self).decr(key)
    }

    fn get(&self, key: &str) -> Result<Option<i64>, TransportError> {
        (**self).get(key)
    }

    fn del(&self, key: &str) -> Result<(), TransportError> {
        (**self).del(key)
    }
}

impl<B> StatusBus for Arc<B>
where
    B: StatusBus + ?Sized,
{
    fn publish(&self, channel: &str, message: &str) -> Result<(), TransportError> {
        (**self).publish(channel, message)
    }
}
