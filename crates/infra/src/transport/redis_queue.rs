//! Redis-backed queue transport and status bus.
//!
//! - Queue: `LPUSH` producers, `BRPOP` consumers (FIFO, one consumer per message)
//! - Counters: `INCR` / `DECR` / `GET` / `DEL` (single-key atomic)
//! - Bus: `PUBLISH` (not durable; offline subscribers miss events)

use std::time::Duration;

use tracing::{debug, instrument};

use super::{QueueTransport, StatusBus, TransportError};

#[derive(Debug, Clone)]
pub struct RedisTransport {
    client: redis::Client,
}

impl RedisTransport {
    /// Open a client. No connection is made until the first command.
    pub fn open(redis_url: impl AsRef<str>) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client })
    }

    /// Open a client and verify the server answers `PING`.
    pub fn connect(redis_url: impl AsRef<str>) -> Result<Self, TransportError> {
        let transport = Self::open(redis_url)?;
        let mut conn = transport.connection()?;
        let _: String = redis::cmd("PING")
            .query(&mut conn)
            .map_err(|e| TransportError::Connection(format!("PING failed: {}", e)))?;
        Ok(transport)
    }

    fn connection(&self) -> Result<redis::Connection, TransportError> {
        self.client
            .get_connection()
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd, name: &str) -> Result<T, TransportError> {
        let mut conn = self.connection()?;
        cmd.query(&mut conn)
            .map_err(|e| TransportError::Command(format!("{} failed: {}", name, e)))
    }
}

impl QueueTransport for RedisTransport {
    fn push(&self, queue: &str, payload: &str) -> Result<(), TransportError> {
        let _: i64 = self.query(redis::cmd("LPUSH").arg(queue).arg(payload), "LPUSH")?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    fn pop(&self, queue: &str, timeout: Option<Duration>) -> Result<Option<String>, TransportError> {
        // BRPOP with 0 blocks indefinitely.
        let secs = timeout.map_or(0.0, |t| t.as_secs_f64().max(0.001));
        let popped: Option<(String, String)> =
            self.query(redis::cmd("BRPOP").arg(queue).arg(secs), "BRPOP")?;

        if popped.is_none() {
            debug!(queue, "BRPOP timed out");
        }
        Ok(popped.map(|(_, payload)| payload))
    }

    fn incr(&self, key: &str) -> Result<i64, TransportError> {
        self.query(redis::cmd("INCR").arg(key), "INCR")
    }

    fn decr(&self, key: &str) -> Result<i64, TransportError> {
        self.query(redis::cmd("DECR").arg(key), "DECR")
    }

    fn get(&self, key: &str) -> Result<Option<i64>, TransportError> {
        self.query(redis::cmd("GET").arg(key), "GET")
    }

    fn del(&self, key: &str) -> Result<(), TransportError> {
        let _: i64 = self.query(redis::cmd("DEL").arg(key), "DEL")?;
        Ok(())
    }
}

impl StatusBus for RedisTransport {
    fn publish(&self, channel: &str, message: &str) -> Result<(), TransportError> {
        let _: i64 = self.query(redis::cmd("PUBLISH").arg(channel).arg(message), "PUBLISH")?;
        Ok(())
    }
}
