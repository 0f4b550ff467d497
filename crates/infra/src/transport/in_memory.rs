//! In-memory transport for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{QueueTransport, StatusBus, TransportError};

/// A message sent through [`StatusBus::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub channel: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, VecDeque<String>>,
    counters: HashMap<String, i64>,
    published: Vec<Published>,
}

/// Single-process queue, counters and bus.
///
/// Blocking pops park on a condition variable until a push arrives.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    state: Mutex<State>,
    ready: Condvar,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<Published> {
        self.state.lock().unwrap().published.clone()
    }

    /// Messages published on `channel`, in order.
    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|p| p.channel == channel)
            .map(|p| p.message.clone())
            .collect()
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }
}

impl QueueTransport for InMemoryTransport {
    fn push(&self, queue: &str, payload: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.to_string());
        self.ready.notify_all();
        Ok(())
    }

    fn pop(&self, queue: &str, timeout: Option<Duration>) -> Result<Option<String>, TransportError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock().unwrap();

        loop {
            if let Some(msg) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) {
                return Ok(Some(msg));
            }

            match deadline {
                None => state = self.ready.wait(state).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    state = self.ready.wait_timeout(state, deadline - now).unwrap().0;
                }
            }
        }
    }

    fn incr(&self, key: &str) -> Result<i64, TransportError> {
        let mut state = self.state.lock().unwrap();
        let value = state.counters.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    fn decr(&self, key: &str) -> Result<i64, TransportError> {
        let mut state = self.state.lock().unwrap();
        let value = state.counters.entry(key.to_string()).or_insert(0);
        *value -= 1;
        Ok(*value)
    }

    fn get(&self, key: &str) -> Result<Option<i64>, TransportError> {
        Ok(self.state.lock().unwrap().counters.get(key).copied())
    }

    fn del(&self, key: &str) -> Result<(), TransportError> {
        self.state.lock().unwrap().counters.remove(key);
        Ok(())
    }
}

impl StatusBus for InMemoryTransport {
    fn publish(&self, channel: &str, message: &str) -> Result<(), TransportError> {
        self.state.lock().unwrap().published.push(Published {
            channel: channel.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn queue_is_fifo() {
        let t = InMemoryTransport::new();
        t.push("q", "a").unwrap();
        t.push("q", "b").unwrap();

        assert_eq!(t.pop("q", Some(Duration::ZERO)).unwrap().as_deref(), Some("a"));
        assert_eq!(t.pop("q", Some(Duration::ZERO)).unwrap().as_deref(), Some("b"));
        assert_eq!(t.pop("q", Some(Duration::from_millis(5))).unwrap(), None);
    }

    #[test]
    fn blocking_pop_wakes_on_push() {
        let t = Arc::new(InMemoryTransport::new());
        let consumer = {
            let t = t.clone();
            thread::spawn(move || t.pop("q", None).unwrap())
        };

        thread::sleep(Duration::from_millis(20));
        t.push("q", "late").unwrap();

        assert_eq!(consumer.join().unwrap().as_deref(), Some("late"));
    }

    #[test]
    fn counters() {
        let t = InMemoryTransport::new();
        assert_eq!(t.get("k").unwrap(), None);
        assert_eq!(t.incr("k").unwrap(), 1);
        assert_eq!(t.incr("k").unwrap(), 2);
        assert_eq!(t.decr("k").unwrap(), 1);
        t.del("k").unwrap();
        t.del("k").unwrap();
        assert_eq!(t.get("k").unwrap(), None);
    }
}
