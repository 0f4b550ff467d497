//! Per-export retry accounting with exponential backoff.
//!
//! The attempt counter lives in the shared transport (`export:retry:<id>`),
//! so every processor sharing a queue sees the same count. Requeues are
//! delayed through a [`RequeueScheduler`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use wacrm_core::ExportId;

use super::store::ExportJobStore;
use super::types::{ExportStatus, QueueMessage};
use crate::transport::{QueueTransport, TransportError};

/// Retry policy for export jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first failure (0 = no retries)
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }

    /// Delay for a given attempt number (1-indexed): `base * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = u32::try_from(attempt - 1)
            .ok()
            .and_then(|exp| 2_u32.checked_pow(exp))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    pub fn should_retry(&self, attempt: u64) -> bool {
        attempt <= u64::from(self.max_attempts)
    }
}

/// What the ledger decided after recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub requeue: bool,
    pub delay: Duration,
    /// Failure count including this one.
    pub attempt: u64,
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Delivers a payload back onto a queue after a delay.
pub trait RequeueScheduler: Send + Sync {
    fn schedule(&self, queue: &str, payload: String, delay: Duration);
}

impl<S> RequeueScheduler for Arc<S>
where
    S: RequeueScheduler + ?Sized,
{
    fn schedule(&self, queue: &str, payload: String, delay: Duration) {
        (**self).schedule(queue, payload, delay)
    }
}

/// Sleeps on a detached thread, then pushes.
///
/// Not durable: a pending requeue is lost if the process exits first.
pub struct ThreadScheduler {
    transport: Arc<dyn QueueTransport>,
}

impl ThreadScheduler {
    pub fn new(transport: Arc<dyn QueueTransport>) -> Self {
        Self { transport }
    }
}

impl RequeueScheduler for ThreadScheduler {
    fn schedule(&self, queue: &str, payload: String, delay: Duration) {
        let transport = self.transport.clone();
        let queue = queue.to_string();

        let spawned = thread::Builder::new()
            .name("export-requeue".to_string())
            .spawn(move || {
                thread::sleep(delay);
                if let Err(e) = transport.push(&queue, &payload) {
                    warn!(queue = %queue, error = %e, "delayed requeue failed");
                }
            });

        if let Err(e) = spawned {
            warn!(error = %e, "could not spawn requeue timer");
        }
    }
}

pub const RETRY_KEY_PREFIX: &str = "export:retry:";

pub struct RetryLedger {
    transport: Arc<dyn QueueTransport>,
    store: Arc<dyn ExportJobStore>,
    scheduler: Arc<dyn RequeueScheduler>,
    policy: RetryPolicy,
    queue: String,
}

impl RetryLedger {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        store: Arc<dyn ExportJobStore>,
        scheduler: Arc<dyn RequeueScheduler>,
        policy: RetryPolicy,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            store,
            scheduler,
            policy,
            queue: queue.into(),
        }
    }

    pub fn key(export_id: ExportId) -> String {
        format!("{RETRY_KEY_PREFIX}{export_id}")
    }

    /// Count one more failure and either schedule a delayed requeue or give
    /// up.
    ///
    /// Giving up deletes the counter and marks the job FAILED. A failed store
    /// update at that point is logged; the decision still stands.
    pub fn record_failure_and_decide(&self, export_id: ExportId) -> Result<RetryDecision, RetryError> {
        let key = Self::key(export_id);
        let attempt = u64::try_from(self.transport.incr(&key)?).unwrap_or(0);

        if !self.policy.should_retry(attempt) {
            self.transport.del(&key)?;
            if let Err(e) = self.store.update_status(export_id, ExportStatus::Failed, None) {
                warn!(export_id = %export_id, error = %e, "could not mark exhausted export failed");
            }
            info!(export_id = %export_id, attempt, "export retries exhausted");
            return Ok(RetryDecision {
                requeue: false,
                delay: Duration::ZERO,
                attempt,
            });
        }

        let delay = self.policy.delay_for_attempt(attempt);
        self.scheduler
            .schedule(&self.queue, QueueMessage::new(export_id).to_json(), delay);
        debug!(export_id = %export_id, attempt, ?delay, "export requeue scheduled");

        Ok(RetryDecision {
            requeue: true,
            delay,
            attempt,
        })
    }

    /// Forget the failure history. Safe to call when none exists.
    pub fn clear(&self, export_id: ExportId) -> Result<(), RetryError> {
        self.transport.del(&Self::key(export_id))?;
        Ok(())
    }

    /// Failures recorded so far (0 when none).
    pub fn attempts(&self, export_id: ExportId) -> Result<u64, RetryError> {
        let count = self.transport.get(&Self::key(export_id))?.unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::jobs::store::InMemoryExportJobStore;
    use crate::jobs::types::ExportJob;
    use crate::transport::InMemoryTransport;
    use wacrm_core::WorkspaceId;

    /// Records requeues instead of running timers.
    #[derive(Default)]
    pub(crate) struct ManualScheduler {
        pub scheduled: Mutex<Vec<(String, String, Duration)>>,
    }

    impl ManualScheduler {
        pub fn delays(&self) -> Vec<Duration> {
            self.scheduled.lock().unwrap().iter().map(|s| s.2).collect()
        }
    }

    impl RequeueScheduler for ManualScheduler {
        fn schedule(&self, queue: &str, payload: String, delay: Duration) {
            self.scheduled
                .lock()
                .unwrap()
                .push((queue.to_string(), payload, delay));
        }
    }

    fn ledger() -> (RetryLedger, Arc<InMemoryTransport>, Arc<InMemoryExportJobStore>, Arc<ManualScheduler>) {
        let transport = Arc::new(InMemoryTransport::new());
        let store = InMemoryExportJobStore::arc();
        let scheduler = Arc::new(ManualScheduler::default());
        let ledger = RetryLedger::new(
            transport.clone(),
            store.clone(),
            scheduler.clone(),
            RetryPolicy::default(),
            "q:exports",
        );
        (ledger, transport, store, scheduler)
    }

    #[test]
    fn backoff_doubles_then_gives_up() {
        let (ledger, transport, store, scheduler) = ledger();
        let job = store
            .create(ExportJob::new(WorkspaceId::new(), None, "contacts", serde_json::json!({})))
            .unwrap();

        for (attempt, ms) in [(1, 2000), (2, 4000), (3, 8000)] {
            let decision = ledger.record_failure_and_decide(job.id).unwrap();
            assert!(decision.requeue);
            assert_eq!(decision.attempt, attempt);
            assert_eq!(decision.delay, Duration::from_millis(ms));
        }

        let last = ledger.record_failure_and_decide(job.id).unwrap();
        assert!(!last.requeue);
        assert_eq!(last.attempt, 4);
        assert_eq!(transport.get(&RetryLedger::key(job.id)).unwrap(), None);
        assert_eq!(store.find(job.id).unwrap().unwrap().status, ExportStatus::Failed);

        assert_eq!(
            scheduler.delays(),
            vec![
                Duration::from_millis(2000),
                Duration::from_millis(4000),
                Duration::from_millis(8000)
            ]
        );
        let (queue, payload, _) = scheduler.scheduled.lock().unwrap()[0].clone();
        assert_eq!(queue, "q:exports");
        assert_eq!(QueueMessage::parse(&payload), Some(QueueMessage::new(job.id)));
    }

    #[test]
    fn zero_max_attempts_never_requeues() {
        let transport = Arc::new(InMemoryTransport::new());
        let scheduler = Arc::new(ManualScheduler::default());
        let ledger = RetryLedger::new(
            transport.clone(),
            InMemoryExportJobStore::arc(),
            scheduler.clone(),
            RetryPolicy::no_retry(),
            "q",
        );

        let decision = ledger.record_failure_and_decide(ExportId::new()).unwrap();
        assert!(!decision.requeue);
        assert!(scheduler.delays().is_empty());
    }

    #[test]
    fn clear_is_idempotent() {
        let (ledger, _, _, _) = ledger();
        let id = ExportId::new();

        ledger.clear(id).unwrap();
        ledger.record_failure_and_decide(id).unwrap();
        assert_eq!(ledger.attempts(id).unwrap(), 1);

        ledger.clear(id).unwrap();
        ledger.clear(id).unwrap();
        assert_eq!(ledger.attempts(id).unwrap(), 0);
    }

    #[test]
    fn delay_saturates() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(2).saturating_mul(u32::MAX));
    }

    #[test]
    fn oversized_delay_is_scheduled_unchanged() {
        let scheduler = Arc::new(ManualScheduler::default());
        let ledger = RetryLedger::new(
            Arc::new(InMemoryTransport::new()),
            InMemoryExportJobStore::arc(),
            scheduler.clone(),
            RetryPolicy::new(5, Duration::MAX),
            "q",
        );
        let id = ExportId::new();

        ledger.record_failure_and_decide(id).unwrap();
        let second = ledger.record_failure_and_decide(id).unwrap();
        assert!(second.requeue);
        assert_eq!(second.delay, Duration::MAX);
        assert_eq!(scheduler.delays(), vec![Duration::MAX, Duration::MAX]);
    }

    #[test]
    fn thread_scheduler_pushes_after_delay() {
        let transport = Arc::new(InMemoryTransport::new());
        ThreadScheduler::new(transport.clone()).schedule("q", "payload".into(), Duration::from_millis(10));

        let popped = transport.pop("q", Some(Duration::from_secs(2))).unwrap();
        assert_eq!(popped.as_deref(), Some("payload"));
    }
}
