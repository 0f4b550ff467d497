//! Export queue consumer.
//!
//! Each message names one export job. The processor reloads the job,
//! re-checks the creator's *current* permissions, builds the CSV and records
//! the outcome. Deterministic faults (missing creator, revoked permission,
//! unsupported type) fail the job without retry; everything else goes through
//! the [`RetryLedger`].

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use wacrm_auth::{codes, LookupError, PermissionLookup};
use wacrm_core::{ExportId, WorkspaceId};

use super::retry::{RequeueScheduler, RetryLedger, RetryPolicy, ThreadScheduler};
use super::store::{ExportJobStore, StoreError};
use super::types::{ExportJob, ExportStatus, ExportType, QueueMessage, StatusEvent};
use crate::audit::{AuditEntry, AuditLog};
use crate::exports::{CsvBuilder, ExportError, ExportFiles};
use crate::transport::{QueueTransport, StatusBus, TransportError};

pub const INFLIGHT_GAUGE: &str = "metrics:exports:inflight";
pub const FAILED_COUNTER: &str = "metrics:exports:failed";

const AUDIT_ENTITY: &str = "export";
const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Collaborators the processor talks to.
#[derive(Clone)]
pub struct ProcessorDeps {
    pub store: Arc<dyn ExportJobStore>,
    pub permissions: Arc<dyn PermissionLookup>,
    pub audit: Arc<dyn AuditLog>,
    pub csv: Arc<dyn CsvBuilder>,
    pub transport: Arc<dyn QueueTransport>,
    pub bus: Arc<dyn StatusBus>,
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub queue: String,
    pub exports_dir: PathBuf,
    pub retry: RetryPolicy,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            queue: "q:exports".to_string(),
            exports_dir: PathBuf::from("exports"),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MalformedPayload,
    UnknownExport,
}

/// Deterministic faults. Retrying would not change the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    MissingCreator,
    MissingPermission,
    UnsupportedType,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingCreator => "missing_creator",
            RejectReason::MissingPermission => "missing_permission",
            RejectReason::UnsupportedType => "unsupported_type",
        }
    }
}

/// How one message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Dropped(DropReason),
    Rejected(RejectReason),
    Completed { file_ref: String },
    Retrying { attempt: u64, delay: Duration },
    GaveUp { attempts: u64 },
    /// The failure could not be counted (retry store unreachable).
    RetryUnrecorded,
}

/// Transient failure while processing a job.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

/// Keeps `metrics:exports:inflight` raised while a message is handled.
struct InflightGauge<'a> {
    transport: &'a dyn QueueTransport,
    raised: bool,
}

impl<'a> InflightGauge<'a> {
    fn enter(transport: &'a dyn QueueTransport) -> Self {
        let raised = match transport.incr(INFLIGHT_GAUGE) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "inflight gauge not raised");
                false
            }
        };
        Self { transport, raised }
    }
}

impl Drop for InflightGauge<'_> {
    fn drop(&mut self) {
        if self.raised {
            if let Err(e) = self.transport.decr(INFLIGHT_GAUGE) {
                warn!(error = %e, "inflight gauge not lowered");
            }
        }
    }
}

pub struct ExportJobProcessor {
    deps: ProcessorDeps,
    queue: String,
    files: ExportFiles,
    ledger: RetryLedger,
}

impl ExportJobProcessor {
    /// Processor whose retries are delayed on detached timer threads.
    pub fn new(deps: ProcessorDeps, settings: ProcessorSettings) -> Self {
        let scheduler = Arc::new(ThreadScheduler::new(deps.transport.clone()));
        Self::with_scheduler(deps, settings, scheduler)
    }

    pub fn with_scheduler(
        deps: ProcessorDeps,
        settings: ProcessorSettings,
        scheduler: Arc<dyn RequeueScheduler>,
    ) -> Self {
        let ledger = RetryLedger::new(
            deps.transport.clone(),
            deps.store.clone(),
            scheduler,
            settings.retry,
            settings.queue.clone(),
        );

        Self {
            files: ExportFiles::new(settings.exports_dir),
            queue: settings.queue,
            ledger,
            deps,
        }
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    /// Consume forever. Transport errors pause the loop, they never end it.
    pub fn run(&self) -> ! {
        info!(queue = %self.queue, "export processor started");
        loop {
            match self.deps.transport.pop(&self.queue, None) {
                Ok(Some(raw)) => {
                    self.handle_message(&raw);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(queue = %self.queue, error = %e, "queue pop failed");
                    thread::sleep(ERROR_PAUSE);
                }
            }
        }
    }

    /// One bounded pop. `Ok(None)` when nothing arrived in time.
    pub fn tick(&self, timeout: Duration) -> Result<Option<Outcome>, TransportError> {
        let raw = self.deps.transport.pop(&self.queue, Some(timeout))?;
        Ok(raw.map(|raw| self.handle_message(&raw)))
    }

    pub fn handle_message(&self, raw: &str) -> Outcome {
        let _inflight = InflightGauge::enter(self.deps.transport.as_ref());

        let Some(message) = QueueMessage::parse(raw) else {
            warn!(payload = %raw, "dropping malformed export message");
            return Outcome::Dropped(DropReason::MalformedPayload);
        };
        let export_id = message.export_id;

        let job = match self.deps.store.find(export_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(export_id = %export_id, "dropping message for unknown export");
                return Outcome::Dropped(DropReason::UnknownExport);
            }
            Err(e) => return self.fail_transient(export_id, None, e.into()),
        };

        let outcome = match self.process(&job) {
            Ok(outcome) => outcome,
            Err(e) => self.fail_transient(job.id, Some(job.workspace_id), e),
        };
        debug!(export_id = %export_id, ?outcome, "export message handled");
        outcome
    }

    fn process(&self, job: &ExportJob) -> Result<Outcome, ProcessError> {
        let Some(creator) = job.created_by else {
            return self.reject(job, RejectReason::MissingCreator);
        };

        let permissions = self.deps.permissions.permission_codes(creator, job.workspace_id)?;
        if !permissions.contains(&codes::REPORTS_EXPORT) {
            warn!(
                export_id = %job.id,
                workspace_id = %job.workspace_id,
                user_id = %creator,
                reason = RejectReason::MissingPermission.as_str(),
                "export creator lost reports:export"
            );
            return self.reject(job, RejectReason::MissingPermission);
        }

        let Ok(export_type) = job.export_type.parse::<ExportType>() else {
            return self.reject(job, RejectReason::UnsupportedType);
        };

        self.deps.store.update_status(job.id, ExportStatus::Processing, None)?;
        self.publish(job.id, Some(job.workspace_id), ExportStatus::Processing);

        let csv = self.deps.csv.build(export_type, job.workspace_id, &job.params)?;
        let file_ref = self.files.write(job.id, &csv)?;

        self.deps
            .store
            .update_status(job.id, ExportStatus::Done, Some(&file_ref))?;
        if let Err(e) = self.ledger.clear(job.id) {
            warn!(export_id = %job.id, error = %e, "retry state not cleared");
        }
        self.publish(job.id, Some(job.workspace_id), ExportStatus::Done);
        self.audit(job, "export.completed", json!({ "fileRef": file_ref }));

        info!(export_id = %job.id, workspace_id = %job.workspace_id, file_ref = %file_ref, "export completed");
        Ok(Outcome::Completed { file_ref })
    }

    fn reject(&self, job: &ExportJob, reason: RejectReason) -> Result<Outcome, ProcessError> {
        self.deps.store.update_status(job.id, ExportStatus::Failed, None)?;
        // An earlier transient failure may have left a counter behind.
        if let Err(e) = self.ledger.clear(job.id) {
            warn!(export_id = %job.id, error = %e, "retry state not cleared");
        }
        self.audit(job, "export.failed", json!({ "reason": reason.as_str() }));
        self.publish(job.id, Some(job.workspace_id), ExportStatus::Failed);

        info!(export_id = %job.id, reason = reason.as_str(), "export rejected");
        Ok(Outcome::Rejected(reason))
    }

    fn fail_transient(
        &self,
        export_id: ExportId,
        workspace_id: Option<WorkspaceId>,
        err: ProcessError,
    ) -> Outcome {
        error!(export_id = %export_id, error = %err, "export attempt failed");

        if let Err(e) = self.deps.transport.incr(FAILED_COUNTER) {
            warn!(error = %e, "failure counter not incremented");
        }
        if let Err(e) = self.deps.store.update_status(export_id, ExportStatus::Failed, None) {
            warn!(export_id = %export_id, error = %e, "could not mark export failed");
        }
        self.publish(export_id, workspace_id, ExportStatus::Failed);

        match self.ledger.record_failure_and_decide(export_id) {
            Ok(decision) if decision.requeue => Outcome::Retrying {
                attempt: decision.attempt,
                delay: decision.delay,
            },
            Ok(decision) => {
                if let Some(workspace_id) = workspace_id {
                    self.deps.audit.log(
                        AuditEntry::new(workspace_id, "export.failed", AUDIT_ENTITY, export_id).with_after(json!({
                            "reason": "retries_exhausted",
                            "attempts": decision.attempt,
                        })),
                    );
                }
                Outcome::GaveUp {
                    attempts: decision.attempt,
                }
            }
            Err(e) => {
                error!(export_id = %export_id, error = %e, "retry state unavailable");
                Outcome::RetryUnrecorded
            }
        }
    }

    fn audit(&self, job: &ExportJob, action: &str, after: serde_json::Value) {
        self.deps
            .audit
            .log(AuditEntry::new(job.workspace_id, action, AUDIT_ENTITY, job.id).with_after(after));
    }

    fn publish(&self, export_id: ExportId, workspace_id: Option<WorkspaceId>, status: ExportStatus) {
        let event = StatusEvent::new(export_id, workspace_id, status);
        let message = match serde_json::to_string(&event) {
            Ok(m) => m,
            Err(e) => {
                warn!(export_id = %export_id, error = %e, "status event not serialised");
                return;
            }
        };
        if let Err(e) = self.deps.bus.publish(&event.channel(), &message) {
            warn!(export_id = %export_id, status = %status, error = %e, "status event not published");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Value;

    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::jobs::enqueue::{enqueue_export, NewExport};
    use crate::jobs::retry::tests::ManualScheduler;
    use crate::jobs::store::InMemoryExportJobStore;
    use crate::transport::InMemoryTransport;
    use wacrm_auth::{PermissionSet, StaticPermissions};
    use wacrm_core::UserId;

    #[derive(Default)]
    struct StubCsv {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CsvBuilder for StubCsv {
        fn contacts_csv(&self, _: WorkspaceId, _: &Value) -> Result<String, ExportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ExportError::Builder("database unavailable".into()));
            }
            Ok("id,name\r\n1,Ada\r\n".to_string())
        }

        fn messages_csv(&self, ws: WorkspaceId, params: &Value) -> Result<String, ExportError> {
            self.contacts_csv(ws, params)
        }
    }

    struct Harness {
        processor: ExportJobProcessor,
        store: Arc<InMemoryExportJobStore>,
        permissions: Arc<StaticPermissions>,
        audit: Arc<InMemoryAuditLog>,
        csv: Arc<StubCsv>,
        transport: Arc<InMemoryTransport>,
        scheduler: Arc<ManualScheduler>,
        dir: tempfile::TempDir,
    }

    fn harness(csv: StubCsv) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryExportJobStore::arc();
        let permissions = Arc::new(StaticPermissions::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let csv = Arc::new(csv);
        let transport = Arc::new(InMemoryTransport::new());
        let scheduler = Arc::new(ManualScheduler::default());

        let deps = ProcessorDeps {
            store: store.clone(),
            permissions: permissions.clone(),
            audit: audit.clone(),
            csv: csv.clone(),
            transport: transport.clone(),
            bus: transport.clone(),
        };
        let settings = ProcessorSettings {
            exports_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        Harness {
            processor: ExportJobProcessor::with_scheduler(deps, settings, scheduler.clone()),
            store,
            permissions,
            audit,
            csv,
            transport,
            scheduler,
            dir,
        }
    }

    impl Harness {
        fn job(&self, created_by: Option<UserId>, export_type: &str) -> ExportJob {
            self.store
                .create(ExportJob::new(WorkspaceId::new(), created_by, export_type, serde_json::json!({})))
                .unwrap()
        }

        fn authorised_job(&self, export_type: &str) -> ExportJob {
            let user = UserId::new();
            let job = self.job(Some(user), export_type);
            self.permissions.grant(user, job.workspace_id, codes::REPORTS_EXPORT);
            job
        }

        fn handle(&self, job: &ExportJob) -> Outcome {
            self.processor.handle_message(&QueueMessage::new(job.id).to_json())
        }

        fn status(&self, job: &ExportJob) -> ExportStatus {
            self.store.find(job.id).unwrap().unwrap().status
        }

        fn published_statuses(&self, job: &ExportJob) -> Vec<String> {
            self.transport
                .published_on(&format!("ev:ws:{}", job.workspace_id))
                .iter()
                .map(|m| serde_json::from_str::<Value>(m).unwrap()["status"].as_str().unwrap().to_string())
                .collect()
        }

        fn gauge(&self) -> i64 {
            self.transport.get(INFLIGHT_GAUGE).unwrap().unwrap_or(0)
        }
    }

    #[test]
    fn completes_end_to_end() {
        let h = harness(StubCsv::default());
        let job = h.authorised_job("contacts");

        let outcome = h.handle(&job);
        let expected_ref = format!("{}.csv", job.id);
        assert_eq!(outcome, Outcome::Completed { file_ref: expected_ref.clone() });

        let stored = h.store.find(job.id).unwrap().unwrap();
        assert_eq!(stored.status, ExportStatus::Done);
        assert_eq!(stored.file_ref.as_deref(), Some(expected_ref.as_str()));
        assert_eq!(h.published_statuses(&job), vec!["PROCESSING", "DONE"]);

        let written = std::fs::read_to_string(h.dir.path().join(&expected_ref)).unwrap();
        assert!(written.starts_with("id,name"));

        let completed = h.audit.with_action("export.completed");
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].after_json, Some(serde_json::json!({ "fileRef": expected_ref })));
        assert_eq!(h.gauge(), 0);
    }

    #[test]
    fn revoked_permission_fails_without_retry() {
        let h = harness(StubCsv::default());
        let job = h.job(Some(UserId::new()), "contacts");

        assert_eq!(h.handle(&job), Outcome::Rejected(RejectReason::MissingPermission));
        assert_eq!(h.status(&job), ExportStatus::Failed);
        assert_eq!(h.processor.ledger().attempts(job.id).unwrap(), 0);
        assert_eq!(h.csv.calls.load(Ordering::SeqCst), 0);
        assert!(h.scheduler.delays().is_empty());
        assert_eq!(h.published_statuses(&job), vec!["FAILED"]);

        let failed = h.audit.with_action("export.failed");
        assert_eq!(failed[0].after_json, Some(serde_json::json!({ "reason": "missing_permission" })));
    }

    #[test]
    fn missing_creator_audited_once() {
        let h = harness(StubCsv::default());
        let job = h.job(None, "contacts");

        assert_eq!(h.handle(&job), Outcome::Rejected(RejectReason::MissingCreator));
        assert_eq!(h.csv.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.status(&job), ExportStatus::Failed);

        let entries = h.audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "export.failed");
        assert_eq!(entries[0].entity_id, job.id.to_string());
        assert_eq!(entries[0].after_json, Some(serde_json::json!({ "reason": "missing_creator" })));
    }

    #[test]
    fn unsupported_type_rejected() {
        let h = harness(StubCsv::default());
        let job = h.authorised_job("campaigns");

        assert_eq!(h.handle(&job), Outcome::Rejected(RejectReason::UnsupportedType));
        assert_eq!(h.status(&job), ExportStatus::Failed);
        assert_eq!(h.csv.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.published_statuses(&job), vec!["FAILED"]);
        assert!(h.scheduler.delays().is_empty());

        let failed = h.audit.with_action("export.failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].after_json, Some(serde_json::json!({ "reason": "unsupported_type" })));
    }

    #[test]
    fn permission_revoked_between_retries_leaves_no_attempts() {
        let h = harness(StubCsv { fail: true, ..Default::default() });
        let job = h.authorised_job("contacts");

        assert!(matches!(h.handle(&job), Outcome::Retrying { attempt: 1, .. }));
        assert_eq!(h.processor.ledger().attempts(job.id).unwrap(), 1);

        let creator = job.created_by.unwrap();
        h.permissions.set(creator, job.workspace_id, PermissionSet::new());

        assert_eq!(h.handle(&job), Outcome::Rejected(RejectReason::MissingPermission));
        assert_eq!(h.status(&job), ExportStatus::Failed);
        assert_eq!(h.processor.ledger().attempts(job.id).unwrap(), 0);
        assert_eq!(h.scheduler.delays().len(), 1);
    }

    #[test]
    fn enqueued_export_publishes_processing_then_done() {
        let h = harness(StubCsv::default());
        let user = UserId::new();
        let workspace_id = WorkspaceId::new();
        h.permissions.grant(user, workspace_id, codes::REPORTS_EXPORT);

        let job = enqueue_export(
            h.store.as_ref(),
            h.transport.as_ref(),
            "q:exports",
            NewExport {
                workspace_id,
                created_by: Some(user),
                export_type: "contacts".to_string(),
                params: serde_json::json!({ "tag": "vip" }),
            },
        )
        .unwrap();
        assert_eq!(job.status, ExportStatus::Pending);

        let outcome = h.processor.tick(Duration::from_millis(50)).unwrap();
        assert!(matches!(outcome, Some(Outcome::Completed { .. })));
        assert_eq!(h.published_statuses(&job), vec!["PROCESSING", "DONE"]);

        let stored = h.store.find(job.id).unwrap().unwrap();
        assert_eq!(stored.status, ExportStatus::Done);
        assert_eq!(stored.file_ref, Some(format!("{}.csv", job.id)));
    }

    #[test]
    fn builder_failure_schedules_retry() {
        let h = harness(StubCsv { fail: true, ..Default::default() });
        let job = h.authorised_job("messages");

        assert_eq!(
            h.handle(&job),
            Outcome::Retrying { attempt: 1, delay: Duration::from_millis(2000) }
        );
        assert_eq!(h.status(&job), ExportStatus::Failed);
        assert_eq!(h.processor.ledger().attempts(job.id).unwrap(), 1);
        assert_eq!(h.transport.get(FAILED_COUNTER).unwrap(), Some(1));
        assert_eq!(h.scheduler.delays(), vec![Duration::from_millis(2000)]);
        assert_eq!(h.published_statuses(&job), vec!["PROCESSING", "FAILED"]);
        assert_eq!(h.gauge(), 0);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let h = harness(StubCsv { fail: true, ..Default::default() });
        let job = h.authorised_job("contacts");

        for _ in 0..3 {
            assert!(matches!(h.handle(&job), Outcome::Retrying { .. }));
        }
        assert_eq!(h.handle(&job), Outcome::GaveUp { attempts: 4 });
        assert_eq!(h.processor.ledger().attempts(job.id).unwrap(), 0);

        let failed = h.audit.with_action("export.failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].after_json,
            Some(serde_json::json!({ "reason": "retries_exhausted", "attempts": 4 }))
        );
    }

    #[test]
    fn success_after_failure_clears_retry_state() {
        let failing = harness(StubCsv { fail: true, ..Default::default() });
        let job = failing.authorised_job("contacts");
        failing.handle(&job);
        assert_eq!(failing.processor.ledger().attempts(job.id).unwrap(), 1);

        // Same store, transport and grants; a builder that now works.
        let deps = ProcessorDeps {
            store: failing.store.clone(),
            permissions: failing.permissions.clone(),
            audit: failing.audit.clone(),
            csv: Arc::new(StubCsv::default()),
            transport: failing.transport.clone(),
            bus: failing.transport.clone(),
        };
        let settings = ProcessorSettings {
            exports_dir: failing.dir.path().to_path_buf(),
            ..Default::default()
        };
        let processor = ExportJobProcessor::with_scheduler(deps, settings, failing.scheduler.clone());

        let outcome = processor.handle_message(&QueueMessage::new(job.id).to_json());
        assert!(matches!(outcome, Outcome::Completed { .. }));
        assert_eq!(processor.ledger().attempts(job.id).unwrap(), 0);
    }

    #[test]
    fn malformed_and_unknown_messages_dropped() {
        let h = harness(StubCsv::default());

        assert_eq!(
            h.processor.handle_message("{not json"),
            Outcome::Dropped(DropReason::MalformedPayload)
        );
        assert_eq!(
            h.processor.handle_message(r#"{"exportId":"not-a-uuid"}"#),
            Outcome::Dropped(DropReason::MalformedPayload)
        );
        assert_eq!(
            h.processor.handle_message(&QueueMessage::new(ExportId::new()).to_json()),
            Outcome::Dropped(DropReason::UnknownExport)
        );
        assert!(h.transport.published().is_empty());
        assert_eq!(h.gauge(), 0);
    }

    #[test]
    fn tick_consumes_one_message() {
        let h = harness(StubCsv::default());
        let job = h.authorised_job("contacts");
        h.transport
            .push("q:exports", &QueueMessage::new(job.id).to_json())
            .unwrap();

        let outcome = h.processor.tick(Duration::from_millis(50)).unwrap();
        assert!(matches!(outcome, Some(Outcome::Completed { .. })));
        assert_eq!(h.processor.tick(Duration::from_millis(10)).unwrap(), None);
    }
}
