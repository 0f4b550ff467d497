//! Export jobs: records, queue processing and retry accounting.
//!
//! ## Flow
//!
//! - An API handler creates a PENDING [`ExportJob`] and pushes
//!   `{"exportId": ...}` onto the export queue ([`enqueue_export`])
//! - [`ExportJobProcessor`] pops messages, re-checks the creator's
//!   permissions and writes the CSV
//! - Transient failures go through [`RetryLedger`], which requeues with
//!   exponential backoff until the attempt budget runs out
//!
//! Status changes are published as [`StatusEvent`]s on the workspace channel.

pub mod enqueue;
pub mod processor;
pub mod retry;
pub mod store;
pub mod types;

pub use enqueue::{enqueue_export, EnqueueError, NewExport};
pub use processor::{
    DropReason, ExportJobProcessor, Outcome, ProcessError, ProcessorDeps, ProcessorSettings,
    RejectReason, FAILED_COUNTER, INFLIGHT_GAUGE,
};
pub use retry::{RequeueScheduler, RetryDecision, RetryError, RetryLedger, RetryPolicy, ThreadScheduler};
pub use store::{ExportJobStore, InMemoryExportJobStore, StoreError};
pub use types::{ExportJob, ExportStatus, ExportType, QueueMessage, StatusEvent};
