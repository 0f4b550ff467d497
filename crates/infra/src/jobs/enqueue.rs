//! Producer side of the export queue.

use thiserror::Error;
use tracing::info;

use wacrm_core::{DomainError, UserId, WorkspaceId};

use super::store::{ExportJobStore, StoreError};
use super::types::{ExportJob, ExportType, QueueMessage};
use crate::transport::{QueueTransport, TransportError};

#[derive(Debug, Clone)]
pub struct NewExport {
    pub workspace_id: WorkspaceId,
    pub created_by: Option<UserId>,
    pub export_type: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Invalid(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Create a PENDING job and push its ID onto `queue`.
///
/// The insert and the push are not atomic. If the push fails the job stays
/// PENDING and the error is returned.
pub fn enqueue_export(
    store: &dyn ExportJobStore,
    transport: &dyn QueueTransport,
    queue: &str,
    request: NewExport,
) -> Result<ExportJob, EnqueueError> {
    let export_type: ExportType = request.export_type.parse()?;
    if !request.params.is_object() && !request.params.is_null() {
        return Err(DomainError::validation("export params must be an object").into());
    }

    let job = store.create(ExportJob::new(
        request.workspace_id,
        request.created_by,
        export_type.as_str(),
        request.params,
    ))?;
    transport.push(queue, &QueueMessage::new(job.id).to_json())?;

    info!(export_id = %job.id, workspace_id = %job.workspace_id, export_type = export_type.as_str(), "export enqueued");
    Ok(job)
}
