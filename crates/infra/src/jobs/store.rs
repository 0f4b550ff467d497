//! Export job storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use wacrm_core::{ExportId, WorkspaceId};

use super::types::{ExportJob, ExportStatus};

/// Job record store.
///
/// Updates are independent of the queue: there is no transaction tying a
/// status change to a push or pop.
pub trait ExportJobStore: Send + Sync {
    /// Persist a new job.
    fn create(&self, job: ExportJob) -> Result<ExportJob, StoreError>;

    /// Get a job by ID.
    fn find(&self, id: ExportId) -> Result<Option<ExportJob>, StoreError>;

    /// Partial update: status always, `file_ref` only when given.
    fn update_status(
        &self,
        id: ExportId,
        status: ExportStatus,
        file_ref: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Most recent jobs of a workspace first.
    fn list_for_workspace(
        &self,
        workspace_id: WorkspaceId,
        limit: usize,
    ) -> Result<Vec<ExportJob>, StoreError>;
}

impl<S> ExportJobStore for Arc<S>
where
    S: ExportJobStore + ?Sized,
{
    fn create(&self, job: ExportJob) -> Result<ExportJob, StoreError> {
        (**self).create(job)
    }

    fn find(&self, id: ExportId) -> Result<Option<ExportJob>, StoreError> {
        (**self).find(id)
    }

    fn update_status(
        &self,
        id: ExportId,
        status: ExportStatus,
        file_ref: Option<&str>,
    ) -> Result<(), StoreError> {
        (**self).update_status(id, status, file_ref)
    }

    fn list_for_workspace(
        &self,
        workspace_id: WorkspaceId,
        limit: usize,
    ) -> Result<Vec<ExportJob>, StoreError> {
        (**self).list_for_workspace(workspace_id, limit)
    }
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("export job not found: {0}")]
    NotFound(ExportId),
    #[error("export job already exists: {0}")]
    AlreadyExists(ExportId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryExportJobStore {
    jobs: RwLock<HashMap<ExportId, ExportJob>>,
}

impl InMemoryExportJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl ExportJobStore for InMemoryExportJobStore {
    fn create(&self, job: ExportJob) -> Result<ExportJob, StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn find(&self, id: ExportId) -> Result<Option<ExportJob>, StoreError> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    fn update_status(
        &self,
        id: ExportId,
        status: ExportStatus,
        file_ref: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.status = status;
        if let Some(file_ref) = file_ref {
            job.file_ref = Some(file_ref.to_string());
        }
        job.updated_at = Utc::now();
        Ok(())
    }

    fn list_for_workspace(
        &self,
        workspace_id: WorkspaceId,
        limit: usize,
    ) -> Result<Vec<ExportJob>, StoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.workspace_id == workspace_id)
            .cloned()
            .collect();

        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.as_uuid().cmp(a.id.as_uuid())));
        result.truncate(limit);
        Ok(result)
    }
}
