use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use wacrm_core::{ExportId, UserId, WorkspaceId};

use super::PgContext;
use crate::jobs::store::{ExportJobStore, StoreError};
use crate::jobs::types::{ExportJob, ExportStatus};

const COLUMNS: &str =
    "id, workspace_id, created_by, type, format, params, status, file_ref, created_at, updated_at";

pub struct PgExportJobStore {
    ctx: PgContext,
}

impl PgExportJobStore {
    pub fn new(ctx: PgContext) -> Self {
        Self { ctx }
    }
}

fn storage(e: sqlx::Error) -> StoreError {
    StoreError::Storage(e.to_string())
}

fn job_from_row(row: &PgRow) -> Result<ExportJob, StoreError> {
    let status: String = row.try_get("status").map_err(storage)?;
    let created_by: Option<Uuid> = row.try_get("created_by").map_err(storage)?;

    Ok(ExportJob {
        id: ExportId::from_uuid(row.try_get("id").map_err(storage)?),
        workspace_id: WorkspaceId::from_uuid(row.try_get("workspace_id").map_err(storage)?),
        created_by: created_by.map(UserId::from_uuid),
        export_type: row.try_get("type").map_err(storage)?,
        format: row.try_get("format").map_err(storage)?,
        params: row.try_get("params").map_err(storage)?,
        status: status
            .parse()
            .map_err(|e: wacrm_core::DomainError| StoreError::Storage(e.to_string()))?,
        file_ref: row.try_get("file_ref").map_err(storage)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(storage)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(storage)?,
    })
}

impl ExportJobStore for PgExportJobStore {
    fn create(&self, job: ExportJob) -> Result<ExportJob, StoreError> {
        let result = self.ctx.block_on(
            sqlx::query(
                r#"
                INSERT INTO export_jobs
                    (id, workspace_id, created_by, type, format, params, status, file_ref, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(job.id.as_uuid())
            .bind(job.workspace_id.as_uuid())
            .bind(job.created_by.map(|u| *u.as_uuid()))
            .bind(&job.export_type)
            .bind(&job.format)
            .bind(&job.params)
            .bind(job.status.as_str())
            .bind(&job.file_ref)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&self.ctx.pool),
        );

        match result {
            Ok(r) if r.rows_affected() == 0 => Err(StoreError::AlreadyExists(job.id)),
            Ok(_) => Ok(job),
            Err(e) => Err(storage(e)),
        }
    }

    fn find(&self, id: ExportId) -> Result<Option<ExportJob>, StoreError> {
        let sql = format!("SELECT {COLUMNS} FROM export_jobs WHERE id = $1");
        let row = self
            .ctx
            .block_on(sqlx::query(&sql).bind(id.as_uuid()).fetch_optional(&self.ctx.pool))
            .map_err(storage)?;

        row.as_ref().map(job_from_row).transpose()
    }

    fn update_status(
        &self,
        id: ExportId,
        status: ExportStatus,
        file_ref: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = self
            .ctx
            .block_on(
                sqlx::query(
                    r#"
                    UPDATE export_jobs
                    SET status = $2, file_ref = COALESCE($3, file_ref), updated_at = now()
                    WHERE id = $1
                    "#,
                )
                .bind(id.as_uuid())
                .bind(status.as_str())
                .bind(file_ref)
                .execute(&self.ctx.pool),
            )
            .map_err(storage)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn list_for_workspace(
        &self,
        workspace_id: WorkspaceId,
        limit: usize,
    ) -> Result<Vec<ExportJob>, StoreError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM export_jobs WHERE workspace_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let rows = self
            .ctx
            .block_on(
                sqlx::query(&sql)
                    .bind(workspace_id.as_uuid())
                    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                    .fetch_all(&self.ctx.pool),
            )
            .map_err(storage)?;

        rows.iter().map(job_from_row).collect()
    }
}
