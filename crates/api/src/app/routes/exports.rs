//! Report export endpoints.
//!
//! Creation only records a PENDING job and queues it; the worker does the
//! rest. Finished exports are fetched through signed download links so a
//! browser can follow them without a bearer header.

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use wacrm_core::{ExportId, WorkspaceId};
use wacrm_infra::audit::AuditEntry;
use wacrm_infra::exports::ExportError;
use wacrm_infra::jobs::{enqueue_export, ExportJob, ExportStatus, NewExport};

use crate::app::dto::{ContactsExportRequest, CreateExportRequest, ExportView, ListExportsQuery};
use crate::app::errors::{enqueue_error_response, json_error, store_error_response};
use crate::app::{run_blocking, AppServices};
use crate::context::{download_token, require_auth, Access, AuthContext, RequestContext};

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

pub async fn create_export(
    Extension(services): Extension<AppServices>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CreateExportRequest>,
) -> Result<Response, Response> {
    let auth = require_auth(&ctx)?;
    enqueue(services, auth, body.export_type, body.params).await
}

/// `POST /v1/contacts/export`: shorthand for a contacts export. The body is
/// optional.
pub async fn create_contacts_export(
    Extension(services): Extension<AppServices>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Result<Response, Response> {
    let auth = require_auth(&ctx)?;
    let body: ContactsExportRequest = if body.is_empty() {
        ContactsExportRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| json_error(StatusCode::BAD_REQUEST, "invalid_body", e.to_string()))?
    };
    enqueue(services, auth, "contacts".to_string(), body.params).await
}

async fn enqueue(
    services: AppServices,
    auth: AuthContext,
    export_type: String,
    params: Option<Value>,
) -> Result<Response, Response> {
    let request = NewExport {
        workspace_id: auth.workspace_id,
        created_by: Some(auth.user_id),
        export_type,
        params: params.unwrap_or_else(|| json!({})),
    };

    let svc = services.clone();
    let job = run_blocking(move || {
        enqueue_export(svc.store.as_ref(), svc.transport.as_ref(), &svc.queue, request)
    })
    .await?
    .map_err(enqueue_error_response)?;

    services.audit.log(
        AuditEntry::new(job.workspace_id, "export.requested", "export", job.id)
            .with_after(json!({ "type": job.export_type, "params": job.params })),
    );
    info!(export_id = %job.id, user_id = %auth.user_id, "export requested");

    Ok((StatusCode::ACCEPTED, Json(ExportView::from_job(job, None))).into_response())
}

pub async fn list_exports(
    Extension(services): Extension<AppServices>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ListExportsQuery>,
) -> Result<Response, Response> {
    let auth = require_auth(&ctx)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    let store = services.store.clone();
    let jobs = run_blocking(move || store.list_for_workspace(auth.workspace_id, limit))
        .await?
        .map_err(store_error_response)?;

    let views: Vec<ExportView> = jobs
        .into_iter()
        .map(|job| {
            let url = download_url(&services, &job);
            ExportView::from_job(job, url)
        })
        .collect();

    Ok(Json(json!({ "items": views })).into_response())
}

pub async fn get_export(
    Extension(services): Extension<AppServices>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, Response> {
    let auth = require_auth(&ctx)?;
    let export_id = parse_id(&id)?;

    let job = load_scoped(&services, export_id, auth.workspace_id).await?;
    let url = download_url(&services, &job);
    Ok(Json(ExportView::from_job(job, url)).into_response())
}

/// Serve a finished CSV.
///
/// Anonymous callers get here only with a link token (the gate checks
/// presence); the token is verified against this export before anything is
/// read.
pub async fn download_export(
    Extension(services): Extension<AppServices>,
    Extension(ctx): Extension<RequestContext>,
    Extension(access): Extension<Access>,
    Path(id): Path<String>,
    uri: Uri,
) -> Result<Response, Response> {
    let export_id = parse_id(&id)?;

    let workspace_id = match access {
        Access::DownloadToken => {
            let token = download_token(&uri).ok_or_else(invalid_link)?;
            let claims = services
                .download_tokens
                .verify(&token, export_id, Utc::now())
                .map_err(|e| {
                    debug!(export_id = %export_id, error = %e, "download link rejected");
                    invalid_link()
                })?;
            claims.workspace_id
        }
        Access::Public | Access::Granted(_) => require_auth(&ctx)?.workspace_id,
    };

    let job = load_scoped(&services, export_id, workspace_id).await?;
    let file_ref = match (job.status, job.file_ref) {
        (ExportStatus::Done, Some(file_ref)) => file_ref,
        (status, _) => {
            return Err(json_error(
                StatusCode::CONFLICT,
                "not_ready",
                format!("export is {status}"),
            ));
        }
    };

    let files = services.files.clone();
    let name = file_ref.clone();
    let contents = run_blocking(move || files.read(&name)).await?.map_err(|e| {
        warn!(export_id = %export_id, error = %e, "export file unreadable");
        match e {
            ExportError::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                json_error(StatusCode::NOT_FOUND, "file_missing", "export file not found")
            }
            _ => json_error(StatusCode::INTERNAL_SERVER_ERROR, "io_error", "export file unreadable"),
        }
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_ref}\""),
            ),
        ],
        contents,
    )
        .into_response())
}

fn invalid_link() -> Response {
    json_error(
        StatusCode::UNAUTHORIZED,
        "invalid_token",
        "Invalid or expired download link",
    )
}

fn not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "export not found")
}

fn parse_id(raw: &str) -> Result<ExportId, Response> {
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid export id"))
}

/// Load a job, hiding other workspaces' jobs as not found.
async fn load_scoped(
    services: &AppServices,
    export_id: ExportId,
    workspace_id: WorkspaceId,
) -> Result<ExportJob, Response> {
    let store = services.store.clone();
    let found = run_blocking(move || store.find(export_id))
        .await?
        .map_err(store_error_response)?;

    match found {
        Some(job) if job.workspace_id == workspace_id => Ok(job),
        _ => Err(not_found()),
    }
}

fn download_url(services: &AppServices, job: &ExportJob) -> Option<String> {
    if job.status != ExportStatus::Done {
        return None;
    }

    match services
        .download_tokens
        .issue(job.id, job.workspace_id, Utc::now())
    {
        Ok(token) => Some(format!("/v1/reports/exports/{}/download?token={token}", job.id)),
        Err(e) => {
            warn!(export_id = %job.id, error = %e, "download link not issued");
            None
        }
    }
}
