use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wacrm_infra::jobs::{ExportJob, ExportStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateExportRequest {
    #[serde(rename = "type")]
    pub export_type: String,
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

/// Body of `POST /v1/contacts/export`; the type is implied.
#[derive(Debug, Default, Deserialize)]
pub struct ContactsExportRequest {
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListExportsQuery {
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportView {
    pub id: String,
    #[serde(rename = "type")]
    pub export_type: String,
    pub format: String,
    pub status: ExportStatus,
    pub params: serde_json::Value,
    pub file_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl ExportView {
    pub fn from_job(job: ExportJob, download_url: Option<String>) -> Self {
        Self {
            id: job.id.to_string(),
            export_type: job.export_type,
            format: job.format,
            status: job.status,
            params: job.params,
            file_ref: job.file_ref,
            created_at: job.created_at,
            updated_at: job.updated_at,
            download_url,
        }
    }
}
