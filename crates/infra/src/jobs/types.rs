//! Export job types, queue payloads and status events.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wacrm_core::{DomainError, ExportId, UserId, WorkspaceId};

/// Lifecycle status of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExportStatus {
    /// Created by a handler, waiting in the queue.
    Pending,
    /// Picked up by a processor.
    Processing,
    /// Output written; `file_ref` is set.
    Done,
    /// Failed. Re-enterable while retries remain.
    Failed,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Pending => "PENDING",
            ExportStatus::Processing => "PROCESSING",
            ExportStatus::Done => "DONE",
            ExportStatus::Failed => "FAILED",
        }
    }
}

impl core::fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "DONE" => Ok(Self::Done),
            "FAILED" => Ok(Self::Failed),
            other => Err(DomainError::validation(format!("unknown export status: {other}"))),
        }
    }
}

/// Supported export kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportType {
    Contacts,
    Messages,
}

impl ExportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportType::Contacts => "contacts",
            ExportType::Messages => "messages",
        }
    }
}

impl FromStr for ExportType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contacts" => Ok(Self::Contacts),
            "messages" => Ok(Self::Messages),
            other => Err(DomainError::validation(format!("unsupported export type: {other}"))),
        }
    }
}

/// Persisted export job.
///
/// `export_type` keeps the raw stored value; it is only parsed into an
/// [`ExportType`] by the processor, so an unsupported value still loads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: ExportId,
    pub workspace_id: WorkspaceId,
    pub created_by: Option<UserId>,
    #[serde(rename = "type")]
    pub export_type: String,
    pub format: String,
    pub params: serde_json::Value,
    pub status: ExportStatus,
    pub file_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExportJob {
    /// A fresh PENDING CSV job.
    pub fn new(
        workspace_id: WorkspaceId,
        created_by: Option<UserId>,
        export_type: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ExportId::new(),
            workspace_id,
            created_by,
            export_type: export_type.into(),
            format: "csv".to_string(),
            params,
            status: ExportStatus::Pending,
            file_ref: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Queue payload. Only the identity travels; the job record is reloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub export_id: ExportId,
}

impl QueueMessage {
    pub fn new(export_id: ExportId) -> Self {
        Self { export_id }
    }

    /// `None` for anything unparseable or lacking a valid `exportId`.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({ "exportId": self.export_id }).to_string()
    }
}

pub const STATUS_EVENT_TYPE: &str = "export.status";

/// Broadcast notification of a status change. Published, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub export_id: ExportId,
    pub workspace_id: Option<WorkspaceId>,
    pub status: ExportStatus,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(export_id: ExportId, workspace_id: Option<WorkspaceId>, status: ExportStatus) -> Self {
        Self {
            event_type: STATUS_EVENT_TYPE.to_string(),
            export_id,
            workspace_id,
            status,
            timestamp: Utc::now(),
        }
    }

    /// `ev:ws:<workspaceId>`, or `ev:global` when the workspace is unknown.
    pub fn channel(&self) -> String {
        match self.workspace_id {
            Some(ws) => workspace_channel(ws),
            None => GLOBAL_CHANNEL.to_string(),
        }
    }
}

pub const GLOBAL_CHANNEL: &str = "ev:global";

pub fn workspace_channel(workspace_id: WorkspaceId) -> String {
    format!("ev:ws:{}", workspace_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_message_parsing() {
        let id = ExportId::new();
        let raw = QueueMessage::new(id).to_json();
        assert_eq!(QueueMessage::parse(&raw), Some(QueueMessage::new(id)));

        assert_eq!(QueueMessage::parse("not json"), None);
        assert_eq!(QueueMessage::parse("{}"), None);
        assert_eq!(QueueMessage::parse(r#"{"exportId":"nope"}"#), None);
        assert_eq!(QueueMessage::parse(r#"{"id":"x"}"#), None);
    }

    #[test]
    fn status_event_wire_shape() {
        let ws = WorkspaceId::new();
        let event = StatusEvent::new(ExportId::new(), Some(ws), ExportStatus::Processing);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "export.status");
        assert_eq!(json["status"], "PROCESSING");
        assert_eq!(json["workspaceId"], ws.to_string());
        assert!(json["exportId"].is_string());
        assert!(json["timestamp"].is_string());
        assert_eq!(event.channel(), format!("ev:ws:{ws}"));
    }

    #[test]
    fn unknown_workspace_goes_global() {
        let event = StatusEvent::new(ExportId::new(), None, ExportStatus::Failed);
        assert_eq!(event.channel(), "ev:global");
    }

    #[test]
    fn export_type_parsing() {
        assert_eq!("contacts".parse::<ExportType>().unwrap(), ExportType::Contacts);
        assert_eq!("messages".parse::<ExportType>().unwrap(), ExportType::Messages);
        assert!("campaigns".parse::<ExportType>().is_err());
        assert_eq!("DONE".parse::<ExportStatus>().unwrap(), ExportStatus::Done);
    }
}
