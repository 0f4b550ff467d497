//! Audit trail sink.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use wacrm_core::WorkspaceId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub workspace_id: WorkspaceId,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before_json: Option<Value>,
    pub after_json: Option<Value>,
}

impl AuditEntry {
    pub fn new(
        workspace_id: WorkspaceId,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            workspace_id,
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.to_string(),
            before_json: None,
            after_json: None,
        }
    }

    pub fn with_after(mut self, after: Value) -> Self {
        self.after_json = Some(after);
        self
    }
}

/// Fire-and-forget audit sink.
///
/// Callers never see a failure; implementations log their own.
pub trait AuditLog: Send + Sync {
    fn log(&self, entry: AuditEntry);
}

impl<A> AuditLog for Arc<A>
where
    A: AuditLog + ?Sized,
{
    fn log(&self, entry: AuditEntry) {
        (**self).log(entry)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Entries recorded for one action, in order.
    pub fn with_action(&self, action: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditLog for InMemoryAuditLog {
    fn log(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}
