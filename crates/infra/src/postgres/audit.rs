use tracing::warn;

use super::PgContext;
use crate::audit::{AuditEntry, AuditLog};

/// Writes audit rows on the runtime without waiting for them.
pub struct PgAuditLog {
    ctx: PgContext,
}

impl PgAuditLog {
    pub fn new(ctx: PgContext) -> Self {
        Self { ctx }
    }
}

impl AuditLog for PgAuditLog {
    fn log(&self, entry: AuditEntry) {
        let pool = self.ctx.pool.clone();
        self.ctx.handle.spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_logs (workspace_id, action, entity_type, entity_id, before_json, after_json)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(entry.workspace_id.as_uuid())
            .bind(&entry.action)
            .bind(&entry.entity_type)
            .bind(&entry.entity_id)
            .bind(&entry.before_json)
            .bind(&entry.after_json)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                warn!(action = %entry.action, entity_id = %entry.entity_id, error = %e, "audit write failed");
            }
        });
    }
}
