use sqlx::Row;

use wacrm_auth::{LookupError, PermissionCode, PermissionLookup, PermissionSet};
use wacrm_core::{UserId, WorkspaceId};

use super::PgContext;

/// Live role-to-permission lookup. Every call hits the database.
pub struct PgPermissionLookup {
    ctx: PgContext,
}

impl PgPermissionLookup {
    pub fn new(ctx: PgContext) -> Self {
        Self { ctx }
    }
}

impl PermissionLookup for PgPermissionLookup {
    fn permission_codes(
        &self,
        user_id: UserId,
        workspace_id: WorkspaceId,
    ) -> Result<PermissionSet, LookupError> {
        let rows = self
            .ctx
            .block_on(
                sqlx::query(
                    r#"
                    SELECT DISTINCT p.code
                    FROM workspace_members m
                    JOIN role_permissions rp ON rp.role_id = m.role_id
                    JOIN permissions p ON p.id = rp.permission_id
                    WHERE m.user_id = $1 AND m.workspace_id = $2
                    "#,
                )
                .bind(user_id.as_uuid())
                .bind(workspace_id.as_uuid())
                .fetch_all(&self.ctx.pool),
            )
            .map_err(|e| LookupError::Backend(e.to_string()))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("code")
                    .map(PermissionCode::new)
                    .map_err(|e| LookupError::Backend(e.to_string()))
            })
            .collect()
    }
}
