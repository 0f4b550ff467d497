//! CSV builders reading workspace data.
//!
//! Params (all optional strings): contacts take `tag`; messages take
//! `since` / `until` as RFC 3339 timestamps.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use wacrm_core::WorkspaceId;

use super::PgContext;
use crate::exports::{str_param, CsvBuilder, CsvWriter, ExportError, CONTACTS_HEADER, MESSAGES_HEADER};

pub struct PgCsvBuilder {
    ctx: PgContext,
}

impl PgCsvBuilder {
    pub fn new(ctx: PgContext) -> Self {
        Self { ctx }
    }
}

fn builder(e: sqlx::Error) -> ExportError {
    ExportError::Builder(e.to_string())
}

fn timestamp_param(params: &Value, key: &str) -> Result<Option<DateTime<Utc>>, ExportError> {
    str_param(params, key)?
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| ExportError::InvalidParams(format!("{key}: {e}")))
        })
        .transpose()
}

fn text(row: &PgRow, column: &str) -> Result<String, ExportError> {
    let value: Option<String> = row.try_get(column).map_err(builder)?;
    Ok(value.unwrap_or_default())
}

fn id(row: &PgRow, column: &str) -> Result<String, ExportError> {
    Ok(row.try_get::<Uuid, _>(column).map_err(builder)?.to_string())
}

fn created_at(row: &PgRow) -> Result<String, ExportError> {
    Ok(row
        .try_get::<DateTime<Utc>, _>("created_at")
        .map_err(builder)?
        .to_rfc3339())
}

impl CsvBuilder for PgCsvBuilder {
    fn contacts_csv(&self, workspace_id: WorkspaceId, params: &Value) -> Result<String, ExportError> {
        let tag = str_param(params, "tag")?;

        let rows = self
            .ctx
            .block_on(
                sqlx::query(
                    r#"
                    SELECT c.id, c.name, c.phone, c.email, c.created_at,
                           COALESCE(string_agg(t.name, ';' ORDER BY t.name), '') AS tags
                    FROM contacts c
                    LEFT JOIN contact_tags ct ON ct.contact_id = c.id
                    LEFT JOIN tags t ON t.id = ct.tag_id
                    WHERE c.workspace_id = $1
                      AND ($2::text IS NULL OR EXISTS (
                          SELECT 1 FROM contact_tags ct2
                          JOIN tags t2 ON t2.id = ct2.tag_id
                          WHERE ct2.contact_id = c.id AND t2.name = $2
                      ))
                    GROUP BY c.id
                    ORDER BY c.created_at, c.id
                    "#,
                )
                .bind(workspace_id.as_uuid())
                .bind(tag)
                .fetch_all(&self.ctx.pool),
            )
            .map_err(builder)?;

        let mut csv = CsvWriter::with_header(CONTACTS_HEADER);
        for row in &rows {
            csv.row([
                id(row, "id")?,
                text(row, "name")?,
                text(row, "phone")?,
                text(row, "email")?,
                text(row, "tags")?,
                created_at(row)?,
            ]);
        }
        Ok(csv.finish())
    }

    fn messages_csv(&self, workspace_id: WorkspaceId, params: &Value) -> Result<String, ExportError> {
        let since = timestamp_param(params, "since")?;
        let until = timestamp_param(params, "until")?;

        let rows = self
            .ctx
            .block_on(
                sqlx::query(
                    r#"
                    SELECT id, contact_id, direction, body, status, created_at
                    FROM messages
                    WHERE workspace_id = $1
                      AND ($2::timestamptz IS NULL OR created_at >= $2)
                      AND ($3::timestamptz IS NULL OR created_at < $3)
                    ORDER BY created_at, id
                    "#,
                )
                .bind(workspace_id.as_uuid())
                .bind(since)
                .bind(until)
                .fetch_all(&self.ctx.pool),
            )
            .map_err(builder)?;

        let mut csv = CsvWriter::with_header(MESSAGES_HEADER);
        for row in &rows {
            csv.row([
                id(row, "id")?,
                id(row, "contact_id")?,
                text(row, "direction")?,
                text(row, "body")?,
                text(row, "status")?,
                created_at(row)?,
            ]);
        }
        Ok(csv.finish())
    }
}
