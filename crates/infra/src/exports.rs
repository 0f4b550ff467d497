//! CSV export building and output files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use wacrm_core::{ExportId, WorkspaceId};

use crate::jobs::types::ExportType;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid export params: {0}")]
    InvalidParams(String),

    #[error("csv builder failed: {0}")]
    Builder(String),

    #[error("export io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces CSV text for a workspace's data.
pub trait CsvBuilder: Send + Sync {
    fn contacts_csv(&self, workspace_id: WorkspaceId, params: &Value) -> Result<String, ExportError>;

    fn messages_csv(&self, workspace_id: WorkspaceId, params: &Value) -> Result<String, ExportError>;

    fn build(
        &self,
        export_type: ExportType,
        workspace_id: WorkspaceId,
        params: &Value,
    ) -> Result<String, ExportError> {
        match export_type {
            ExportType::Contacts => self.contacts_csv(workspace_id, params),
            ExportType::Messages => self.messages_csv(workspace_id, params),
        }
    }
}

impl<B> CsvBuilder for Arc<B>
where
    B: CsvBuilder + ?Sized,
{
    fn contacts_csv(&self, workspace_id: WorkspaceId, params: &Value) -> Result<String, ExportError> {
        (**self).contacts_csv(workspace_id, params)
    }

    fn messages_csv(&self, workspace_id: WorkspaceId, params: &Value) -> Result<String, ExportError> {
        (**self).messages_csv(workspace_id, params)
    }
}

pub const CONTACTS_HEADER: &[&str] = &["id", "name", "phone", "email", "tags", "created_at"];
pub const MESSAGES_HEADER: &[&str] = &["id", "contact_id", "direction", "body", "status", "created_at"];

/// RFC 4180 writer: fields containing a comma, quote or line break are quoted.
#[derive(Debug, Default)]
pub struct CsvWriter {
    out: String,
}

impl CsvWriter {
    pub fn with_header(header: &[&str]) -> Self {
        let mut w = Self::default();
        w.row(header.iter().copied());
        w
    }

    pub fn row<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (i, field) in fields.into_iter().enumerate() {
            if i > 0 {
                self.out.push(',');
            }
            push_field(&mut self.out, field.as_ref());
        }
        self.out.push_str("\r\n");
    }

    pub fn finish(self) -> String {
        self.out
    }
}

fn push_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

/// Optional string parameter; non-string values are rejected.
pub fn str_param<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>, ExportError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(ExportError::InvalidParams(format!(
            "{key} must be a string, got {other}"
        ))),
    }
}

/// Output directory for finished exports.
#[derive(Debug, Clone)]
pub struct ExportFiles {
    dir: PathBuf,
}

impl ExportFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File reference stored on the job: the bare file name.
    pub fn file_ref(export_id: ExportId) -> String {
        format!("{export_id}.csv")
    }

    /// Resolve a stored file reference. References that could escape the
    /// directory are rejected.
    pub fn path_for(&self, file_ref: &str) -> Option<PathBuf> {
        if file_ref.is_empty()
            || file_ref.contains(['/', '\\'])
            || file_ref == "."
            || file_ref == ".."
        {
            return None;
        }
        Some(self.dir.join(file_ref))
    }

    /// Write `contents` for `export_id`, returning the file reference.
    ///
    /// Goes through a temp file and a rename so readers never see a partial
    /// CSV.
    pub fn write(&self, export_id: ExportId, contents: &str) -> Result<String, ExportError> {
        fs::create_dir_all(&self.dir)?;

        let file_ref = Self::file_ref(export_id);
        let tmp = self.dir.join(format!(".{file_ref}.tmp"));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(contents.as_bytes())?;
            f.sync_all()?;
        }
        fs::rename(&tmp, self.dir.join(&file_ref))?;
        Ok(file_ref)
    }

    pub fn read(&self, file_ref: &str) -> Result<Vec<u8>, ExportError> {
        let path = self.path_for(file_ref).ok_or_else(|| {
            ExportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid file reference: {file_ref}"),
            ))
        })?;
        Ok(fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_quoting() {
        let mut w = CsvWriter::with_header(&["a", "b"]);
        w.row(["plain", "has,comma"]);
        w.row(["say \"hi\"", "two\nlines"]);

        assert_eq!(
            w.finish(),
            "a,b\r\nplain,\"has,comma\"\r\n\"say \"\"hi\"\"\",\"two\nlines\"\r\n"
        );
    }

    #[test]
    fn write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let files = ExportFiles::new(dir.path().join("nested"));
        let id = ExportId::new();

        let file_ref = files.write(id, "id\r\n1\r\n").unwrap();
        assert_eq!(file_ref, format!("{id}.csv"));
        assert_eq!(files.read(&file_ref).unwrap(), b"id\r\n1\r\n");

        let leftovers: Vec<_> = fs::read_dir(files.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn path_traversal_rejected() {
        let files = ExportFiles::new("/tmp/exports");
        assert!(files.path_for("../etc/passwd").is_none());
        assert!(files.path_for("..").is_none());
        assert!(files.path_for("a\\b.csv").is_none());
        assert!(files.path_for("").is_none());
        assert!(files.path_for("ok.csv").is_some());
    }

    #[test]
    fn string_params() {
        let params = serde_json::json!({ "tag": "vip", "since": 5 });
        assert_eq!(str_param(&params, "tag").unwrap(), Some("vip"));
        assert_eq!(str_param(&params, "until").unwrap(), None);
        assert!(str_param(&params, "since").is_err());
    }
}
