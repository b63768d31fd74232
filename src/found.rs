//! Persistent record of invoices found by past and current searches.
//!
//! The log is a JSON array at a fixed user-home path, rewritten atomically
//! on every appended match so a crash mid-search never loses earlier finds.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const FOUND_INVOICES_FILE: &str = "found_invoices.json";

#[derive(Debug, Error)]
pub enum FoundLogError {
    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Config(String),
}

/// One matched attachment, as shown in the "found" view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoundInvoiceRecord {
    /// The originating message's Date header, RFC 3339, or empty when the
    /// message carried no parseable date.
    pub date: String,
    pub sender: String,
    pub subject: String,
    pub filename: String,
    pub file_path: PathBuf,
    /// When the match was made, ISO-8601.
    pub found_timestamp: String,
}

/// Ordered list of found invoices backed by a JSON file.
#[derive(Debug)]
pub struct FoundInvoiceLog {
    path: PathBuf,
    records: Vec<FoundInvoiceRecord>,
}

impl FoundInvoiceLog {
    pub fn default_path() -> Result<PathBuf, FoundLogError> {
        crate::paths::app_home()
            .map(|home| home.join(FOUND_INVOICES_FILE))
            .ok_or_else(|| FoundLogError::Config("failed to determine home directory".to_string()))
    }

    /// Loads the log, treating a missing, malformed or non-array file as
    /// empty. Corrupt state must never prevent the application from
    /// starting.
    pub fn load(path: &Path) -> Self {
        let records = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Vec<FoundInvoiceRecord>>(&raw) {
                Ok(records) => records,
                Err(error) => {
                    warn!(
                        "found-invoices file {} is not a valid record list ({error}); starting empty",
                        path.display()
                    );
                    Vec::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => {
                warn!(
                    "cannot read found-invoices file {} ({error}); starting empty",
                    path.display()
                );
                Vec::new()
            }
        };

        Self {
            path: path.to_path_buf(),
            records,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[FoundInvoiceRecord] {
        &self.records
    }

    /// Appends a record and persists the whole list immediately. The record
    /// stays in memory even when the save fails.
    pub fn append(&mut self, record: FoundInvoiceRecord) -> Result<(), FoundLogError> {
        self.records.push(record);
        self.save()
    }

    pub fn save(&self) -> Result<(), FoundLogError> {
        crate::paths::write_atomic_json(&self.path, &self.records)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{FoundInvoiceLog, FoundInvoiceRecord};

    fn temp_root() -> PathBuf {
        let root =
            std::env::temp_dir().join(format!("invoscan-found-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root).expect("create temp root");
        root
    }

    fn record(filename: &str) -> FoundInvoiceRecord {
        FoundInvoiceRecord {
            date: "2024-01-15T10:00:00+00:00".to_string(),
            sender: "biuro@example.com".to_string(),
            subject: "Faktura 01/2024".to_string(),
            filename: filename.to_string(),
            file_path: PathBuf::from("/tmp").join(filename),
            found_timestamp: "2024-02-01T12:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn save_is_atomic_and_round_trips() {
        let root = temp_root();
        let path = root.join("found.json");

        let mut log = FoundInvoiceLog::load(&path);
        log.append(record("a.pdf")).expect("append first record");
        log.append(record("b.pdf")).expect("append second record");

        let mut tmp_name = path.clone().into_os_string();
        tmp_name.push(".tmp");
        assert!(
            !PathBuf::from(tmp_name).exists(),
            "no temp sibling may remain after save"
        );

        let reloaded = FoundInvoiceLog::load(&path);
        assert_eq!(reloaded.records(), log.records());

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn non_array_content_loads_as_empty() {
        let root = temp_root();
        let path = root.join("found.json");
        std::fs::write(&path, r#"{"not": "a list"}"#).expect("write bad content");

        let log = FoundInvoiceLog::load(&path);
        assert!(log.records().is_empty());

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn truncated_json_loads_as_empty() {
        let root = temp_root();
        let path = root.join("found.json");
        std::fs::write(&path, r#"[{"date": "2024"#).expect("write truncated content");

        let log = FoundInvoiceLog::load(&path);
        assert!(log.records().is_empty());

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let root = temp_root();
        let log = FoundInvoiceLog::load(&root.join("does-not-exist.json"));
        assert!(log.records().is_empty());
        let _ = std::fs::remove_dir_all(root);
    }
}
