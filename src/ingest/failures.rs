//! Dated CSV log of rows the database refused.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::db::Row;
use crate::schema::TableDef;

/// Appends rejected rows to `{dir}/{table}_failures_{YYYY-MM-DD}.csv`, one
/// line per row with the table's columns plus the error text. The file is
/// created on the first failure only.
pub struct FailureLog {
    path: PathBuf,
    columns: Vec<String>,
    writer: Mutex<Option<csv::Writer<File>>>,
    count: Mutex<usize>,
}

impl FailureLog {
    pub fn new(dir: &Path, table: &TableDef) -> Self {
        let date = Local::now().format("%Y-%m-%d");
        Self {
            path: dir.join(format!("{}_failures_{}.csv", table.name, date)),
            columns: table.column_names().map(String::from).collect(),
            writer: Mutex::new(None),
            count: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows recorded so far.
    pub fn count(&self) -> usize {
        self.count.lock().map(|c| *c).unwrap_or(0)
    }

    pub fn record(&self, row: &Row, error: &str) {
        self.record_all(std::slice::from_ref(row), error);
    }

    /// Write rows to the log. Problems writing the log itself are logged and
    /// otherwise ignored; they must not stop a load.
    pub fn record_all(&self, rows: &[Row], error: &str) {
        if rows.is_empty() {
            return;
        }
        let Ok(mut guard) = self.writer.lock() else {
            tracing::error!("Failure log {:?} is unusable", self.path);
            return;
        };
        if guard.is_none() {
            match self.open() {
                Ok(writer) => *guard = Some(writer),
                Err(e) => {
                    tracing::error!("Cannot open failure log {:?}: {}", self.path, e);
                    return;
                }
            }
        }
        let Some(writer) = guard.as_mut() else { return };

        let mut written = 0;
        for row in rows {
            let mut record: Vec<String> = self
                .columns
                .iter()
                .map(|c| row.get(c).map(|v| v.to_string()).unwrap_or_default())
                .collect();
            record.push(error.to_string());
            match writer.write_record(&record) {
                Ok(()) => written += 1,
                Err(e) => tracing::error!("Cannot write to failure log {:?}: {}", self.path, e),
            }
        }
        if let Err(e) = writer.flush() {
            tracing::error!("Cannot flush failure log {:?}: {}", self.path, e);
        }
        if let Ok(mut count) = self.count.lock() {
            *count += written;
        }
    }

    fn open(&self) -> anyhow::Result<csv::Writer<File>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let fresh = !self.path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        if fresh {
            let mut header = self.columns.clone();
            header.push("error".to_string());
            writer.write_record(&header)?;
        }
        tracing::warn!("Recording rejected rows in {:?}", self.path);
        Ok(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Entity, Schema};

    #[test]
    fn test_writes_header_once_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Schema::live(207);
        let table = schema.table_for(Entity::AnnotationsKegg).unwrap();

        let log = FailureLog::new(dir.path(), table);
        assert!(!log.path().exists());
        let name = log.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("annotations_kegg_r207_failures_"));
        assert!(name.ends_with(".csv"));

        let mut row = Row::new();
        row.insert("annotation_id".into(), 3i64.into());
        row.insert("ko".into(), "K1".into());
        log.record(&row, "UNIQUE constraint failed");
        log.record_all(&[row.clone(), row], "again");
        assert_eq!(log.count(), 3);

        // A second log for the same table and day appends below the header.
        let again = FailureLog::new(dir.path(), table);
        let mut extra = Row::new();
        extra.insert("annotation_id".into(), 4i64.into());
        again.record(&extra, "later");

        let mut reader = csv::Reader::from_path(log.path()).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.get(0), Some("annotation_id"));
        assert_eq!(headers.get(headers.len() - 1), Some("error"));
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 4);
        assert_eq!(&records[0][4], "K1");
        assert_eq!(&records[0][8], "UNIQUE constraint failed");
        assert_eq!(&records[3][0], "4");
    }
}
