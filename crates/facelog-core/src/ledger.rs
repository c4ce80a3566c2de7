//! Per-day attendance CSV: `user_id,name,timestamp`, one row per person per day.

use crate::store::{write_atomic, StoreError};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const HEADER: [&str; 3] = ["user_id", "name", "timestamp"];
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub user_id: u32,
    pub name: String,
    pub timestamp: String,
}

/// Create `path` with only the header row if it does not exist yet.
pub fn init_attendance_csv(path: &Path) -> Result<(), LedgerError> {
    if path.exists() {
        return Ok(());
    }
    let bytes = encode(&[])?;
    write_atomic(path, &bytes)?;
    tracing::info!(path = %path.display(), "attendance file created");
    Ok(())
}

/// Append a row for `(user_id, name)` unless one is already present.
///
/// Returns `true` if a row was written. The file is read fully and rewritten
/// through an atomic rename; there is no cross-process lock, so two writers
/// racing on the same day-file can still lose an update.
pub fn mark_attendance(path: &Path, user_id: u32, name: &str) -> Result<bool, LedgerError> {
    init_attendance_csv(path)?;

    let mut rows = read_rows(path)?;
    let id = user_id.to_string();
    let already = rows
        .iter()
        .any(|row| row.get(0) == Some(id.as_str()) && row.get(1) == Some(name));
    if already {
        tracing::debug!(user_id, name, "attendance already marked today");
        return Ok(false);
    }

    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
    rows.push(csv::StringRecord::from(vec![id.as_str(), name, timestamp.as_str()]));
    write_atomic(path, &encode(&rows)?)?;

    tracing::info!(user_id, name, %timestamp, path = %path.display(), "attendance marked");
    Ok(true)
}

/// All records in a day-file. A missing file has no records.
pub fn read_attendance(path: &Path) -> Result<Vec<AttendanceRecord>, LedgerError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader.deserialize().collect::<Result<Vec<AttendanceRecord>, _>>()?;
    Ok(records)
}

fn read_rows(path: &Path) -> Result<Vec<csv::StringRecord>, LedgerError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let rows = reader.records().collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn encode(rows: &[csv::StringRecord]) -> Result<Vec<u8>, LedgerError> {
    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(HEADER)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| LedgerError::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day_file() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance").join("attendance_2024-03-09.csv");
        (dir, path)
    }

    #[test]
    fn test_init_writes_header() {
        let (_tmp, path) = day_file();
        init_attendance_csv(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "user_id,name,timestamp\n");
    }

    #[test]
    fn test_init_existing_is_noop() {
        let (_tmp, path) = day_file();
        init_attendance_csv(&path).unwrap();
        mark_attendance(&path, 7, "Ana").unwrap();
        let before = std::fs::read_to_string(&path).unwrap();
        init_attendance_csv(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_mark_is_idempotent() {
        let (_tmp, path) = day_file();
        assert!(mark_attendance(&path, 7, "Ana").unwrap());
        assert!(!mark_attendance(&path, 7, "Ana").unwrap());
        let records = read_attendance(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user_id, 7);
        assert_eq!(records[0].name, "Ana");
    }

    #[test]
    fn test_same_id_different_name_is_distinct() {
        let (_tmp, path) = day_file();
        assert!(mark_attendance(&path, 7, "Ana").unwrap());
        assert!(mark_attendance(&path, 7, "Anna").unwrap());
        assert_eq!(read_attendance(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_timestamp_format() {
        let (_tmp, path) = day_file();
        mark_attendance(&path, 1, "Bo").unwrap();
        let ts = &read_attendance(&path).unwrap()[0].timestamp;
        assert!(
            chrono::NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).is_ok(),
            "unexpected timestamp {ts}"
        );
    }

    #[test]
    fn test_name_with_comma_is_quoted() {
        let (_tmp, path) = day_file();
        mark_attendance(&path, 3, "Doe, Jane").unwrap();
        assert!(!mark_attendance(&path, 3, "Doe, Jane").unwrap());
        assert_eq!(read_attendance(&path).unwrap()[0].name, "Doe, Jane");
    }

    #[test]
    fn test_read_missing_file_is_empty() {
        let (_tmp, path) = day_file();
        assert!(read_attendance(&path).unwrap().is_empty());
    }
}
