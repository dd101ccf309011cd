//! Attendance ledger: append-only CSV of `name,YYYY-MM-DD,HH:MM:SS` rows.
//!
//! At most one row exists per (name, date). The dedup check always scans the
//! whole persisted file, so it holds across sessions and restarts. Names are
//! quoted when they contain a delimiter.

use crate::types::UNKNOWN;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger io ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger csv ({path}): {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl AttendanceRecord {
    pub fn at(name: &str, now: NaiveDateTime) -> Self {
        Self {
            name: name.to_string(),
            date: now.date(),
            // Ledger resolution is whole seconds.
            time: NaiveTime::from_num_seconds_from_midnight_opt(now.time().num_seconds_from_midnight(), 0)
                .unwrap_or(now.time()),
        }
    }

    fn fields(&self) -> [String; 3] {
        [
            self.name.clone(),
            self.date.format(DATE_FORMAT).to_string(),
            self.time.format(TIME_FORMAT).to_string(),
        ]
    }

    pub fn from_record(row: &StringRecord) -> Option<Self> {
        let name = row.get(0)?;
        let date = NaiveDate::parse_from_str(row.get(1)?.trim(), DATE_FORMAT).ok()?;
        let time = NaiveTime::parse_from_str(row.get(2)?.trim(), TIME_FORMAT).ok()?;
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            date,
            time,
        })
    }
}

/// Result of an attendance attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    Recorded(AttendanceRecord),
    /// Already present for that name and day.
    Duplicate,
    /// The unknown sentinel is never recorded.
    Rejected,
}

/// File-backed attendance ledger.
///
/// Single writer per process: the attendance loop is the only caller of
/// [`Ledger::mark`].
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw rows in file order. Rows the csv reader cannot decode are skipped.
    fn rows(&self) -> Result<Vec<StringRecord>, LedgerError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);

        let mut rows = Vec::new();
        for row in reader.records() {
            match row {
                Ok(row) => rows.push(row),
                Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => return Err(self.csv_error(e)),
                Err(e) => tracing::debug!(error = %e, "ledger: skipping undecodable row"),
            }
        }
        Ok(rows)
    }

    /// All well-formed records, in file order.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self
            .rows()?
            .iter()
            .filter_map(|row| {
                let record = AttendanceRecord::from_record(row);
                if record.is_none() {
                    tracing::debug!(?row, "ledger: skipping malformed row");
                }
                record
            })
            .collect())
    }

    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.records()?.into_iter().filter(|r| r.date == date).collect())
    }

    /// Whether a row for `(name, date)` exists.
    ///
    /// Only the name and date fields are compared, so a row with a damaged
    /// time column still counts.
    pub fn contains(&self, name: &str, date: NaiveDate) -> Result<bool, LedgerError> {
        let date = date.format(DATE_FORMAT).to_string();
        Ok(self
            .rows()?
            .iter()
            .any(|row| row.get(0) == Some(name) && row.get(1).map(str::trim) == Some(date.as_str())))
    }

    /// Record `name` for the day of `now` unless already present.
    pub fn mark(&self, name: &str, now: NaiveDateTime) -> Result<MarkOutcome, LedgerError> {
        if name == UNKNOWN || name.trim().is_empty() {
            return Ok(MarkOutcome::Rejected);
        }
        if self.contains(name, now.date())? {
            tracing::debug!(name, date = %now.date(), "attendance already recorded");
            return Ok(MarkOutcome::Duplicate);
        }

        let record = AttendanceRecord::at(name, now);
        self.append(&record)?;
        tracing::info!(name, date = %record.date, time = %record.time, "attendance recorded");
        Ok(MarkOutcome::Recorded(record))
    }

    fn append(&self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(file);
        writer.write_record(record.fields()).map_err(|e| self.csv_error(e))?;
        writer.flush().map_err(|e| self.io_error(e))
    }

    /// Delete the ledger file. Missing is fine.
    pub fn remove(&self) -> Result<bool, LedgerError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("attendance.csv"));
        (dir, ledger)
    }

    #[test]
    fn test_duplicate_scenario() {
        let (_dir, ledger) = ledger();
        std::fs::write(ledger.path(), "Alice,2024-01-01,09:00:00\n").unwrap();

        assert_eq!(ledger.mark("Alice", at("2024-01-01T09:05:00")).unwrap(), MarkOutcome::Duplicate);
        assert!(matches!(
            ledger.mark("Alice", at("2024-01-02T09:00:00")).unwrap(),
            MarkOutcome::Recorded(_)
        ));

        let text = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(text, "Alice,2024-01-01,09:00:00\nAlice,2024-01-02,09:00:00\n");
    }

    #[test]
    fn test_same_day_twice_yields_one_record() {
        let (_dir, ledger) = ledger();
        let first = ledger.mark("Bob", at("2024-03-04T08:00:01")).unwrap();
        let second = ledger.mark("Bob", at("2024-03-04T17:59:59")).unwrap();

        assert!(matches!(first, MarkOutcome::Recorded(_)));
        assert_eq!(second, MarkOutcome::Duplicate);
        assert_eq!(ledger.records().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_is_never_recorded() {
        let (_dir, ledger) = ledger();
        assert_eq!(ledger.mark(UNKNOWN, at("2024-03-04T08:00:00")).unwrap(), MarkOutcome::Rejected);
        assert_eq!(ledger.mark(UNKNOWN, at("2024-03-05T08:00:00")).unwrap(), MarkOutcome::Rejected);
        assert!(!ledger.path().exists());
    }

    #[test]
    fn test_dedup_is_per_name() {
        let (_dir, ledger) = ledger();
        let now = at("2024-03-04T08:00:00");
        assert!(matches!(ledger.mark("Alice", now).unwrap(), MarkOutcome::Recorded(_)));
        assert!(matches!(ledger.mark("Alicia", now).unwrap(), MarkOutcome::Recorded(_)));
        assert_eq!(ledger.records_on(now.date()).unwrap().len(), 2);
    }

    #[test]
    fn test_records_skip_malformed_rows() {
        let (_dir, ledger) = ledger();
        std::fs::write(
            ledger.path(),
            "Alice,2024-01-01,09:00:00\nbroken\nBob,2024-13-01,09:00:00\n\nCarol,2024-01-01,10:15:30\n",
        )
        .unwrap();

        let records = ledger.records().unwrap();
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Carol"]);

        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(ledger.records_on(day).unwrap().len(), 2);
        assert!(ledger.records_on(day.succ_opt().unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_damaged_time_still_blocks_duplicate() {
        let (_dir, ledger) = ledger();
        std::fs::write(ledger.path(), "Dana,2024-05-05,??\n").unwrap();
        assert_eq!(ledger.mark("Dana", at("2024-05-05T12:00:00")).unwrap(), MarkOutcome::Duplicate);
    }

    #[test]
    fn test_row_format_drops_subseconds() {
        let (_dir, ledger) = ledger();
        let now = NaiveDateTime::parse_from_str("2024-06-07T01:02:03.987", "%Y-%m-%dT%H:%M:%S%.f").unwrap();
        let MarkOutcome::Recorded(record) = ledger.mark("Eve", now).unwrap() else {
            panic!("expected a new record");
        };
        assert_eq!(std::fs::read_to_string(ledger.path()).unwrap(), "Eve,2024-06-07,01:02:03\n");
        assert_eq!(ledger.records().unwrap(), vec![record]);
    }

    #[test]
    fn test_name_with_comma_is_quoted() {
        let (_dir, ledger) = ledger();
        let first = ledger.mark("Smith, John", at("2024-02-02T08:30:00")).unwrap();
        let second = ledger.mark("Smith, John", at("2024-02-02T16:00:00")).unwrap();
        assert!(matches!(first, MarkOutcome::Recorded(_)));
        assert_eq!(second, MarkOutcome::Duplicate);

        // "Smith" alone is a different person
        assert!(matches!(
            ledger.mark("Smith", at("2024-02-02T09:00:00")).unwrap(),
            MarkOutcome::Recorded(_)
        ));

        let text = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(text, "\"Smith, John\",2024-02-02,08:30:00\nSmith,2024-02-02,09:00:00\n");
        let names: Vec<_> = ledger.records().unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Smith, John", "Smith"]);
    }

    #[test]
    fn test_missing_ledger_is_empty() {
        let (_dir, ledger) = ledger();
        assert!(ledger.records().unwrap().is_empty());
        assert!(!ledger.contains("Alice", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()).unwrap());
        assert!(!ledger.remove().unwrap());
    }
}
