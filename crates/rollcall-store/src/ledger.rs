//! Append-only CSV attendance ledger.
//!
//! The on-disk layout is bit-exact with the files this system has
//! always produced: columns `Name,Emotion,Timestamp`, timestamps
//! formatted `%Y-%m-%d %H:%M:%S` in local time, header written once
//! when the file is created, records appended in insertion order.
//! The write path recovers a missing or malformed file by starting
//! fresh with a new header; read paths treat such a file as empty and
//! never modify it. Malformed data rows are skipped on read, never
//! fatal.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveDateTime};
use rollcall_core::{AttendanceRecord, EmotionLabel, Identity};
use serde::Serialize;
use thiserror::Error;

// --- Named constants (schema is fixed for interop with existing files) ---
const HEADER: [&str; 3] = ["Name", "Emotion", "Timestamp"];
/// Timestamp layout shared by the ledger and its exports.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Stock row count for "recent records" views.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("refusing to export over the ledger itself: {0}")]
    ExportOverLedger(PathBuf),
}

/// One ledger row as stored on disk. Timestamps are naive local time,
/// exactly as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub name: Identity,
    pub emotion: EmotionLabel,
    pub timestamp: NaiveDateTime,
}

/// Record selection for reads and exports. Empty filter matches all.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Inclusive start date.
    pub from: Option<NaiveDate>,
    /// Inclusive end date.
    pub to: Option<NaiveDate>,
    /// Case-insensitive substring match on the name.
    pub name: Option<String>,
}

impl RecordFilter {
    pub fn matches(&self, record: &LedgerRecord) -> bool {
        let date = record.timestamp.date();
        if let Some(from) = self.from {
            if date < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if date > to {
                return false;
            }
        }
        if let Some(needle) = &self.name {
            let haystack = record.name.as_str().to_lowercase();
            if !haystack.contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Aggregate view over the whole ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub total_records: usize,
    pub unique_people: usize,
    pub today_count: usize,
    pub most_common_emotion: Option<EmotionLabel>,
}

enum HeaderState {
    Valid,
    Missing,
    Malformed(String),
}

/// Handle to the attendance CSV. Stateless between calls; every
/// operation works against the file so external edits are picked up.
#[derive(Debug, Clone)]
pub struct AttendanceLedger {
    path: PathBuf,
}

impl AttendanceLedger {
    /// Open the ledger, creating the file (and parent directories)
    /// with a fresh header when missing or malformed. This is the
    /// write-side constructor; viewers use [`Self::open_readonly`].
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let ledger = Self { path: path.into() };
        ledger.ensure_header()?;
        Ok(ledger)
    }

    /// Open the ledger for reading only. Nothing is created or
    /// repaired; a missing or malformed file simply reads as empty,
    /// so pointing a viewer at the wrong file cannot damage it.
    pub fn open_readonly(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record in the fixed column layout.
    pub fn append(&self, record: &AttendanceRecord) -> Result<(), LedgerError> {
        // The file may have been deleted since open; re-establish the
        // header invariant before every write.
        self.ensure_header()?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let local = record.logged_at.with_timezone(&Local);
        let timestamp = local.format(TIMESTAMP_FORMAT).to_string();
        writer.write_record([
            record.identity.as_str(),
            record.emotion.as_str(),
            timestamp.as_str(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    /// All parseable records in file order. A file without the
    /// expected header is not an attendance ledger and reads as empty.
    pub fn read_all(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        match self.header_state()? {
            HeaderState::Valid => {}
            HeaderState::Missing => return Ok(Vec::new()),
            HeaderState::Malformed(found) => {
                tracing::warn!(
                    path = %self.path.display(),
                    found,
                    "ledger header is malformed, reading as empty"
                );
                return Ok(Vec::new());
            }
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?;

        let mut records = Vec::new();
        for (idx, row) in reader.records().enumerate() {
            // Header is line 1; the first data row is line 2.
            let line = idx + 2;
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    tracing::warn!(line, error = %err, "skipping unreadable ledger row");
                    continue;
                }
            };
            match parse_row(&row) {
                Some(record) => records.push(record),
                None => tracing::warn!(line, "skipping malformed ledger row"),
            }
        }
        Ok(records)
    }

    /// Records matching `filter`, in file order.
    pub fn read_filtered(&self, filter: &RecordFilter) -> Result<Vec<LedgerRecord>, LedgerError> {
        let mut records = self.read_all()?;
        records.retain(|record| filter.matches(record));
        Ok(records)
    }

    /// Newest records first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Result<Vec<LedgerRecord>, LedgerError> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    /// Aggregate statistics, with "today" evaluated against the given
    /// date so callers control the clock.
    pub fn summarize(&self, today: NaiveDate) -> Result<LedgerSummary, LedgerError> {
        let records = self.read_all()?;

        let unique: BTreeSet<&str> = records.iter().map(|r| r.name.as_str()).collect();
        let today_count = records
            .iter()
            .filter(|r| r.timestamp.date() == today)
            .count();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in &records {
            *counts.entry(record.emotion.as_str()).or_default() += 1;
        }
        // Strict > keeps the alphabetically first label on ties.
        let mut most_common: Option<(&str, usize)> = None;
        for (label, count) in &counts {
            if most_common.map_or(true, |(_, best)| *count > best) {
                most_common = Some((label, *count));
            }
        }

        Ok(LedgerSummary {
            total_records: records.len(),
            unique_people: unique.len(),
            today_count,
            most_common_emotion: most_common.map(|(label, _)| EmotionLabel::from(label)),
        })
    }

    /// Write the records matching `filter` to a new CSV with the same
    /// layout. Returns the number of records written.
    pub fn export(&self, filter: &RecordFilter, dest: &Path) -> Result<usize, LedgerError> {
        if dest == self.path {
            return Err(LedgerError::ExportOverLedger(dest.to_path_buf()));
        }
        // Aliased spellings and symlinks of the ledger path only
        // resolve once both files exist.
        if dest.exists()
            && self.path.exists()
            && fs::canonicalize(dest)? == fs::canonicalize(&self.path)?
        {
            return Err(LedgerError::ExportOverLedger(dest.to_path_buf()));
        }

        let records = self.read_filtered(filter)?;

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut writer = csv::Writer::from_path(dest)?;
        writer.write_record(HEADER)?;
        for record in &records {
            let timestamp = record.timestamp.format(TIMESTAMP_FORMAT).to_string();
            writer.write_record([
                record.name.as_str(),
                record.emotion.as_str(),
                timestamp.as_str(),
            ])?;
        }
        writer.flush()?;

        tracing::info!(
            dest = %dest.display(),
            records = records.len(),
            "exported attendance records"
        );
        Ok(records.len())
    }

    fn ensure_header(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        match self.header_state()? {
            HeaderState::Valid => Ok(()),
            HeaderState::Missing => {
                tracing::info!(path = %self.path.display(), "creating attendance ledger");
                self.write_fresh()
            }
            HeaderState::Malformed(found) => {
                tracing::warn!(
                    path = %self.path.display(),
                    found,
                    "ledger header is malformed, starting fresh"
                );
                self.write_fresh()
            }
        }
    }

    fn header_state(&self) -> Result<HeaderState, LedgerError> {
        if !self.path.exists() {
            return Ok(HeaderState::Missing);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)?;

        match reader.records().next() {
            None => Ok(HeaderState::Missing),
            Some(Ok(first)) if first.iter().eq(HEADER) => Ok(HeaderState::Valid),
            Some(Ok(first)) => Ok(HeaderState::Malformed(first.iter().collect::<Vec<_>>().join(","))),
            Some(Err(err)) => Ok(HeaderState::Malformed(err.to_string())),
        }
    }

    fn write_fresh(&self) -> Result<(), LedgerError> {
        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(())
    }
}

fn parse_row(row: &csv::StringRecord) -> Option<LedgerRecord> {
    let name = row.get(0)?;
    let emotion = row.get(1)?;
    let timestamp = NaiveDateTime::parse_from_str(row.get(2)?, TIMESTAMP_FORMAT).ok()?;
    if name.is_empty() {
        return None;
    }
    Some(LedgerRecord {
        name: Identity::from(name),
        emotion: EmotionLabel::from(emotion),
        timestamp,
    })
}
