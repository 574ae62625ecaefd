//! Durable state for the attendance system.
//!
//! Two files back the whole system: the append-only CSV attendance
//! ledger and the JSON enrollment roster. Both live here; nothing in
//! the tracking core touches the filesystem.

use std::path::PathBuf;

pub mod ledger;
pub mod roster;

pub use ledger::{
    AttendanceLedger, LedgerError, LedgerRecord, LedgerSummary, RecordFilter, TIMESTAMP_FORMAT,
};
pub use roster::{Enrollment, Roster, RosterError};

/// Default directory for rollcall data files, honoring `XDG_DATA_HOME`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
