//! Daemon configuration. Everything comes from environment variables so
//! the daemon can run under a session manager without a config file.

use std::path::PathBuf;

use chrono::Duration;
use rollcall_core::enroll::DEFAULT_SAMPLE_TARGET;
use rollcall_core::matcher::DEFAULT_TOLERANCE;
use rollcall_core::tracker::DEFAULT_DEBOUNCE_SECS;
use rollcall_store::default_data_dir;

/// Runtime configuration for rollcalld.
pub struct Config {
    /// Path to the attendance CSV ledger.
    pub ledger_path: PathBuf,
    /// Path to the enrollment roster.
    pub roster_path: PathBuf,
    /// Seconds a face must dwell before its emotion lookup and log write fire.
    pub debounce_secs: f32,
    /// Euclidean distance below which an embedding matches a reference.
    pub match_tolerance: f32,
    /// Embedding samples collected per enrollment.
    pub enroll_samples: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables,
    /// falling back to defaults under the XDG data directory.
    pub fn from_env() -> Self {
        let data_dir = default_data_dir();

        let ledger_path = std::env::var("ROLLCALL_LEDGER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.csv"));

        let roster_path = std::env::var("ROLLCALL_ROSTER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("roster.json"));

        Self {
            ledger_path,
            roster_path,
            debounce_secs: env_f32("ROLLCALL_DEBOUNCE_SECS", DEFAULT_DEBOUNCE_SECS as f32),
            match_tolerance: env_f32("ROLLCALL_MATCH_TOLERANCE", DEFAULT_TOLERANCE),
            enroll_samples: env_usize("ROLLCALL_ENROLL_SAMPLES", DEFAULT_SAMPLE_TARGET),
        }
    }

    /// Dwell threshold as a duration, rounded to whole milliseconds.
    pub fn debounce(&self) -> Duration {
        Duration::milliseconds((self.debounce_secs * 1000.0).round() as i64)
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
