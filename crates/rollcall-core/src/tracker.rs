//! Attendance debounce and dedup state machine.
//!
//! For a stream of per-frame observations the tracker decides when a
//! recognized identity has dwelt long enough to trigger its one
//! emotion lookup per session, and logs attendance exactly once per
//! session when that lookup resolves. Per identity the lifecycle is
//!
//! ```text
//! unseen -> waiting -> lookup pending -> logged
//! ```
//!
//! where `logged` is terminal until the next [`AttendanceTracker::reset`].
//! The tracker never blocks and never performs I/O; classification and
//! persistence happen in the host, driven by the [`Action`]s each call
//! returns.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AttendanceRecord, EmotionLabel, FaceRegion, Identity, ObservationBatch};

// --- Named constants (no magic numbers) ---
/// Default dwell time before an identity becomes eligible for emotion
/// lookup and logging.
pub const DEFAULT_DEBOUNCE_SECS: i64 = 3;
/// Display label shown while an identity is still inside the dwell window.
pub const WAITING_LABEL: &str = "waiting...";

/// Per-identity session state.
///
/// Created on the first sighting of a known identity, discarded by
/// [`AttendanceTracker::reset`], never persisted. Mutated only by the
/// tracker.
#[derive(Debug, Clone)]
pub struct TrackedEntry {
    /// First sighting this session. Immutable once set.
    pub first_seen: DateTime<Utc>,
    /// Whether the one-per-session emotion lookup has been issued.
    pub emotion_requested: bool,
    /// Last resolved emotion, if any.
    pub emotion: Option<EmotionLabel>,
    /// Whether the one-per-session log write has been issued.
    pub logged: bool,
}

impl TrackedEntry {
    fn first_seen_at(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            emotion_requested: false,
            emotion: None,
            logged: false,
        }
    }

    /// Presentation state, derived from the request/resolve flags.
    pub fn display_state(&self) -> DisplayState {
        match &self.emotion {
            Some(label) => DisplayState::Emotion(label.clone()),
            None if self.emotion_requested => DisplayState::Pending,
            None => DisplayState::Waiting,
        }
    }
}

/// What the UI should show next to a tracked identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
    /// Dwell time not yet reached.
    Waiting,
    /// Lookup issued, classifier has not answered yet.
    Pending,
    /// Resolved emotion.
    Emotion(EmotionLabel),
}

impl DisplayState {
    /// UI label. The pending state borrows the classifier sentinel so
    /// displays match what an unresolved lookup would eventually log.
    pub fn label(&self) -> &str {
        match self {
            DisplayState::Waiting => WAITING_LABEL,
            DisplayState::Pending => EmotionLabel::UNKNOWN,
            DisplayState::Emotion(label) => label.as_str(),
        }
    }
}

/// Context handed to the external emotion classifier with each lookup.
///
/// Carries no pixels: `frame_seq` names the frame at the source that
/// produced the observation and `region` the crop within it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupRequest {
    pub identity: Identity,
    pub region: FaceRegion,
    pub frame_seq: u64,
    pub requested_at: DateTime<Utc>,
}

/// Work the tracker asks its host to dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Hand the request to the emotion classifier. Its completion, or
    /// the `"unknown"` sentinel on failure, must come back through
    /// [`AttendanceTracker::resolve_emotion`].
    EmotionLookupRequested(LookupRequest),
    /// Append the record to the durable attendance log.
    LogWriteRequested(AttendanceRecord),
}

/// Outcome of one tracker call: actions for the host to dispatch plus
/// a fresh display snapshot for presentation.
#[derive(Debug, Clone, Default)]
pub struct TrackerActions {
    pub actions: Vec<Action>,
    pub display: BTreeMap<Identity, DisplayState>,
}

/// Debounce-and-dedup core. One instance per session owner; all
/// mutation goes through [`observe`](Self::observe),
/// [`resolve_emotion`](Self::resolve_emotion) and
/// [`reset`](Self::reset).
#[derive(Debug)]
pub struct AttendanceTracker {
    debounce: Duration,
    session_started_at: DateTime<Utc>,
    entries: BTreeMap<Identity, TrackedEntry>,
}

impl AttendanceTracker {
    pub fn new(debounce: Duration, now: DateTime<Utc>) -> Self {
        Self {
            debounce,
            session_started_at: now,
            entries: BTreeMap::new(),
        }
    }

    /// Tracker with the stock dwell threshold.
    pub fn with_default_debounce(now: DateTime<Utc>) -> Self {
        Self::new(Duration::seconds(DEFAULT_DEBOUNCE_SECS), now)
    }

    /// Feed one frame's observations into the session.
    ///
    /// Unknown faces are skipped entirely. A known identity gets an
    /// entry on first sighting; once its dwell time reaches the
    /// threshold the one emotion lookup for the session is emitted.
    /// Never blocks and never calls the classifier.
    pub fn observe(&mut self, batch: &ObservationBatch, now: DateTime<Utc>) -> TrackerActions {
        let mut actions = Vec::new();

        for obs in &batch.observations {
            let Some(identity) = &obs.identity else {
                continue;
            };

            let entry = self
                .entries
                .entry(identity.clone())
                .or_insert_with(|| TrackedEntry::first_seen_at(now));

            let elapsed = now - entry.first_seen;
            if elapsed >= self.debounce && !entry.emotion_requested {
                entry.emotion_requested = true;
                tracing::debug!(
                    identity = %identity,
                    elapsed_ms = elapsed.num_milliseconds(),
                    frame_seq = batch.frame_seq,
                    "emotion lookup requested"
                );
                actions.push(Action::EmotionLookupRequested(LookupRequest {
                    identity: identity.clone(),
                    region: obs.region,
                    frame_seq: batch.frame_seq,
                    requested_at: now,
                }));
            }
        }

        TrackerActions {
            actions,
            display: self.snapshot(),
        }
    }

    /// Accept an asynchronous classification result.
    ///
    /// A resolution for an identity with no entry means a session reset
    /// raced the classifier; it is dropped as a benign no-op. Otherwise
    /// the label is stored and, the first time only, a log write is
    /// emitted. This is the single point that triggers log writes.
    pub fn resolve_emotion(
        &mut self,
        identity: &Identity,
        label: EmotionLabel,
        now: DateTime<Utc>,
    ) -> TrackerActions {
        let mut actions = Vec::new();

        match self.entries.get_mut(identity) {
            Some(entry) => {
                entry.emotion = Some(label.clone());
                if !entry.logged {
                    entry.logged = true;
                    actions.push(Action::LogWriteRequested(AttendanceRecord {
                        identity: identity.clone(),
                        emotion: label,
                        logged_at: now,
                    }));
                }
            }
            None => {
                tracing::debug!(
                    identity = %identity,
                    "dropping emotion resolution for untracked identity"
                );
            }
        }

        TrackerActions {
            actions,
            display: self.snapshot(),
        }
    }

    /// Discard all session state and start a new session.
    ///
    /// The durable log is untouched. Outstanding classifier work is not
    /// cancelled; its late resolutions will miss the entry lookup and
    /// be dropped.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        let discarded = self.entries.len();
        self.entries.clear();
        self.session_started_at = now;
        tracing::debug!(discarded, "session state cleared");
    }

    /// Current display state for every tracked identity.
    pub fn snapshot(&self) -> BTreeMap<Identity, DisplayState> {
        self.entries
            .iter()
            .map(|(identity, entry)| (identity.clone(), entry.display_state()))
            .collect()
    }

    pub fn entry(&self, identity: &Identity) -> Option<&TrackedEntry> {
        self.entries.get(identity)
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn session_started_at(&self) -> DateTime<Utc> {
        self.session_started_at
    }

    /// Identities with an entry this session.
    pub fn tracked_count(&self) -> usize {
        self.entries.len()
    }

    /// Identities already logged this session.
    pub fn logged_count(&self) -> usize {
        self.entries.values().filter(|e| e.logged).count()
    }
}
