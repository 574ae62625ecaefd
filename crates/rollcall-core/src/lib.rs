//! Attendance tracking state machine and the contracts it
//! orchestrates.
//!
//! The tracker decides, for a stream of per-frame face observations,
//! when a recognized identity triggers its one emotion lookup and its
//! one attendance log write per session. Camera capture, face
//! matching, emotion inference and rendering live in external
//! collaborators; this crate is pure state.

pub mod emotion;
pub mod enroll;
pub mod matcher;
pub mod tracker;
pub mod types;

pub use emotion::{classify_or_unknown, EmotionClassifier, EmotionError};
pub use enroll::{EnrollError, EnrollProgress, SampleCollector};
pub use matcher::{Embedding, MatchOutcome, Reference, ReferenceSet};
pub use tracker::{
    Action, AttendanceTracker, DisplayState, LookupRequest, TrackedEntry, TrackerActions,
};
pub use types::{
    AttendanceRecord, EmotionLabel, FaceRegion, Identity, Observation, ObservationBatch,
};
