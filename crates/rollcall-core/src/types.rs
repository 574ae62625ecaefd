use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable label for an enrolled person, assigned at enrollment.
///
/// The tracker keys all per-session state on this value: two
/// observations carrying the same `Identity` are the same person as
/// far as attendance is concerned.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Identity {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Emotion label as produced by an external classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmotionLabel(String);

impl EmotionLabel {
    /// Sentinel label recorded when classification failed or never ran.
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The `"unknown"` sentinel.
    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EmotionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EmotionLabel {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}

/// Axis-aligned face region in frame pixel coordinates.
///
/// Field order follows the upstream detector convention
/// (top, right, bottom, left).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRegion {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// One face detection in one frame, as reported by the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub region: FaceRegion,
    /// `None` when no enrolled reference matched within tolerance.
    pub identity: Option<Identity>,
    /// Match confidence in [0, 1]. Informational only; never gates
    /// debounce or logging.
    pub confidence: f32,
}

impl Observation {
    pub fn known(region: FaceRegion, identity: Identity, confidence: f32) -> Self {
        Self {
            region,
            identity: Some(identity),
            confidence,
        }
    }

    /// An unmatched face. Unknown faces are displayed but never tracked.
    pub fn unknown(region: FaceRegion) -> Self {
        Self {
            region,
            identity: None,
            confidence: 0.0,
        }
    }
}

/// Every observation extracted from a single frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationBatch {
    /// Monotonic frame counter assigned by the frame source. Lookup
    /// requests carry it so the classifier can locate the frame that
    /// produced the observation; the pixels themselves never pass
    /// through the tracker.
    pub frame_seq: u64,
    pub observations: Vec<Observation>,
}

impl ObservationBatch {
    pub fn new(frame_seq: u64, observations: Vec<Observation>) -> Self {
        Self {
            frame_seq,
            observations,
        }
    }
}

/// One attendance event, immutable once appended to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub identity: Identity,
    pub emotion: EmotionLabel,
    pub logged_at: DateTime<Utc>,
}
