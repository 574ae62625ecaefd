//! Emotion classification contract.
//!
//! Classifiers are external and slow; hosts run them off the
//! observation path and feed every outcome back through
//! [`AttendanceTracker::resolve_emotion`](crate::tracker::AttendanceTracker::resolve_emotion).
//! The fail-open rule is load-bearing: a lookup that never resolves
//! would leave its identity unlogged for the whole session, so any
//! classifier error must surface as the `"unknown"` sentinel rather
//! than as silence.

use thiserror::Error;

use crate::tracker::LookupRequest;
use crate::types::{EmotionLabel, FaceRegion};

/// Smallest usable face crop, in pixels per side.
pub const MIN_REGION_PIXELS: u32 = 48;

#[derive(Error, Debug)]
pub enum EmotionError {
    #[error("face region {width}x{height} is too small to classify")]
    RegionTooSmall { width: u32, height: u32 },
    #[error("classifier failed: {0}")]
    ClassifierFailed(String),
    #[error("classifier timed out after {0}s")]
    TimedOut(u64),
}

/// External emotion classifier.
pub trait EmotionClassifier {
    fn classify(&mut self, request: &LookupRequest) -> Result<EmotionLabel, EmotionError>;
}

/// Reject crops below the minimum the classifier can work with.
/// Implementations call this before touching pixels.
pub fn check_region(region: &FaceRegion) -> Result<(), EmotionError> {
    let (width, height) = (region.width(), region.height());
    if width < MIN_REGION_PIXELS || height < MIN_REGION_PIXELS {
        return Err(EmotionError::RegionTooSmall { width, height });
    }
    Ok(())
}

/// Run a classifier with the fail-open policy applied: any error
/// becomes the sentinel label, so every requested lookup resolves.
pub fn classify_or_unknown<C: EmotionClassifier>(
    classifier: &mut C,
    request: &LookupRequest,
) -> EmotionLabel {
    match classifier.classify(request) {
        Ok(label) => label,
        Err(err) => {
            tracing::warn!(
                identity = %request.identity,
                error = %err,
                "emotion classification failed, resolving with sentinel"
            );
            EmotionLabel::unknown()
        }
    }
}
