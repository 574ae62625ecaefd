//! Fixed-count enrollment sample collector.
//!
//! Enrollment captures a small number of embedding samples for one
//! person, one frame at a time. A capture is accepted only when the
//! frame contained exactly one face; anything else is rejected with
//! the found count so the operator can adjust.

use serde::Serialize;
use thiserror::Error;

use crate::matcher::Embedding;
use crate::types::Identity;

/// Stock number of samples collected per enrollment.
pub const DEFAULT_SAMPLE_TARGET: usize = 5;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EnrollError {
    #[error("sample target must be at least 1, got {0}")]
    InvalidTarget(usize),
    #[error("expected exactly one face in frame, found {0}")]
    WrongFaceCount(usize),
    #[error("enrollment already has all {0} samples")]
    AlreadyComplete(usize),
    #[error("only {captured}/{target} samples captured")]
    Incomplete { captured: usize, target: usize },
}

/// Progress report after a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnrollProgress {
    pub captured: usize,
    pub target: usize,
    pub complete: bool,
}

/// Collects embedding samples for one person until the target count
/// is reached. Completing an enrollment for an already-enrolled name
/// replaces that person's previous samples in the roster.
#[derive(Debug, Clone)]
pub struct SampleCollector {
    name: Identity,
    target: usize,
    samples: Vec<Embedding>,
}

impl SampleCollector {
    pub fn new(name: Identity, target: usize) -> Result<Self, EnrollError> {
        if target == 0 {
            return Err(EnrollError::InvalidTarget(target));
        }
        Ok(Self {
            name,
            target,
            samples: Vec::with_capacity(target),
        })
    }

    /// Offer everything detected in one frame. Accepted only when
    /// exactly one face was found.
    pub fn offer(&mut self, detected: Vec<Embedding>) -> Result<EnrollProgress, EnrollError> {
        if self.is_complete() {
            return Err(EnrollError::AlreadyComplete(self.target));
        }
        if detected.len() != 1 {
            return Err(EnrollError::WrongFaceCount(detected.len()));
        }
        self.samples.extend(detected);
        Ok(self.progress())
    }

    pub fn progress(&self) -> EnrollProgress {
        EnrollProgress {
            captured: self.samples.len(),
            target: self.target,
            complete: self.is_complete(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.samples.len() >= self.target
    }

    pub fn name(&self) -> &Identity {
        &self.name
    }

    /// Consume the collector, yielding the person and their samples.
    /// Fails until the target is reached.
    pub fn finish(self) -> Result<(Identity, Vec<Embedding>), EnrollError> {
        if !self.is_complete() {
            return Err(EnrollError::Incomplete {
                captured: self.samples.len(),
                target: self.target,
            });
        }
        Ok((self.name, self.samples))
    }
}
