//! Identity matching against enrolled reference embeddings.
//!
//! Matching collaborators resolve each detected face to an enrolled
//! identity before observations reach the tracker. The semantics here
//! mirror the dlib face-embedding convention the roster was built
//! with: every enrolled person's samples are averaged into a single
//! reference, probes match by Euclidean distance within a tolerance,
//! and confidence is `1 - distance` of the best match.

use serde::{Deserialize, Serialize};

use crate::types::Identity;

// --- Named constants (no magic numbers) ---
/// Stock Euclidean distance tolerance for a positive match.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Face embedding vector (128-dimensional in the dlib convention).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance to another embedding.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Component-wise mean of a sample set. `None` when no samples.
    pub fn mean_of(samples: &[Embedding]) -> Option<Embedding> {
        let first = samples.first()?;
        let mut acc = vec![0.0f32; first.len()];
        for sample in samples {
            for (slot, value) in acc.iter_mut().zip(sample.values.iter()) {
                *slot += value;
            }
        }
        let count = samples.len() as f32;
        for slot in acc.iter_mut() {
            *slot /= count;
        }
        Some(Embedding::new(acc))
    }
}

/// Averaged reference embedding for one enrolled identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub identity: Identity,
    pub embedding: Embedding,
}

/// Result of matching one probe against the reference set.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    /// `None` when no reference came within tolerance.
    pub identity: Option<Identity>,
    /// `1 - distance` of the best match, clamped to [0, 1]; `0.0` for
    /// no match. Informational only.
    pub confidence: f32,
}

impl MatchOutcome {
    fn no_match() -> Self {
        Self {
            identity: None,
            confidence: 0.0,
        }
    }
}

/// Enrolled references plus the tolerance probes are matched under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSet {
    references: Vec<Reference>,
    tolerance: f32,
}

impl ReferenceSet {
    pub fn new(references: Vec<Reference>, tolerance: f32) -> Self {
        Self {
            references,
            tolerance,
        }
    }

    /// Build from per-identity sample sets, averaging each person's
    /// samples into a single reference. Identities without samples are
    /// skipped.
    pub fn from_samples<I>(samples: I, tolerance: f32) -> Self
    where
        I: IntoIterator<Item = (Identity, Vec<Embedding>)>,
    {
        let references = samples
            .into_iter()
            .filter_map(|(identity, samples)| {
                Embedding::mean_of(&samples).map(|embedding| Reference {
                    identity,
                    embedding,
                })
            })
            .collect();
        Self {
            references,
            tolerance,
        }
    }

    /// Resolve a probe to the nearest enrolled identity, or `None`
    /// when nothing is within tolerance.
    pub fn identify(&self, probe: &Embedding) -> MatchOutcome {
        let nearest = self
            .references
            .iter()
            .map(|reference| (reference, probe.euclidean_distance(&reference.embedding)))
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        match nearest {
            Some((reference, distance)) if distance <= self.tolerance => MatchOutcome {
                identity: Some(reference.identity.clone()),
                confidence: (1.0 - distance).clamp(0.0, 1.0),
            },
            _ => MatchOutcome::no_match(),
        }
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedding(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = embedding(&[0.1, 0.2, 0.3]);
        assert!(a.euclidean_distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_known_value() {
        let a = embedding(&[0.0, 0.0]);
        let b = embedding(&[3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_of_averages_componentwise() {
        let samples = vec![embedding(&[1.0, 2.0]), embedding(&[3.0, 6.0])];
        let mean = Embedding::mean_of(&samples).unwrap();
        assert_eq!(mean.values, vec![2.0, 4.0]);
    }

    #[test]
    fn test_mean_of_empty_is_none() {
        assert!(Embedding::mean_of(&[]).is_none());
    }

    #[test]
    fn test_identify_within_tolerance() {
        let set = ReferenceSet::from_samples(
            vec![(Identity::from("Alice"), vec![embedding(&[1.0, 0.0])])],
            DEFAULT_TOLERANCE,
        );

        let outcome = set.identify(&embedding(&[1.0, 0.5]));
        assert_eq!(outcome.identity, Some(Identity::from("Alice")));
        assert!((outcome.confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_identify_rejects_beyond_tolerance() {
        let set = ReferenceSet::from_samples(
            vec![(Identity::from("Alice"), vec![embedding(&[1.0, 0.0])])],
            DEFAULT_TOLERANCE,
        );

        let outcome = set.identify(&embedding(&[3.0, 3.0]));
        assert!(outcome.identity.is_none());
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_identify_empty_set() {
        let set = ReferenceSet::new(Vec::new(), DEFAULT_TOLERANCE);
        let outcome = set.identify(&embedding(&[1.0, 0.0]));
        assert!(outcome.identity.is_none());
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_identify_picks_nearest_reference() {
        let set = ReferenceSet::from_samples(
            vec![
                (Identity::from("Alice"), vec![embedding(&[0.0, 0.0])]),
                (Identity::from("Bob"), vec![embedding(&[0.5, 0.0])]),
            ],
            DEFAULT_TOLERANCE,
        );

        let outcome = set.identify(&embedding(&[0.4, 0.0]));
        assert_eq!(outcome.identity, Some(Identity::from("Bob")));
    }

    #[test]
    fn test_averaging_smooths_noisy_samples() {
        // Three noisy captures of the same face; the averaged reference
        // sits closer to a clean probe than the worst single sample.
        let samples = vec![
            embedding(&[0.9, 0.1]),
            embedding(&[1.1, -0.1]),
            embedding(&[1.0, 0.0]),
        ];
        let mean = Embedding::mean_of(&samples).unwrap();
        let probe = embedding(&[1.0, 0.0]);

        let worst = samples
            .iter()
            .map(|s| probe.euclidean_distance(s))
            .fold(0.0f32, f32::max);
        assert!(probe.euclidean_distance(&mean) < worst);
    }

    #[test]
    fn test_confidence_is_clamped() {
        // A generous tolerance can accept matches farther than 1.0
        // away; confidence must not go negative.
        let set = ReferenceSet::from_samples(
            vec![(Identity::from("Alice"), vec![embedding(&[0.0, 0.0])])],
            2.0,
        );

        let outcome = set.identify(&embedding(&[1.5, 0.0]));
        assert_eq!(outcome.identity, Some(Identity::from("Alice")));
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_from_samples_skips_empty_sample_sets() {
        let set = ReferenceSet::from_samples(
            vec![
                (Identity::from("Alice"), vec![embedding(&[1.0])]),
                (Identity::from("Ghost"), Vec::new()),
            ],
            DEFAULT_TOLERANCE,
        );
        assert_eq!(set.len(), 1);
        assert_eq!(set.references()[0].identity, Identity::from("Alice"));
    }
}
