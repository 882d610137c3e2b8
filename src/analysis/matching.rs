use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::{
    VerificationConfig,
    analysis::features::Descriptor,
    error::{Result, VerifyError},
};

/// A crop descriptor paired with its nearest reference descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    /// Index into the crop (query) feature set.
    pub query_idx: usize,
    /// Index into the reference (train) feature set.
    pub train_idx: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// Queries for which a best/second-best pair could be formed.
    pub candidates: usize,
    /// Matches that passed the ratio test, in query order.
    pub good: Vec<Match>,
}

pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Brute-force 2-NN matcher with Lowe's ratio test.
#[derive(Debug, Clone)]
pub struct DescriptorMatcher {
    ratio: f32,
    parallel: bool,
}

impl DescriptorMatcher {
    pub fn new(ratio: f32) -> Result<Self> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(VerifyError::InvalidParameter(format!(
                "ratio threshold must be in (0, 1], got {ratio}"
            )));
        }

        Ok(Self {
            ratio,
            parallel: false,
        })
    }

    pub fn from_config(config: &VerificationConfig) -> Result<Self> {
        Ok(Self::new(config.ratio_threshold)?.with_parallel(config.parallel))
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Matches every crop descriptor against the reference set. With fewer
    /// than two reference descriptors no query can be tested and the outcome
    /// is empty.
    pub fn match_descriptors(&self, crop: &[Descriptor], reference: &[Descriptor]) -> MatchOutcome {
        if reference.len() < 2 {
            return MatchOutcome::default();
        }

        let good: Vec<Match> = if self.parallel {
            crop.par_iter()
                .enumerate()
                .filter_map(|(i, d)| self.best_match(i, d, reference))
                .collect()
        } else {
            crop.iter()
                .enumerate()
                .filter_map(|(i, d)| self.best_match(i, d, reference))
                .collect()
        };

        MatchOutcome {
            candidates: crop.len(),
            good,
        }
    }

    fn best_match(&self, query_idx: usize, query: &Descriptor, reference: &[Descriptor]) -> Option<Match> {
        let (best_idx, best, second) = two_nearest(query, reference);

        if (best as f32) < self.ratio * second as f32 {
            Some(Match {
                query_idx,
                train_idx: best_idx,
                distance: best,
            })
        } else {
            None
        }
    }
}

/// Index and distance of the nearest candidate plus the second-nearest
/// distance. Ties keep the lower index.
fn two_nearest(query: &Descriptor, reference: &[Descriptor]) -> (usize, u32, u32) {
    let mut best_idx = 0;
    let mut best = u32::MAX;
    let mut second = u32::MAX;

    for (idx, candidate) in reference.iter().enumerate() {
        let distance = hamming_distance(query, candidate);

        if distance < best {
            second = best;
            best = distance;
            best_idx = idx;
        } else if distance < second {
            second = distance;
        }
    }

    (best_idx, best, second)
}
