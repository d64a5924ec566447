//! Multinomial resampling with replacement.
//!
//! The cumulative distribution of the weights is built once; every draw is a
//! uniform variate located in it by binary search, so drawing N indices costs
//! O(N log N). Indices with exactly zero weight are never returned.

use rand::Rng;

use crate::error::{EpiError, EpiResult};

/// Draws indices with probability proportional to a weight vector.
#[derive(Clone, Debug)]
pub struct ReplacementSampler {
    cumulative: Vec<f64>,
    last_positive: usize,
}

impl ReplacementSampler {
    /// Build the sampler. Weights need not be normalised but must be finite,
    /// non-negative and not all zero.
    pub fn new(weights: &[f64]) -> EpiResult<Self> {
        if weights.is_empty() {
            return Err(EpiError::InvalidWeights { reason: "empty weight vector" });
        }

        let mut cumulative = Vec::with_capacity(weights.len());
        let mut total = 0.0;
        let mut last_positive = None;
        for (idx, &w) in weights.iter().enumerate() {
            if !w.is_finite() || w < 0.0 {
                return Err(EpiError::InvalidWeights {
                    reason: "weights must be finite and non-negative",
                });
            }
            if w > 0.0 {
                last_positive = Some(idx);
            }
            total += w;
            cumulative.push(total);
        }

        let last_positive = match last_positive {
            Some(idx) if total.is_finite() => idx,
            Some(_) => {
                return Err(EpiError::InvalidWeights { reason: "weight sum overflows" });
            }
            None => return Err(EpiError::InvalidWeights { reason: "all weights are zero" }),
        };

        Ok(Self {
            cumulative,
            last_positive,
        })
    }

    /// Number of categories.
    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Draw one index.
    pub fn next<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let total = self.cumulative[self.cumulative.len() - 1];
        let u = rng.gen::<f64>() * total;
        // First index whose cumulative weight exceeds u; zero-weight entries
        // share the cumulative value of their predecessor and are skipped.
        let idx = self.cumulative.partition_point(|&c| c <= u);
        idx.min(self.last_positive)
    }

    /// Draw `n` independent indices.
    pub fn sample<R: Rng + ?Sized>(&self, n: usize, rng: &mut R) -> Vec<usize> {
        (0..n).map(|_| self.next(rng)).collect()
    }
}
