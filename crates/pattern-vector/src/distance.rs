//! Distance metrics over fixed-dimension vectors.
//!
//! The index fixes one metric per instance at creation time. Cosine
//! distance is `1 - dot(a,b)/(|a|·|b|)`; zero-norm operands are rejected
//! rather than silently producing NaN.

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Distance metric for vector comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Angular distance, `1 - cosine_similarity`. Range [0, 2].
    Cosine,
    /// Straight-line L2 distance.
    Euclidean,
}

impl DistanceMetric {
    /// Wire code used in the snapshot header.
    pub fn as_u8(self) -> u8 {
        match self {
            DistanceMetric::Cosine => 0,
            DistanceMetric::Euclidean => 1,
        }
    }

    /// Decode a snapshot wire code.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(DistanceMetric::Cosine),
            1 => Some(DistanceMetric::Euclidean),
            _ => None,
        }
    }

    /// Compute the distance between two vectors.
    ///
    /// Fails with `DimensionMismatch` on length disagreement and
    /// `InvalidVector` for a zero-norm operand under cosine.
    pub fn compute(self, a: &[f64], b: &[f64]) -> Result<f64, IndexError> {
        if a.len() != b.len() {
            return Err(IndexError::DimensionMismatch {
                expected: a.len(),
                actual: b.len(),
            });
        }
        match self {
            DistanceMetric::Cosine => {
                let norm_a = norm(a);
                let norm_b = norm(b);
                if norm_a == 0.0 || norm_b == 0.0 {
                    return Err(IndexError::InvalidVector(
                        "zero-norm vector under cosine metric".to_string(),
                    ));
                }
                Ok(1.0 - dot(a, b) / (norm_a * norm_b))
            }
            DistanceMetric::Euclidean => Ok(euclidean(a, b)),
        }
    }

    /// Distance between two vectors already validated against this index.
    ///
    /// Callers must have run `validate_vector` on both operands; under that
    /// precondition the computation cannot fail.
    pub(crate) fn compute_raw(self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            DistanceMetric::Cosine => {
                let denom = norm(a) * norm(b);
                debug_assert!(denom > 0.0);
                1.0 - dot(a, b) / denom
            }
            DistanceMetric::Euclidean => euclidean(a, b),
        }
    }
}

/// Validate a vector against the index dimensionality and metric.
///
/// No padding or truncation is ever applied; mismatched lengths are
/// rejected outright.
pub fn validate_vector(
    vector: &[f64],
    dimension: usize,
    metric: DistanceMetric,
) -> Result<(), IndexError> {
    if vector.len() != dimension {
        return Err(IndexError::DimensionMismatch {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(IndexError::InvalidVector(
            "non-finite component".to_string(),
        ));
    }
    if metric == DistanceMetric::Cosine && norm(vector) == 0.0 {
        return Err(IndexError::InvalidVector(
            "zero-norm vector under cosine metric".to_string(),
        ));
    }
    Ok(())
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}
