//! Distance measures for nearest-center assignment.
//!
//! A closed registry: measures are enum variants selected by a string
//! identifier in configuration. Unknown identifiers do not fail the job;
//! [`resolve`] logs a warning and falls back to Euclidean.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMeasure {
    #[default]
    Euclidean,
    SquaredEuclidean,
    Manhattan,
    Cosine,
}

impl DistanceMeasure {
    /// Distance between two equal-length vectors. Non-negative, 0.0 for
    /// identical inputs.
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Self::Euclidean => squared_euclidean(a, b).sqrt(),
            Self::SquaredEuclidean => squared_euclidean(a, b),
            Self::Manhattan => a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum(),
            Self::Cosine => cosine_distance(a, b),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Euclidean => "euclidean",
            Self::SquaredEuclidean => "squared_euclidean",
            Self::Manhattan => "manhattan",
            Self::Cosine => "cosine",
        }
    }
}

impl fmt::Display for DistanceMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DistanceMeasure {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(Self::Euclidean),
            "squared_euclidean" | "squared-euclidean" => Ok(Self::SquaredEuclidean),
            "manhattan" | "l1" => Ok(Self::Manhattan),
            "cosine" => Ok(Self::Cosine),
            other => Err(CoreError::UnknownDistanceMeasure(other.to_string())),
        }
    }
}

/// Resolve a configured identifier. `None` silently selects the default;
/// an unknown identifier logs a warning and falls back to Euclidean.
pub fn resolve(name: Option<&str>) -> DistanceMeasure {
    match name {
        None => DistanceMeasure::default(),
        Some(s) => s.parse().unwrap_or_else(|_| {
            tracing::warn!(
                measure = %s,
                "unknown distance measure, falling back to euclidean"
            );
            DistanceMeasure::Euclidean
        }),
    }
}

#[inline]
fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        // Zero vectors have no direction.
        return if norm_a == norm_b { 0.0 } else { 1.0 };
    }
    1.0 - dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_is_default() {
        assert_eq!(DistanceMeasure::default(), DistanceMeasure::Euclidean);
    }

    #[test]
    fn euclidean_3_4_5() {
        let d = DistanceMeasure::Euclidean.distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn squared_euclidean_skips_the_sqrt() {
        let d = DistanceMeasure::SquaredEuclidean.distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 25.0).abs() < 1e-12);
    }

    #[test]
    fn manhattan_sums_absolute_differences() {
        let d = DistanceMeasure::Manhattan.distance(&[1.0, -1.0], &[4.0, 1.0]);
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn cosine_orthogonal_vectors() {
        let d = DistanceMeasure::Cosine.distance(&[1.0, 0.0], &[0.0, 1.0]);
        assert!((d - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cosine_parallel_vectors() {
        let d = DistanceMeasure::Cosine.distance(&[2.0, 2.0], &[4.0, 4.0]);
        assert!(d.abs() < 1e-12);
    }

    #[test]
    fn identical_inputs_have_zero_distance() {
        for m in [
            DistanceMeasure::Euclidean,
            DistanceMeasure::SquaredEuclidean,
            DistanceMeasure::Manhattan,
            DistanceMeasure::Cosine,
        ] {
            assert_eq!(m.distance(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 0.0);
        }
    }

    #[test]
    fn parses_identifiers_and_aliases() {
        assert_eq!(
            "euclidean".parse::<DistanceMeasure>().unwrap(),
            DistanceMeasure::Euclidean
        );
        assert_eq!(
            "L2".parse::<DistanceMeasure>().unwrap(),
            DistanceMeasure::Euclidean
        );
        assert_eq!(
            "l1".parse::<DistanceMeasure>().unwrap(),
            DistanceMeasure::Manhattan
        );
        assert_eq!(
            "Cosine".parse::<DistanceMeasure>().unwrap(),
            DistanceMeasure::Cosine
        );
    }

    #[test]
    fn unknown_identifier_errors_on_parse() {
        assert!("mahalanobis".parse::<DistanceMeasure>().is_err());
    }

    #[test]
    fn resolve_falls_back_to_euclidean() {
        assert_eq!(resolve(Some("mahalanobis")), DistanceMeasure::Euclidean);
        assert_eq!(resolve(None), DistanceMeasure::Euclidean);
        assert_eq!(resolve(Some("manhattan")), DistanceMeasure::Manhattan);
    }
}
