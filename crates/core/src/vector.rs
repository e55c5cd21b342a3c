//! Dense vector helpers shared by the clustering pipeline.

use crate::error::CoreError;

/// A dense vector of `f64` components. All vectors within one job share a
/// single dimensionality.
pub type Vector = Vec<f64>;

/// Component-wise `acc += v`.
pub fn add_assign(acc: &mut [f64], v: &[f64]) -> Result<(), CoreError> {
    if acc.len() != v.len() {
        return Err(CoreError::DimensionMismatch {
            expected: acc.len(),
            found: v.len(),
        });
    }
    for (a, b) in acc.iter_mut().zip(v.iter()) {
        *a += b;
    }
    Ok(())
}

/// Divide each component of `sum` by `count`, producing the mean vector.
pub fn mean_of_sum(sum: &[f64], count: u64) -> Vector {
    let denom = count.max(1) as f64;
    sum.iter().map(|c| c / denom).collect()
}
