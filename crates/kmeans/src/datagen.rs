//! Deterministic synthetic dataset generation.
//!
//! Writes a vectors JSONL file and a centers JSONL file whose seed centers
//! are the first K generated vectors. Components are uniform integers in
//! `0..count` stored as `f64`, which keeps averages well scaled relative
//! to the dataset size.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lockstep_core::Vector;

use crate::error::KMeansError;

/// Generate `count` vectors of `dimension` components with a fixed `seed`,
/// plus the first `k` of them as seed centers.
pub fn generate(
    vectors_path: impl AsRef<Path>,
    centers_path: impl AsRef<Path>,
    count: usize,
    dimension: usize,
    k: usize,
    seed: u64,
) -> Result<(), KMeansError> {
    if k == 0 || k > count {
        return Err(KMeansError::Config(format!(
            "need 1 <= k <= count, got k={k} count={count}"
        )));
    }
    if dimension == 0 {
        return Err(KMeansError::Config("dimension must be at least 1".into()));
    }

    for path in [vectors_path.as_ref(), centers_path.as_ref()] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut vectors = BufWriter::new(File::create(vectors_path.as_ref())?);
    let mut centers = BufWriter::new(File::create(centers_path.as_ref())?);

    let mut rng = StdRng::seed_from_u64(seed);
    for i in 0..count {
        let vector: Vector = (0..dimension)
            .map(|_| rng.gen_range(0..count as u64) as f64)
            .collect();
        let line = serde_json::to_string(&vector)?;
        vectors.write_all(line.as_bytes())?;
        vectors.write_all(b"\n")?;
        // The first k vectors double as the seed centers.
        if i < k {
            centers.write_all(line.as_bytes())?;
            centers.write_all(b"\n")?;
        }
    }
    vectors.flush()?;
    centers.flush()?;

    tracing::info!(
        count,
        dimension,
        k,
        seed,
        vectors = %vectors_path.as_ref().display(),
        centers = %centers_path.as_ref().display(),
        "dataset generated"
    );
    Ok(())
}
