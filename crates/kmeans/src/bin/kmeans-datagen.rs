//! kmeans-datagen — deterministic synthetic dataset generator.
//!
//! Writes a vectors JSONL file plus a centers JSONL file seeded with the
//! first K generated vectors, ready to feed to kmeans-peer.
//!
//! # Usage
//!
//! ```bash
//! kmeans-datagen --count 10000 --dimension 3 --k 8 --seed 42
//! kmeans-peer --local 2
//! ```

use std::path::PathBuf;

use clap::Parser;

use lockstep_kmeans::datagen;

/// Deterministic synthetic dataset generator for kmeans-peer.
#[derive(Parser, Debug)]
#[command(name = "kmeans-datagen", version, about)]
struct Cli {
    /// Number of vectors to generate.
    #[arg(long, default_value_t = 1000)]
    count: usize,

    /// Components per vector.
    #[arg(long, default_value_t = 3)]
    dimension: usize,

    /// Number of seed centers, taken from the first K vectors.
    #[arg(long, default_value_t = 4)]
    k: usize,

    /// RNG seed; the same seed reproduces the same dataset.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Vectors output path.
    #[arg(long, default_value = "data/vectors.jsonl")]
    vectors: PathBuf,

    /// Centers output path.
    #[arg(long, default_value = "data/centers.jsonl")]
    centers: PathBuf,
}

fn main() -> anyhow::Result<()> {
    lockstep_core::load_dotenv();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting kmeans-datagen");

    datagen::generate(
        &cli.vectors,
        &cli.centers,
        cli.count,
        cli.dimension,
        cli.k,
        cli.seed,
    )?;
    Ok(())
}
