//! Job configuration.
//!
//! Parsed from TOML with serde defaults, `LOCKSTEP_*` environment variable
//! overrides, and validation. The `[cluster]` section is only required for
//! distributed runs; local in-process jobs ignore it.

use std::path::Path;

use serde::{Deserialize, Serialize};

use lockstep_bsp::ClusterConfig;
use lockstep_core::{distance, env_opt, env_parse, DistanceMeasure};

use crate::error::KMeansError;

/// Full configuration for one clustering job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub job: JobSection,

    #[serde(default)]
    pub input: InputSection,

    #[serde(default)]
    pub output: OutputSection,

    /// Cluster topology for distributed runs.
    #[serde(default)]
    pub cluster: ClusterConfig,
}

/// `[job]` section: loop bound and distance measure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSection {
    /// Superstep bound. Non-positive means run to convergence.
    #[serde(default)]
    pub max_iterations: i64,

    /// Distance measure identifier. Unknown identifiers fall back to
    /// euclidean with a warning; absent selects euclidean silently.
    pub distance: Option<String>,
}

/// `[input]` section: vectors and seed centers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSection {
    /// Vectors JSONL path. May contain a `{peer}` placeholder for
    /// dedicated per-peer shard files.
    #[serde(default = "default_vectors_path")]
    pub vectors: String,

    /// Seed centers JSONL path.
    #[serde(default = "default_centers_path")]
    pub centers: String,
}

fn default_vectors_path() -> String {
    "data/vectors.jsonl".into()
}

fn default_centers_path() -> String {
    "data/centers.jsonl".into()
}

impl Default for InputSection {
    fn default() -> Self {
        Self {
            vectors: default_vectors_path(),
            centers: default_centers_path(),
        }
    }
}

/// `[output]` section: where assignments land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Assignments JSONL path; `{peer}` resolves to the peer index.
    #[serde(default = "default_assignments_path")]
    pub assignments: String,
}

fn default_assignments_path() -> String {
    "out/assignments-{peer}.jsonl".into()
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            assignments: default_assignments_path(),
        }
    }
}

// ── Loading & Validation ────────────────────────────────────────────

impl JobConfig {
    /// Parse from a TOML string, apply `LOCKSTEP_*` overrides, validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, KMeansError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KMeansError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Load from an optional path; absent means defaults plus overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, KMeansError> {
        match path {
            Some(p) => Self::from_file(p),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Effective superstep bound. `None` means unlimited.
    pub fn max_iterations(&self) -> Option<u64> {
        (self.job.max_iterations > 0).then_some(self.job.max_iterations as u64)
    }

    /// Resolve the configured distance measure.
    pub fn distance_measure(&self) -> DistanceMeasure {
        distance::resolve(self.job.distance.as_deref())
    }

    /// Whether the vectors path names dedicated per-peer shard files.
    pub fn has_dedicated_shards(&self) -> bool {
        self.input.vectors.contains("{peer}")
    }

    pub fn vectors_path(&self, peer: u32) -> String {
        resolve_peer_path(&self.input.vectors, peer)
    }

    pub fn assignments_path(&self, peer: u32) -> String {
        resolve_peer_path(&self.output.assignments, peer)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `LOCKSTEP_MAX_ITERATIONS` → `job.max_iterations` (unparseable
    ///   values are ignored with a warning)
    /// - `LOCKSTEP_DISTANCE` → `job.distance`
    /// - plus the cluster overrides (`LOCKSTEP_CONDUCTOR`, `LOCKSTEP_PEERS`)
    fn apply_env_overrides(&mut self) {
        self.job.max_iterations = env_parse("LOCKSTEP_MAX_ITERATIONS", self.job.max_iterations);
        if let Some(v) = env_opt("LOCKSTEP_DISTANCE") {
            self.job.distance = Some(v);
        }
        self.cluster.apply_env_overrides();
    }

    // ── Validation ──────────────────────────────────────────────────

    pub fn validate(&self) -> Result<(), KMeansError> {
        if self.input.vectors.trim().is_empty() {
            return Err(KMeansError::Config("input.vectors path is empty".into()));
        }
        if self.input.centers.trim().is_empty() {
            return Err(KMeansError::Config("input.centers path is empty".into()));
        }
        if self.output.assignments.trim().is_empty() {
            return Err(KMeansError::Config(
                "output.assignments path is empty".into(),
            ));
        }
        // [cluster] is optional for local runs; the mesh validates again
        // on join.
        if !self.cluster.peers.is_empty() {
            self.cluster.validate()?;
        }
        Ok(())
    }
}

/// Substitute the `{peer}` placeholder in a path template.
pub fn resolve_peer_path(template: &str, peer: u32) -> String {
    template.replace("{peer}", &peer.to_string())
}
