//! Shard storage: vector sources and assignment sinks.
//!
//! Storage formats are JSONL (one JSON array of components per line).
//! The in-memory variants exist for tests and count their reads, which is
//! how the shard-cache behavior is observed from outside.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use lockstep_core::Vector;

use crate::error::KMeansError;
use crate::model::ClusterCenter;

/// Storage-side reader for a peer's shard of the input vectors.
pub trait VectorSource {
    /// Next vector, or `None` at end of shard.
    fn read_next(&mut self) -> Result<Option<Vector>, KMeansError>;

    /// Rewind to the start of the shard.
    fn reopen(&mut self) -> Result<(), KMeansError>;
}

/// Destination for final (center, vector) assignment pairs.
pub trait AssignmentSink {
    fn write(&mut self, center: &ClusterCenter, vector: &Vector) -> Result<(), KMeansError>;

    fn flush(&mut self) -> Result<(), KMeansError>;
}

/// One emitted assignment line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub center: ClusterCenter,
    pub vector: Vector,
}

// ── JSONL storage ───────────────────────────────────────────────────

/// JSONL vector reader with optional round-robin line sharding.
///
/// With `shard_of` n, peer i serves only the non-empty lines whose index
/// is congruent to i modulo n. Blank lines never consume an index, so
/// every peer computes the same line numbering.
pub struct JsonlVectorSource {
    path: PathBuf,
    reader: BufReader<File>,
    buf: String,
    /// Index of the next non-empty line.
    line: usize,
    shard_index: usize,
    shard_of: usize,
}

impl JsonlVectorSource {
    /// Open a file as a single unsharded shard.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, KMeansError> {
        Self::open_sharded(path, 0, 1)
    }

    /// Open shard `shard_index` of `shard_of` by round-robin line index.
    pub fn open_sharded(
        path: impl Into<PathBuf>,
        shard_index: usize,
        shard_of: usize,
    ) -> Result<Self, KMeansError> {
        let path = path.into();
        let reader = BufReader::new(File::open(&path)?);
        Ok(Self {
            path,
            reader,
            buf: String::new(),
            line: 0,
            shard_index,
            shard_of: shard_of.max(1),
        })
    }
}

impl VectorSource for JsonlVectorSource {
    fn read_next(&mut self) -> Result<Option<Vector>, KMeansError> {
        loop {
            self.buf.clear();
            if self.reader.read_line(&mut self.buf)? == 0 {
                return Ok(None);
            }
            let trimmed = self.buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            let index = self.line;
            self.line += 1;
            if index % self.shard_of != self.shard_index {
                continue;
            }
            return Ok(Some(serde_json::from_str(trimmed)?));
        }
    }

    fn reopen(&mut self) -> Result<(), KMeansError> {
        self.reader = BufReader::new(File::open(&self.path)?);
        self.line = 0;
        Ok(())
    }
}

/// JSONL writer for [`AssignmentRecord`] lines.
pub struct JsonlAssignmentSink {
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlAssignmentSink {
    /// Create (truncate) the output file, creating parent directories.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, KMeansError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            writer: BufWriter::new(File::create(path.as_ref())?),
            written: 0,
        })
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }
}

impl AssignmentSink for JsonlAssignmentSink {
    fn write(&mut self, center: &ClusterCenter, vector: &Vector) -> Result<(), KMeansError> {
        let record = AssignmentRecord {
            center: center.clone(),
            vector: vector.clone(),
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), KMeansError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Load seed centers from a JSONL file of vectors.
pub fn load_centers(path: impl AsRef<Path>) -> Result<Vec<ClusterCenter>, KMeansError> {
    let file = File::open(path.as_ref())?;
    let mut centers = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        centers.push(ClusterCenter::new(serde_json::from_str(trimmed)?));
    }
    Ok(centers)
}

/// Load assignment records back from a JSONL file. Test and tooling helper.
pub fn load_assignments(path: impl AsRef<Path>) -> Result<Vec<AssignmentRecord>, KMeansError> {
    let file = File::open(path.as_ref())?;
    let mut records = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        records.push(serde_json::from_str(trimmed)?);
    }
    Ok(records)
}

// ── In-memory storage ───────────────────────────────────────────────

/// In-memory vector source that counts reads and reopens.
pub struct MemoryVectorSource {
    vectors: Vec<Vector>,
    cursor: usize,
    reads: usize,
    reopens: usize,
}

impl MemoryVectorSource {
    pub fn new(vectors: Vec<Vector>) -> Self {
        Self {
            vectors,
            cursor: 0,
            reads: 0,
            reopens: 0,
        }
    }

    /// Vectors served since construction.
    pub fn reads(&self) -> usize {
        self.reads
    }

    /// Times the source was rewound.
    pub fn reopens(&self) -> usize {
        self.reopens
    }
}

impl VectorSource for MemoryVectorSource {
    fn read_next(&mut self) -> Result<Option<Vector>, KMeansError> {
        match self.vectors.get(self.cursor) {
            Some(vector) => {
                self.cursor += 1;
                self.reads += 1;
                Ok(Some(vector.clone()))
            }
            None => Ok(None),
        }
    }

    fn reopen(&mut self) -> Result<(), KMeansError> {
        self.cursor = 0;
        self.reopens += 1;
        Ok(())
    }
}

/// In-memory assignment sink collecting records for inspection.
#[derive(Debug, Default)]
pub struct MemoryAssignmentSink {
    records: Vec<AssignmentRecord>,
    flushes: usize,
}

impl MemoryAssignmentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[AssignmentRecord] {
        &self.records
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl AssignmentSink for MemoryAssignmentSink {
    fn write(&mut self, center: &ClusterCenter, vector: &Vector) -> Result<(), KMeansError> {
        self.records.push(AssignmentRecord {
            center: center.clone(),
            vector: vector.clone(),
        });
        Ok(())
    }

    fn flush(&mut self) -> Result<(), KMeansError> {
        self.flushes += 1;
        Ok(())
    }
}
