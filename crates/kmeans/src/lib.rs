pub mod config;
pub mod datagen;
pub mod error;
pub mod io;
pub mod model;
pub mod peer;

pub use config::JobConfig;
pub use error::KMeansError;
pub use io::{
    load_assignments, load_centers, AssignmentRecord, AssignmentSink, JsonlAssignmentSink,
    JsonlVectorSource, MemoryAssignmentSink, MemoryVectorSource, VectorSource,
};
pub use model::{CenterStore, ClusterCenter, PartialSum};
pub use peer::{EpochState, JobSummary, KMeansPeer};
