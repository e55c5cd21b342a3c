use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("unknown distance measure: {0}")]
    UnknownDistanceMeasure(String),
}
