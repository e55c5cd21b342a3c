use thiserror::Error;

/// Errors produced by the clustering job.
#[derive(Debug, Error)]
pub enum KMeansError {
    /// Fatal setup error: a job cannot start without seed centers.
    #[error("no seed centers configured")]
    NoCenters,

    /// A partial sum arrived tagged with a center slot that does not exist.
    #[error("message tag {tag} out of range for {centers} centers")]
    InvalidTag { tag: u32, centers: usize },

    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    Core(#[from] lockstep_core::CoreError),

    #[error(transparent)]
    Bsp(#[from] lockstep_bsp::BspError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}
