use thiserror::Error;

use crate::message::PeerId;

/// Errors that can occur in the lockstep BSP fabric.
#[derive(Debug, Error)]
pub enum BspError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(PeerId),

    #[error("barrier error: {0}")]
    Barrier(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
