pub mod conductor;
pub mod config;
pub mod error;
pub mod local;
pub mod mesh;
pub mod message;
pub mod traits;
pub mod transport;

pub use conductor::{BarrierClient, Conductor, ConductorConfig};
pub use config::ClusterConfig;
pub use error::BspError;
pub use local::{local_cluster, LocalPeer};
pub use mesh::ZmqMesh;
pub use message::{Message, Packet, PeerId};
pub use traits::PeerNetwork;
pub use transport::Transport;
