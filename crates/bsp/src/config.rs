use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use lockstep_core::env_opt;

use crate::error::BspError;
use crate::message::PeerId;
use crate::transport::Transport;

/// Cluster topology: the conductor's barrier endpoint plus the ordered list
/// of peer inbox endpoints.
///
/// The peer list order is the peer directory: peer i binds `peers[i]`. Every
/// process in a job must load an identical list, since center tags and shard
/// assignment both key off the position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Endpoint where the conductor binds its ROUTER socket.
    #[serde(default = "default_conductor")]
    pub conductor: String,

    /// Ordered peer inbox endpoints (PULL sockets). Position = peer id.
    #[serde(default)]
    pub peers: Vec<String>,
}

fn default_conductor() -> String {
    "ipc:///tmp/lockstep/conductor.sock".into()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            conductor: default_conductor(),
            peers: Vec::new(),
        }
    }
}

impl ClusterConfig {
    /// Parse from a TOML string, apply `LOCKSTEP_*` overrides, validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, BspError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BspError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// IPC preset for single-host clusters of `peers` peers.
    pub fn local(peers: usize) -> Self {
        Self {
            conductor: default_conductor(),
            peers: (0..peers)
                .map(|i| format!("ipc:///tmp/lockstep/peer-{i}.sock"))
                .collect(),
        }
    }

    /// TCP preset: conductor on `base_port`, peer i on `base_port + 1 + i`.
    pub fn distributed(host: &str, base_port: u16, peers: usize) -> Self {
        Self {
            conductor: format!("tcp://{host}:{base_port}"),
            peers: (0..peers as u16)
                .map(|i| format!("tcp://{host}:{}", base_port + 1 + i))
                .collect(),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// The full peer directory, in configured order.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        (0..self.peers.len() as u32).map(PeerId).collect()
    }

    pub fn conductor_transport(&self) -> Result<Transport, BspError> {
        Transport::parse(&self.conductor)
    }

    pub fn peer_transport(&self, peer: PeerId) -> Result<Transport, BspError> {
        let endpoint = self
            .peers
            .get(peer.index())
            .ok_or(BspError::UnknownPeer(peer))?;
        Transport::parse(endpoint)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides. Empty values count as unset.
    ///
    /// - `LOCKSTEP_CONDUCTOR` → `conductor`
    /// - `LOCKSTEP_PEERS` → `peers` (comma-separated endpoints)
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_opt("LOCKSTEP_CONDUCTOR") {
            self.conductor = v;
        }
        if let Some(v) = env_opt("LOCKSTEP_PEERS") {
            self.peers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
    }

    // ── Validation ──────────────────────────────────────────────────

    /// Validate the topology: at least one peer, no duplicate endpoints,
    /// every endpoint parseable.
    pub fn validate(&self) -> Result<(), BspError> {
        if self.peers.is_empty() {
            return Err(BspError::Config(
                "cluster must define at least one peer endpoint".into(),
            ));
        }
        let mut seen = HashSet::new();
        for endpoint in self.peers.iter().chain(std::iter::once(&self.conductor)) {
            if !seen.insert(endpoint.as_str()) {
                return Err(BspError::Config(format!(
                    "duplicate endpoint '{endpoint}' in cluster config"
                )));
            }
        }
        Transport::parse(&self.conductor)?;
        for endpoint in &self.peers {
            Transport::parse(endpoint)?;
        }
        Ok(())
    }
}
