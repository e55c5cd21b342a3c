//! Barrier coordination for lockstep supersteps.
//!
//! One conductor process serves a whole cluster. Peers announce barrier
//! entry over DEALER sockets; the conductor's ROUTER collects their
//! identity frames until every configured peer has entered the same
//! superstep, then routes a release back to each of them. The conductor
//! keeps no state across rounds, so one process can outlive any number
//! of jobs.
//!
//! ## Framing (zeromq-rs 0.4)
//!
//! zeromq-rs ROUTER pushes the peer identity as first frame on recv and
//! pops it on send. DEALER sends/receives raw application frames. So:
//! - DEALER sends: `[control]`
//! - ROUTER receives: `[identity, control]`
//! - ROUTER sends: `[identity, control]`
//! - DEALER receives: `[control]`

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use zeromq::prelude::*;
use zeromq::{DealerSocket, RouterSocket, ZmqMessage};

use crate::config::ClusterConfig;
use crate::error::BspError;
use crate::message::PeerId;
use crate::transport::{connect_with_retry, Transport};

/// Control-plane packet exchanged between peers and the conductor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlPacket {
    /// A peer has reached the barrier ending `superstep`.
    BarrierEnter { superstep: u64, peer: PeerId },
    /// All peers entered; the superstep is closed.
    BarrierRelease { superstep: u64 },
}

impl ControlPacket {
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Configuration for the barrier conductor.
#[derive(Debug, Clone)]
pub struct ConductorConfig {
    /// Endpoint where the ROUTER socket binds.
    pub endpoint: Transport,
    /// Number of peers that must enter a barrier before it releases.
    pub peers: usize,
}

impl ConductorConfig {
    /// Derive the conductor configuration from a cluster topology.
    pub fn from_cluster(cluster: &ClusterConfig) -> Result<Self, BspError> {
        Ok(Self {
            endpoint: cluster.conductor_transport()?,
            peers: cluster.peer_count(),
        })
    }
}

/// Barrier coordinator owning the cluster's ROUTER socket.
///
/// Waiting peers are tracked per superstep, so a fast peer entering the
/// next barrier before a slow peer's release has been processed cannot
/// be miscounted into the earlier round.
pub struct Conductor {
    config: ConductorConfig,
    shutdown: AtomicBool,
    rounds: AtomicU64,
}

impl Conductor {
    pub fn new(config: ConductorConfig) -> Self {
        Self {
            config,
            shutdown: AtomicBool::new(false),
            rounds: AtomicU64::new(0),
        }
    }

    /// Signal the conductor loop to stop at the next poll.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Number of barriers released since startup.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Run the barrier loop until shutdown is signaled.
    pub async fn run(&self) -> Result<(), BspError> {
        self.config.endpoint.ensure_ipc_dir()?;
        self.config.endpoint.remove_stale_socket()?;

        let mut socket = RouterSocket::new();
        socket.bind(&self.config.endpoint.endpoint()).await?;

        tracing::info!(
            endpoint = %self.config.endpoint,
            peers = self.config.peers,
            "conductor listening"
        );

        // Identity frames of peers waiting at a barrier, keyed by superstep.
        let mut waiting: BTreeMap<u64, HashMap<u32, Vec<u8>>> = BTreeMap::new();

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                tracing::info!(rounds = self.rounds(), "conductor shutting down");
                break;
            }

            // Use a timeout so we periodically check the shutdown flag.
            let recv_result =
                tokio::time::timeout(std::time::Duration::from_millis(100), socket.recv()).await;

            let zmq_msg = match recv_result {
                Ok(Ok(msg)) => msg,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "barrier recv error");
                    continue;
                }
                Err(_) => {
                    // Timeout — loop back to check shutdown flag.
                    continue;
                }
            };

            // ROUTER recv frames: [identity, control]
            let frames: Vec<_> = zmq_msg.iter().collect();
            if frames.len() < 2 {
                tracing::warn!(frame_count = frames.len(), "short control message");
                continue;
            }
            let identity = frames[0].as_ref().to_vec();
            let packet = match ControlPacket::from_bytes(frames[1].as_ref()) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed control packet");
                    continue;
                }
            };

            match packet {
                ControlPacket::BarrierEnter { superstep, peer } => {
                    let entered = waiting.entry(superstep).or_default();
                    // A reconnecting peer replaces its stale identity.
                    entered.insert(peer.0, identity);
                    tracing::debug!(
                        superstep,
                        %peer,
                        entered = entered.len(),
                        expected = self.config.peers,
                        "barrier enter"
                    );
                    if entered.len() >= self.config.peers {
                        let entered = waiting.remove(&superstep).unwrap_or_default();
                        self.release(&mut socket, superstep, entered).await;
                    }
                }
                ControlPacket::BarrierRelease { superstep } => {
                    tracing::warn!(superstep, "unexpected release packet from a peer");
                }
            }
        }

        Ok(())
    }

    /// Route `BarrierRelease` back to every waiting identity.
    async fn release(
        &self,
        socket: &mut RouterSocket,
        superstep: u64,
        entered: HashMap<u32, Vec<u8>>,
    ) {
        let payload = match (ControlPacket::BarrierRelease { superstep }).to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode barrier release");
                return;
            }
        };
        // Count the round before replying: a peer may observe its release
        // and query the round total immediately after.
        let round = self.rounds.fetch_add(1, Ordering::Relaxed) + 1;
        for (peer, identity) in entered {
            let mut zmq_msg = ZmqMessage::from(identity);
            zmq_msg.push_back(payload.clone().into());
            if let Err(e) = socket.send(zmq_msg).await {
                tracing::warn!(superstep, peer, error = %e, "release send failed");
            }
        }
        tracing::info!(superstep, round, "barrier released");
    }
}

/// Peer-side handle to the conductor's barrier.
pub struct BarrierClient {
    socket: Mutex<DealerSocket>,
    peer: PeerId,
}

impl BarrierClient {
    /// Connect a DEALER socket to the conductor endpoint.
    pub async fn connect(transport: &Transport, peer: PeerId) -> Result<Self, BspError> {
        let mut socket = DealerSocket::new();
        connect_with_retry(&mut socket, &transport.endpoint()).await?;
        tracing::debug!(%peer, endpoint = %transport, "connected to conductor");
        Ok(Self {
            socket: Mutex::new(socket),
            peer,
        })
    }

    /// Enter the barrier ending `superstep`; resolves once every peer entered.
    pub async fn enter(&self, superstep: u64) -> Result<(), BspError> {
        let request = ControlPacket::BarrierEnter {
            superstep,
            peer: self.peer,
        };
        let mut socket = self.socket.lock().await;
        socket.send(request.to_bytes()?.into()).await?;
        tracing::debug!(peer = %self.peer, superstep, "entered barrier");

        loop {
            let zmq_msg = socket.recv().await?;
            // DEALER recv frames: [control], possibly behind empty
            // delimiter frames depending on the router's reply framing.
            let Some(frame) = zmq_msg.iter().find(|f| !f.as_ref().is_empty()) else {
                tracing::warn!("empty reply from conductor");
                continue;
            };
            match ControlPacket::from_bytes(frame.as_ref())? {
                ControlPacket::BarrierRelease { superstep: released }
                    if released == superstep =>
                {
                    return Ok(());
                }
                ControlPacket::BarrierRelease { superstep: released } => {
                    tracing::warn!(
                        waiting_for = superstep,
                        released,
                        "ignoring release for a different superstep"
                    );
                }
                ControlPacket::BarrierEnter { .. } => {
                    return Err(BspError::Barrier(
                        "conductor sent a barrier-enter packet".into(),
                    ));
                }
            }
        }
    }
}
