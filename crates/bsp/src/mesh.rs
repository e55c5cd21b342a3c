//! Distributed BSP runtime over ZeroMQ.
//!
//! Data plane: every peer binds one PULL socket (its inbox) and holds one
//! connected PUSH socket per peer, its own included via loopback. Control
//! plane: barrier entry and release through the conductor.
//!
//! Drain termination works without timeouts. `sync` pushes an `EndOfStep`
//! marker for the closing superstep down every PUSH connection before
//! entering the barrier. PUSH/PULL preserves per-connection ordering, so
//! once the inbox has counted markers from all n peers for superstep s,
//! no more data for s can arrive and `recv_next` may yield `None`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use zeromq::{PullSocket, PushSocket, Socket, SocketRecv, SocketSend};

use crate::conductor::BarrierClient;
use crate::config::ClusterConfig;
use crate::error::BspError;
use crate::message::{Message, Packet, PeerId};
use crate::traits::PeerNetwork;
use crate::transport::connect_with_retry;

/// Inbox state behind one lock: the PULL socket plus everything received
/// ahead of its drain.
///
/// `stash` files data envelopes under the superstep stamped into them;
/// `markers` counts `EndOfStep` packets per superstep. Keying both by
/// superstep keeps a fast sender's next-superstep traffic out of the
/// current drain.
struct Inbox {
    pull: PullSocket,
    stash: BTreeMap<u64, VecDeque<Message>>,
    markers: BTreeMap<u64, usize>,
}

/// ZeroMQ-backed peer fabric for one member of a distributed cluster.
pub struct ZmqMesh {
    local: PeerId,
    peers: Vec<PeerId>,
    superstep: AtomicU64,
    inbox: Mutex<Inbox>,
    /// PUSH sockets to every peer's inbox, indexed by peer position.
    outbox: Vec<Mutex<PushSocket>>,
    barrier: BarrierClient,
}

impl ZmqMesh {
    /// Join the cluster as `local`: bind the own inbox, connect to the
    /// conductor, and connect a PUSH socket to every peer's inbox.
    ///
    /// Peers start concurrently; connects retry while the remote inboxes
    /// and the conductor come up.
    #[instrument(skip_all, fields(peer = %local))]
    pub async fn join(cluster: &ClusterConfig, local: PeerId) -> Result<Self, BspError> {
        cluster.validate()?;

        let inbox_transport = cluster.peer_transport(local)?;
        inbox_transport.ensure_ipc_dir()?;
        inbox_transport.remove_stale_socket()?;
        let mut pull = PullSocket::new();
        pull.bind(&inbox_transport.endpoint()).await?;
        info!(endpoint = %inbox_transport, "inbox (PULL) bound");

        let barrier = BarrierClient::connect(&cluster.conductor_transport()?, local).await?;

        let mut outbox = Vec::with_capacity(cluster.peer_count());
        for id in cluster.peer_ids() {
            let transport = cluster.peer_transport(id)?;
            let mut push = PushSocket::new();
            connect_with_retry(&mut push, &transport.endpoint()).await?;
            debug!(to = %id, endpoint = %transport, "outbox (PUSH) connected");
            outbox.push(Mutex::new(push));
        }

        info!(peers = outbox.len(), "joined mesh");
        Ok(Self {
            local,
            peers: cluster.peer_ids(),
            superstep: AtomicU64::new(0),
            inbox: Mutex::new(Inbox {
                pull,
                stash: BTreeMap::new(),
                markers: BTreeMap::new(),
            }),
            outbox,
            barrier,
        })
    }

    async fn push_packet(&self, to: PeerId, packet: &Packet) -> Result<(), BspError> {
        let socket = self
            .outbox
            .get(to.index())
            .ok_or(BspError::UnknownPeer(to))?;
        let bytes = packet.to_bytes()?;
        socket.lock().await.send(bytes.into()).await?;
        Ok(())
    }

    /// Graceful teardown: one more barrier round before the sockets drop,
    /// so no peer disconnects while another is still draining the final
    /// superstep. Every peer of a finished job must call this.
    pub async fn leave(&self) -> Result<(), BspError> {
        self.sync().await?;
        info!(peer = %self.local, superstep = self.superstep(), "left mesh");
        Ok(())
    }
}

#[async_trait]
impl PeerNetwork for ZmqMesh {
    fn local(&self) -> PeerId {
        self.local
    }

    fn peers(&self) -> Vec<PeerId> {
        self.peers.clone()
    }

    fn superstep(&self) -> u64 {
        self.superstep.load(Ordering::Acquire)
    }

    async fn send(&self, to: PeerId, message: Message) -> Result<(), BspError> {
        let mut message = message;
        message.superstep = self.superstep();
        message.from = self.local;
        self.push_packet(to, &Packet::Data(message)).await
    }

    async fn recv_next(&self) -> Result<Option<Message>, BspError> {
        let current = self.superstep();
        if current == 0 {
            // Nothing can be deliverable before the first barrier.
            return Ok(None);
        }
        let closed = current - 1;
        let expected = self.peers.len();

        let mut inbox = self.inbox.lock().await;
        loop {
            if let Some(queue) = inbox.stash.get_mut(&closed) {
                if let Some(message) = queue.pop_front() {
                    return Ok(Some(message));
                }
            }
            if inbox.markers.get(&closed).copied().unwrap_or(0) >= expected {
                // Stash drained and every marker counted. Keep this
                // superstep's count so repeated calls stay `None`; drop
                // anything older.
                inbox.stash.retain(|&s, _| s >= closed);
                inbox.markers.retain(|&s, _| s >= closed);
                return Ok(None);
            }

            // Markers still outstanding: block on the wire. Whatever
            // arrives is filed under its own superstep.
            let zmq_msg = inbox.pull.recv().await?;
            let Some(frame) = zmq_msg.get(0) else {
                warn!("empty frame on inbox");
                continue;
            };
            match Packet::from_bytes(frame.as_ref())? {
                Packet::Data(message) => {
                    inbox
                        .stash
                        .entry(message.superstep)
                        .or_default()
                        .push_back(message);
                }
                Packet::EndOfStep { superstep, from } => {
                    let count = inbox.markers.entry(superstep).or_default();
                    *count += 1;
                    debug!(superstep, %from, markers = *count, expected, "end-of-step");
                }
            }
        }
    }

    async fn sync(&self) -> Result<(), BspError> {
        let superstep = self.superstep();
        // Marker first, barrier second: FIFO per connection means the
        // marker seals this superstep's data on every destination.
        for id in &self.peers {
            self.push_packet(
                *id,
                &Packet::EndOfStep {
                    superstep,
                    from: self.local,
                },
            )
            .await?;
        }
        self.barrier.enter(superstep).await?;
        self.superstep.fetch_add(1, Ordering::AcqRel);
        debug!(peer = %self.local, superstep = superstep + 1, "superstep advanced");
        Ok(())
    }
}
