//! In-process BSP runtime: every peer runs as a tokio task in one process.
//!
//! Mailboxes are keyed by the superstep stamped into each envelope, so a
//! peer that races ahead after a barrier release cannot leak messages into
//! a slower peer's current drain.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Barrier, Mutex};

use crate::error::BspError;
use crate::message::{Message, PeerId};
use crate::traits::PeerNetwork;

type Mailbox = Mutex<BTreeMap<u64, VecDeque<Message>>>;

struct Shared {
    barrier: Barrier,
    mailboxes: Vec<Mailbox>,
}

/// Handle for one peer of an in-process cluster.
pub struct LocalPeer {
    shared: Arc<Shared>,
    id: PeerId,
    superstep: AtomicU64,
}

/// Create an in-process cluster of `peers` peers.
///
/// Every returned handle must participate in every `sync`; dropping one
/// mid-job stalls the rest at the next barrier.
pub fn local_cluster(peers: usize) -> Vec<LocalPeer> {
    let shared = Arc::new(Shared {
        barrier: Barrier::new(peers),
        mailboxes: (0..peers).map(|_| Mutex::new(BTreeMap::new())).collect(),
    });
    (0..peers)
        .map(|i| LocalPeer {
            shared: Arc::clone(&shared),
            id: PeerId(i as u32),
            superstep: AtomicU64::new(0),
        })
        .collect()
}

#[async_trait]
impl PeerNetwork for LocalPeer {
    fn local(&self) -> PeerId {
        self.id
    }

    fn peers(&self) -> Vec<PeerId> {
        (0..self.shared.mailboxes.len() as u32).map(PeerId).collect()
    }

    fn superstep(&self) -> u64 {
        self.superstep.load(Ordering::Acquire)
    }

    async fn send(&self, to: PeerId, message: Message) -> Result<(), BspError> {
        let mailbox = self
            .shared
            .mailboxes
            .get(to.index())
            .ok_or(BspError::UnknownPeer(to))?;

        let mut message = message;
        message.superstep = self.superstep();
        message.from = self.id;

        let mut slots = mailbox.lock().await;
        slots
            .entry(message.superstep)
            .or_default()
            .push_back(message);
        Ok(())
    }

    async fn recv_next(&self) -> Result<Option<Message>, BspError> {
        let current = self.superstep();
        if current == 0 {
            // Nothing can be deliverable before the first barrier.
            return Ok(None);
        }
        let closed = current - 1;

        let mut slots = self.shared.mailboxes[self.id.index()].lock().await;
        let Some(queue) = slots.get_mut(&closed) else {
            return Ok(None);
        };
        let message = queue.pop_front();
        if queue.is_empty() {
            slots.remove(&closed);
        }
        Ok(message)
    }

    async fn sync(&self) -> Result<(), BspError> {
        self.shared.barrier.wait().await;
        self.superstep.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
