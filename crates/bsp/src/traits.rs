use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BspError;
use crate::message::{Message, PeerId};

/// The superstep fabric a peer computes against: global barrier, tagged
/// mailbox messaging, and the peer directory.
///
/// Delivery contract: a message sent during superstep `s` becomes visible
/// to the destination's `recv_next` only after the barrier that ends `s`,
/// and is never returned while draining any other superstep.
#[async_trait]
pub trait PeerNetwork: Send + Sync {
    /// This peer's own address.
    fn local(&self) -> PeerId;

    /// All peer addresses including self, in identical order on every peer.
    fn peers(&self) -> Vec<PeerId>;

    /// Completed barrier count. 0 before the first `sync`.
    fn superstep(&self) -> u64;

    /// Enqueue a tagged message for delivery after the next barrier
    /// release. Stamps the envelope's `superstep` and `from`.
    async fn send(&self, to: PeerId, message: Message) -> Result<(), BspError>;

    /// Drain one message from the own inbox for the superstep just closed.
    /// Returns `None` when that inbox is empty.
    async fn recv_next(&self) -> Result<Option<Message>, BspError>;

    /// Enter the global barrier; returns once every peer has entered.
    async fn sync(&self) -> Result<(), BspError>;
}

/// Blanket implementation so `Arc<dyn PeerNetwork>` can be used directly.
#[async_trait]
impl<T: PeerNetwork + ?Sized> PeerNetwork for Arc<T> {
    fn local(&self) -> PeerId {
        (**self).local()
    }

    fn peers(&self) -> Vec<PeerId> {
        (**self).peers()
    }

    fn superstep(&self) -> u64 {
        (**self).superstep()
    }

    async fn send(&self, to: PeerId, message: Message) -> Result<(), BspError> {
        (**self).send(to, message).await
    }

    async fn recv_next(&self) -> Result<Option<Message>, BspError> {
        (**self).recv_next().await
    }

    async fn sync(&self) -> Result<(), BspError> {
        (**self).sync().await
    }
}
