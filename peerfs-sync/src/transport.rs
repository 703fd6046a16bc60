//! Peer transport contract.
//!
//! The transport only moves signed envelopes between peers; verification
//! and dispatch happen in the [`Messenger`](crate::Messenger).

use crate::envelope::SignedEnvelope;
use crate::error::SyncResult;
use crate::messages::PeerMessage;
use async_trait::async_trait;
use peerfs_types::PeerId;

/// An envelope received from the network.
#[derive(Debug, Clone)]
pub struct IncomingEnvelope {
    /// The peer the transport received it from.
    pub from: PeerId,
    pub envelope: SignedEnvelope<PeerMessage>,
}

/// Moves envelopes between peers.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// This peer's ID.
    fn local_peer_id(&self) -> PeerId;

    /// Sends an envelope to a peer.
    async fn send(&self, to: PeerId, envelope: SignedEnvelope<PeerMessage>) -> SyncResult<()>;

    /// Waits for the next incoming envelope. `None` once the transport
    /// has shut down.
    async fn recv(&self) -> Option<IncomingEnvelope>;
}

/// An in-process network for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, PoisonError};
    use tokio::sync::mpsc;

    type Hub = HashMap<PeerId, mpsc::UnboundedSender<(PeerId, Vec<u8>)>>;

    /// Routes envelopes between joined peers. Envelopes cross the hub as
    /// JSON, the way they would cross a real wire.
    #[derive(Clone, Default)]
    pub struct MemoryNetwork {
        peers: Arc<Mutex<Hub>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Self {
            Self::default()
        }

        /// Attaches a peer and returns its transport.
        pub fn join(&self, peer_id: PeerId) -> MemoryTransport {
            let (tx, rx) = mpsc::unbounded_channel();
            self.hub().insert(peer_id, tx);
            MemoryTransport {
                peer_id,
                network: self.clone(),
                inbox: tokio::sync::Mutex::new(rx),
            }
        }

        /// Detaches a peer; its transport's `recv` then yields `None`.
        pub fn leave(&self, peer_id: &PeerId) {
            self.hub().remove(peer_id);
        }

        /// Number of joined peers.
        pub fn peer_count(&self) -> usize {
            self.hub().len()
        }

        fn hub(&self) -> std::sync::MutexGuard<'_, Hub> {
            self.peers.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// One peer's end of a [`MemoryNetwork`].
    pub struct MemoryTransport {
        peer_id: PeerId,
        network: MemoryNetwork,
        inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<(PeerId, Vec<u8>)>>,
    }

    #[async_trait]
    impl PeerTransport for MemoryTransport {
        fn local_peer_id(&self) -> PeerId {
            self.peer_id
        }

        async fn send(&self, to: PeerId, envelope: SignedEnvelope<PeerMessage>) -> SyncResult<()> {
            let bytes = serde_json::to_vec(&envelope)?;
            let sender = self
                .network
                .hub()
                .get(&to)
                .cloned()
                .ok_or_else(|| SyncError::PeerNotFound(to.to_string()))?;
            sender
                .send((self.peer_id, bytes))
                .map_err(|_| SyncError::PeerNotFound(to.to_string()))
        }

        async fn recv(&self) -> Option<IncomingEnvelope> {
            let mut inbox = self.inbox.lock().await;
            loop {
                let (from, bytes) = inbox.recv().await?;
                match serde_json::from_slice(&bytes) {
                    Ok(envelope) => return Some(IncomingEnvelope { from, envelope }),
                    Err(e) => tracing::warn!("Dropping undecodable envelope from {}: {}", from, e),
                }
            }
        }
    }
}
