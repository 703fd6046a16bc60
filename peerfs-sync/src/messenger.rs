//! Signed peer messaging.
//!
//! Outgoing messages are signed with the local key pair. Incoming
//! envelopes are verified against the sender's registered key before
//! anything else looks at them; unverifiable envelopes are logged and
//! dropped. Responses complete the matching pending request, everything
//! else goes to the [`MessageDispatcher`].

use crate::config::SyncConfig;
use crate::dispatch::{MessageDispatcher, MessageHandler, Responder};
use crate::envelope::SignedEnvelope;
use crate::error::{SyncError, SyncResult};
use crate::messages::{MessageBody, PeerMessage};
use crate::retry::bounded;
use crate::transport::{IncomingEnvelope, PeerTransport};
use async_trait::async_trait;
use peerfs_crypto::{CryptoProvider, KeyPair, VerifyingKey};
use peerfs_types::{MessageId, PeerId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument, Span};

/// Verifying keys of known peers.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    keys: RwLock<HashMap<PeerId, VerifyingKey>>,
}

impl PeerDirectory {
    pub fn insert(&self, peer: PeerId, key: VerifyingKey) {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, key);
    }

    pub fn remove(&self, peer: &PeerId) -> Option<VerifyingKey> {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<VerifyingKey> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .copied()
    }

    /// Known peers, in no particular order.
    pub fn peers(&self) -> Vec<PeerId> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }
}

type Pending = HashMap<MessageId, oneshot::Sender<PeerMessage>>;

struct Inner {
    transport: Arc<dyn PeerTransport>,
    crypto: Arc<dyn CryptoProvider>,
    keys: KeyPair,
    directory: PeerDirectory,
    pending: Mutex<Pending>,
    config: SyncConfig,
    span: Span,
}

struct Running {
    stop: oneshot::Sender<()>,
    receiver: JoinHandle<()>,
}

/// Sends and receives signed peer messages.
pub struct Messenger {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
}

impl Messenger {
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        crypto: Arc<dyn CryptoProvider>,
        keys: KeyPair,
        config: SyncConfig,
    ) -> Self {
        let span = info_span!("messenger", peer = %transport.local_peer_id());
        Self {
            inner: Arc::new(Inner {
                transport,
                crypto,
                keys,
                directory: PeerDirectory::default(),
                pending: Mutex::new(HashMap::new()),
                config,
                span,
            }),
            running: Mutex::new(None),
        }
    }

    /// Replaces the logging span. Must be called before [`start`](Self::start).
    pub fn with_span(mut self, span: Span) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.span = span;
        }
        self
    }

    pub fn peer_id(&self) -> PeerId {
        self.inner.transport.local_peer_id()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.inner.keys.verifying_key
    }

    /// Registers the key a peer signs with. Envelopes from unregistered
    /// peers are dropped.
    pub fn add_peer(&self, peer: PeerId, key: VerifyingKey) {
        self.inner.directory.insert(peer, key);
    }

    pub fn remove_peer(&self, peer: &PeerId) {
        self.inner.directory.remove(peer);
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.inner.directory.peers()
    }

    pub fn is_running(&self) -> bool {
        self.running_slot().is_some()
    }

    /// Starts receiving. Verified requests and notifications are passed to
    /// `handler` on the dispatcher's worker pool.
    pub fn start(&self, handler: Arc<dyn MessageHandler>) -> SyncResult<()> {
        let mut running = self.running_slot();
        if running.is_some() {
            return Err(SyncError::Protocol("messenger already started".into()));
        }

        let inner = self.inner.clone();
        let dispatcher = MessageDispatcher::spawn(
            inner.config.message_workers,
            inner.config.message_queue_capacity,
            handler,
            inner.clone(),
            inner.span.clone(),
        );
        let (stop, mut stopped) = oneshot::channel();
        let span = inner.span.clone();
        let receiver = tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = &mut stopped => break,
                        incoming = inner.transport.recv() => match incoming {
                            Some(incoming) => inner.accept(incoming, &dispatcher),
                            None => break,
                        },
                    }
                }
                dispatcher.shutdown().await;
                debug!("Receive loop stopped");
            }
            .instrument(span),
        );

        info!(parent: &self.inner.span, "Messenger started");
        *running = Some(Running { stop, receiver });
        Ok(())
    }

    /// Stops receiving and waits for in-flight handlers. Pending requests
    /// fail with [`SyncError::ChannelClosed`].
    pub async fn shutdown(&self) {
        let running = self.running_slot().take();
        if let Some(Running { stop, receiver }) = running {
            let _ = stop.send(());
            if let Err(e) = receiver.await {
                warn!(parent: &self.inner.span, "Receive loop ended abnormally: {}", e);
            }
        }
        self.inner.pending().clear();
        info!(parent: &self.inner.span, "Messenger stopped");
    }

    /// Signs and sends a one-way message.
    pub async fn send(&self, to: PeerId, body: MessageBody) -> SyncResult<MessageId> {
        let message = PeerMessage::new(self.peer_id(), body);
        let id = message.id;
        self.inner.send_message(to, message).await?;
        Ok(id)
    }

    /// Sends a request and waits for its response within the configured
    /// request timeout. Requests are not retried.
    pub async fn request(&self, to: PeerId, body: MessageBody) -> SyncResult<PeerMessage> {
        let message = PeerMessage::new(self.peer_id(), body);
        let id = message.id;
        let (tx, rx) = oneshot::channel();
        self.inner.pending().insert(id, tx);

        let result = async {
            self.inner.send_message(to, message).await?;
            bounded(self.inner.config.request_timeout(), async {
                rx.await.map_err(|_| SyncError::ChannelClosed)
            })
            .await
        }
        .await;

        if result.is_err() {
            self.inner.pending().remove(&id);
        }
        let response = result?;
        match &response.body {
            MessageBody::Error { code, message } => Err(SyncError::Protocol(format!(
                "peer {} rejected request ({}): {}",
                to, code, message
            ))),
            _ => Ok(response),
        }
    }

    /// Sends `ContactPeer` and checks the echoed evidence.
    pub async fn contact(&self, to: PeerId, evidence: &str) -> SyncResult<()> {
        let response = self
            .request(
                to,
                MessageBody::ContactPeer {
                    evidence: evidence.to_string(),
                },
            )
            .await?;
        match response.body {
            MessageBody::ContactPeerAck { evidence: echoed } if echoed == evidence => Ok(()),
            other => Err(SyncError::Protocol(format!(
                "unexpected {} in reply to contact-peer",
                other.kind()
            ))),
        }
    }

    fn running_slot(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn send_message(&self, to: PeerId, message: PeerMessage) -> SyncResult<()> {
        let kind = message.body.kind();
        let envelope = SignedEnvelope::signed(message, self.crypto.as_ref(), &self.keys)?;
        bounded(self.config.request_timeout(), self.transport.send(to, envelope)).await?;
        debug!(parent: &self.span, "Sent {} to {}", kind, to);
        Ok(())
    }

    fn accept(&self, incoming: IncomingEnvelope, dispatcher: &MessageDispatcher) {
        let IncomingEnvelope { from, envelope } = incoming;
        let Some(key) = self.directory.get(&from) else {
            warn!(parent: &self.span, "Dropping message from unknown peer {}", from);
            return;
        };
        if !envelope.verify(self.crypto.as_ref(), &key) {
            warn!(
                parent: &self.span,
                "{}",
                SyncError::VerificationFailed(format!("message from {} discarded", from))
            );
            return;
        }

        let message = envelope.into_payload();
        if message.sender != from {
            warn!(
                parent: &self.span,
                "Dropping message from {} claiming to be {}",
                from,
                message.sender
            );
            return;
        }

        match message.in_reply_to {
            Some(request) => match self.pending().remove(&request) {
                Some(waiter) => {
                    let _ = waiter.send(message);
                }
                None => debug!(parent: &self.span, "Dropping late response from {}", from),
            },
            None => {
                dispatcher.submit(from, message);
            }
        }
    }
}

#[async_trait]
impl Responder for Inner {
    async fn respond(&self, to: PeerId, request: &PeerMessage, body: MessageBody) {
        let reply = PeerMessage::reply(self.transport.local_peer_id(), request, body);
        if let Err(e) = self.send_message(to, reply).await {
            warn!(parent: &self.span, "Failed to answer {} from {}: {}", request.body.kind(), to, e);
        }
    }
}
