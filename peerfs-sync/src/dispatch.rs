//! Bounded worker pool for verified incoming messages.
//!
//! The receive path only enqueues; a fixed set of workers executes each
//! queued message exactly once. A full queue drops the message with a
//! warning instead of stalling intake; redelivery is up to the sender.

use crate::messages::{MessageBody, PeerMessage};
use async_trait::async_trait;
use peerfs_types::PeerId;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument, Span};

/// Executes incoming requests and notifications.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one verified message. A returned body is sent back to the
    /// sender as the response.
    async fn handle(&self, from: PeerId, message: &PeerMessage) -> Option<MessageBody>;
}

/// Sends a handler's response back to the requester.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, to: PeerId, request: &PeerMessage, body: MessageBody);
}

struct Job {
    from: PeerId,
    message: PeerMessage,
}

/// Queue plus worker pool.
pub struct MessageDispatcher {
    queue: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    span: Span,
}

impl MessageDispatcher {
    /// Starts `workers` workers draining a queue of `capacity` messages.
    pub fn spawn(
        workers: usize,
        capacity: usize,
        handler: Arc<dyn MessageHandler>,
        responder: Arc<dyn Responder>,
        span: Span,
    ) -> Self {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let handler = handler.clone();
                let responder = responder.clone();
                tokio::spawn(
                    async move {
                        loop {
                            let job = rx.lock().await.recv().await;
                            let Some(Job { from, message }) = job else {
                                break;
                            };
                            debug!("Worker {} handling {} from {}", worker, message.body.kind(), from);
                            if let Some(body) = handler.handle(from, &message).await {
                                responder.respond(from, &message, body).await;
                            }
                        }
                    }
                    .instrument(span.clone()),
                )
            })
            .collect();

        Self {
            queue,
            workers,
            span,
        }
    }

    /// Enqueues a message. Returns `false` if it was dropped.
    pub fn submit(&self, from: PeerId, message: PeerMessage) -> bool {
        match self.queue.try_send(Job { from, message }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(
                    parent: &self.span,
                    "Message queue full, dropping {} from {}",
                    job.message.body.kind(),
                    job.from
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(parent: &self.span, "Message queue closed");
                false
            }
        }
    }

    /// Closes the queue and waits for queued messages to finish.
    pub async fn shutdown(self) {
        let Self { queue, workers, span } = self;
        drop(queue);
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(parent: &span, "Message worker ended abnormally: {}", e);
            }
        }
    }
}
