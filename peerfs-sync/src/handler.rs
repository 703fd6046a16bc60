//! Handler for messages addressed to a logged-in device.

use crate::dispatch::MessageHandler;
use crate::error::SyncError;
use crate::messages::{MessageBody, PeerMessage, ERROR_NO_SESSION};
use crate::session::SessionHandle;
use async_trait::async_trait;
use peerfs_types::PeerId;
use tracing::{debug, info, warn, Span};

/// Answers contact requests and applies profile-change notifications to
/// the active session. A device without a session refuses contact with
/// [`ERROR_NO_SESSION`].
pub struct SessionMessageHandler {
    sessions: SessionHandle,
    span: Span,
}

impl SessionMessageHandler {
    pub fn new(sessions: SessionHandle) -> Self {
        Self {
            sessions,
            span: Span::current(),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

#[async_trait]
impl MessageHandler for SessionMessageHandler {
    async fn handle(&self, from: PeerId, message: &PeerMessage) -> Option<MessageBody> {
        match &message.body {
            MessageBody::ContactPeer { evidence } => {
                if !self.sessions.is_active() {
                    debug!(parent: &self.span, "Refusing contact from {} without a session", from);
                    return Some(MessageBody::Error {
                        code: ERROR_NO_SESSION,
                        message: SyncError::NoActiveSession.to_string(),
                    });
                }
                debug!(parent: &self.span, "Contacted by {}", from);
                Some(MessageBody::ContactPeerAck {
                    evidence: evidence.clone(),
                })
            }
            MessageBody::ProfileChanged { user_id, version } => {
                let Ok(session) = self.sessions.current() else {
                    debug!(parent: &self.span, "Ignoring profile change without a session");
                    return None;
                };
                if session.user_id() != user_id {
                    warn!(
                        parent: &self.span,
                        "Ignoring profile change for {} from {}",
                        user_id,
                        from
                    );
                    return None;
                }
                info!(parent: &self.span, "Profile changed to version {} on {}", version, from);
                session.profile().invalidate_below(*version).await;
                None
            }
            MessageBody::ContactPeerAck { .. } | MessageBody::Error { .. } => {
                debug!(
                    parent: &self.span,
                    "Ignoring unsolicited {} from {}",
                    message.body.kind(),
                    from
                );
                None
            }
        }
    }
}
