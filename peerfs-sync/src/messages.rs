//! Peer-to-peer message types.
//!
//! Every message travels inside a [`SignedEnvelope`](crate::SignedEnvelope).
//! Requests carry a fresh [`MessageId`]; responses name the request they
//! answer in `in_reply_to` and are routed to the waiting sender instead of
//! the handler.

use peerfs_types::{MessageId, PeerId};
use serde::{Deserialize, Serialize};

/// Error code sent when the receiver has no active session.
pub const ERROR_NO_SESSION: u32 = 1;

/// A message between peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub id: MessageId,
    pub sender: PeerId,
    #[serde(default)]
    pub in_reply_to: Option<MessageId>,
    pub body: MessageBody,
}

impl PeerMessage {
    /// Creates a new request or notification.
    pub fn new(sender: PeerId, body: MessageBody) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            in_reply_to: None,
            body,
        }
    }

    /// Creates the response to `request`.
    pub fn reply(sender: PeerId, request: &PeerMessage, body: MessageBody) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            in_reply_to: Some(request.id),
            body,
        }
    }

    pub fn is_response(&self) -> bool {
        self.in_reply_to.is_some()
    }
}

/// Message payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Asks a peer to prove it is reachable by echoing `evidence`.
    ContactPeer { evidence: String },

    /// Response to [`MessageBody::ContactPeer`].
    ContactPeerAck { evidence: String },

    /// Announces a profile commit to the user's other devices.
    ProfileChanged { user_id: String, version: u64 },

    /// Request rejected by the receiver.
    Error { code: u32, message: String },
}

impl MessageBody {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ContactPeer { .. } => "contact-peer",
            Self::ContactPeerAck { .. } => "contact-peer-ack",
            Self::ProfileChanged { .. } => "profile-changed",
            Self::Error { .. } => "error",
        }
    }
}
