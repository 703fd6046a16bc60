//! Process-tree file sync over a versioned key-value overlay.
//!
//! A user's file tree lives in the overlay as content records plus one
//! shared profile record describing every entry and its version history.
//! All of the user's devices read and write that profile concurrently.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **ChangeSetEnumerator**: deterministic pre-order listing of a local
//!   directory or a stored profile
//! - **ProcessTreeBuilder**: turns a listing into a tree of operations,
//!   parents before children (reversed by depth for deletion)
//! - **ProcessTree**: executes the tree on a bounded worker pool, cascading
//!   failures into unstarted subtrees and notifying a listener once
//! - **ProfileVersionController**: compare-and-swap reads and writes of the
//!   profile with bounded conflict retries
//! - **SignedEnvelope / Messenger**: signed peer messages, verified before
//!   any handler sees them
//!
//! ## Sync Process
//!
//! 1. **Enumerate**: list the affected paths
//! 2. **Build**: one node per path, skipping paths that cannot be built
//! 3. **Execute**: each node uploads, deletes or downloads its entry and
//!    records the change in the profile
//! 4. **Report**: the listener hears success or the first failure
//!
//! # Example
//!
//! ```
//! use peerfs_sync::store::mock::MemoryOverlay;
//! use peerfs_sync::{SyncConfig, SyncEngine};
//! use peerfs_types::PeerId;
//! use std::sync::Arc;
//!
//! let config = SyncConfig {
//!     device_name: "My Laptop".to_string(),
//!     ..Default::default()
//! };
//!
//! let engine = SyncEngine::new(PeerId::new(), config, Arc::new(MemoryOverlay::new()));
//! assert!(engine.session().is_err());
//! ```

mod config;
mod dispatch;
mod engine;
mod enumerate;
mod envelope;
mod error;
mod executor;
pub mod fs;
mod handler;
pub mod messages;
mod messenger;
mod operation;
pub mod ops;
pub mod profile;
mod retry;
mod session;
pub mod store;
pub mod transport;
mod tree;

pub use config::SyncConfig;
pub use dispatch::{MessageDispatcher, MessageHandler, Responder};
pub use engine::SyncEngine;
pub use enumerate::ChangeSetEnumerator;
pub use envelope::{Seal, SignedEnvelope};
pub use error::{SyncError, SyncResult};
pub use executor::{NoopListener, TreeListener, TreeOutcome, TreeReport};
pub use fs::{LocalFileSystem, StdFileSystem};
pub use handler::SessionMessageHandler;
pub use messages::{MessageBody, PeerMessage};
pub use messenger::{Messenger, PeerDirectory};
pub use operation::{FileAction, Operation, OperationFactory, OperationOutcome};
pub use ops::{FileOperationFactory, OperationContext};
pub use profile::{
    Change, EntryKind, FileVersion, ProfileEntry, ProfileSnapshot, ProfileUpdate,
    ProfileVersionController, VersionAppend,
};
pub use session::{Session, SessionHandle};
pub use store::{OverlayStore, VersionedValue, ABSENT_VERSION};
pub use transport::{IncomingEnvelope, PeerTransport};
pub use tree::{NodeId, NodeStatus, OperationNode, ProcessTree, ProcessTreeBuilder, SkippedPath};
