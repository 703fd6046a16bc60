//! Dependency-ordered process trees.
//!
//! A [`ProcessTree`] is an arena of [`OperationNode`]s addressed by
//! [`NodeId`]. Children are owned by the arena and listed by their parent;
//! the parent link is a plain index used for depth and ancestry queries.
//!
//! Forward trees mirror filesystem containment: a node's children run only
//! after it succeeds. Delete trees are reversed: every original depth
//! becomes one level node whose members run concurrently, chained from the
//! deepest level to the shallowest, so children are removed before their
//! parents with the same execution engine.

use crate::error::SyncError;
use crate::operation::{FileAction, Operation, OperationFactory, OperationOutcome};
use peerfs_types::EntityPath;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn, Span};

/// Index of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The root of every tree.
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// Execution state of a node. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

pub(crate) enum NodeWork {
    Root,
    Operation(Arc<dyn Operation>),
    Level { members: Vec<NodeId> },
}

/// One node of a process tree.
pub struct OperationNode {
    pub(crate) work: NodeWork,
    pub(crate) parent: Option<NodeId>,
    pub(crate) level: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) depth: usize,
    pub(crate) status: NodeStatus,
    pub(crate) outcome: Option<OperationOutcome>,
    pub(crate) error: Option<SyncError>,
}

impl OperationNode {
    fn new(work: NodeWork, parent: Option<NodeId>, depth: usize) -> Self {
        Self {
            work,
            parent,
            level: None,
            children: Vec::new(),
            depth,
            status: NodeStatus::Pending,
            outcome: None,
            error: None,
        }
    }

    /// Back-reference to the parent node. Level members point at their
    /// level.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The level node this node is a member of, in reversed trees.
    pub fn level(&self) -> Option<NodeId> {
        self.level
    }

    /// Nodes started after this one succeeds.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Containment depth of the target (1 for top-level entries). Level
    /// nodes report the depth they group.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn outcome(&self) -> Option<OperationOutcome> {
        self.outcome
    }

    /// Why the node failed, if it did.
    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    /// The operation's target; `None` for the root and level nodes.
    pub fn target(&self) -> Option<&EntityPath> {
        match &self.work {
            NodeWork::Operation(op) => Some(op.target()),
            _ => None,
        }
    }

    pub fn action(&self) -> Option<FileAction> {
        match &self.work {
            NodeWork::Operation(op) => Some(op.action()),
            _ => None,
        }
    }

    pub fn is_operation(&self) -> bool {
        matches!(self.work, NodeWork::Operation(_))
    }

    /// Members of a level node; empty for other nodes.
    pub fn members(&self) -> &[NodeId] {
        match &self.work {
            NodeWork::Level { members } => members,
            _ => &[],
        }
    }

    pub(crate) fn label(&self) -> String {
        match &self.work {
            NodeWork::Root => "root".to_string(),
            NodeWork::Operation(op) => op.target().to_string(),
            NodeWork::Level { .. } => format!("level {}", self.depth),
        }
    }
}

/// A path the builder could not turn into a node.
#[derive(Debug, Clone)]
pub struct SkippedPath {
    pub path: PathBuf,
    /// Always [`SyncError::OperationSkipped`].
    pub error: SyncError,
}

impl SkippedPath {
    fn new(path: PathBuf, reason: SyncError) -> Self {
        let error = SyncError::OperationSkipped {
            path: path.display().to_string(),
            reason: Box::new(reason),
        };
        Self { path, error }
    }

    /// Why construction failed.
    pub fn reason(&self) -> &SyncError {
        match &self.error {
            SyncError::OperationSkipped { reason, .. } => &**reason,
            other => other,
        }
    }
}

/// The executable tree for one invocation.
pub struct ProcessTree {
    pub(crate) nodes: Vec<OperationNode>,
    action: FileAction,
    skipped: Vec<SkippedPath>,
    pub(crate) first_failure: Option<SyncError>,
    pub(crate) span: Span,
}

impl ProcessTree {
    /// An empty tree holding only the root.
    pub fn new(action: FileAction, span: Span) -> Self {
        Self {
            nodes: vec![OperationNode::new(NodeWork::Root, None, 0)],
            action,
            skipped: Vec::new(),
            first_failure: None,
            span,
        }
    }

    pub fn action(&self) -> FileAction {
        self.action
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Looks up a node.
    pub fn node(&self, id: NodeId) -> Option<&OperationNode> {
        self.nodes.get(id.0)
    }

    /// Number of operation nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_operation()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Paths whose nodes could not be constructed.
    pub fn skipped(&self) -> &[SkippedPath] {
        &self.skipped
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.node(id) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn status(&self, id: NodeId) -> Option<NodeStatus> {
        self.node(id).map(|n| n.status)
    }

    /// Finds the operation node targeting `path`.
    pub fn find(&self, path: &EntityPath) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.target() == Some(path))
            .map(NodeId)
    }

    /// Every node below `id` in pre-order. Level members are listed
    /// before the levels that follow them.
    pub fn all_children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        if let Some(node) = self.node(id) {
            push_successors(&mut stack, node);
        }
        while let Some(next) = stack.pop() {
            out.push(next);
            push_successors(&mut stack, &self.nodes[next.0]);
        }
        out
    }

    /// Operation nodes in pre-order.
    pub fn operations(&self) -> Vec<NodeId> {
        self.all_children(NodeId::ROOT)
            .into_iter()
            .filter(|id| self.nodes[id.0].is_operation())
            .collect()
    }

    /// Operation nodes grouped by depth, each group in pre-order.
    pub fn by_depth(&self) -> BTreeMap<usize, Vec<NodeId>> {
        let mut groups: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
        for id in self.operations() {
            groups.entry(self.nodes[id.0].depth).or_default().push(id);
        }
        groups
    }

    fn push(&mut self, node: OperationNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Attaches an operation below `parent`.
    pub(crate) fn attach(&mut self, parent: NodeId, op: Arc<dyn Operation>) -> NodeId {
        let depth = self.nodes[parent.0].depth + 1;
        let id = self.push(OperationNode::new(NodeWork::Operation(op), Some(parent), depth));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Rebuilds the tree so that the deepest nodes run first.
    ///
    /// Each original depth becomes one level node; levels are chained from
    /// the deepest to the shallowest and a level starts only after every
    /// member of the previous level succeeded.
    pub fn reverse(self) -> ProcessTree {
        let groups = self.by_depth();
        let mut reversed = ProcessTree {
            nodes: vec![OperationNode::new(NodeWork::Root, None, 0)],
            action: self.action,
            skipped: self.skipped,
            first_failure: None,
            span: self.span,
        };

        let mut ops: HashMap<NodeId, Arc<dyn Operation>> = HashMap::new();
        for (index, node) in self.nodes.into_iter().enumerate() {
            if let NodeWork::Operation(op) = node.work {
                ops.insert(NodeId(index), op);
            }
        }

        let mut parent = NodeId::ROOT;
        for (depth, ids) in groups.into_iter().rev() {
            let level = reversed.push(OperationNode::new(
                NodeWork::Level {
                    members: Vec::new(),
                },
                Some(parent),
                depth,
            ));
            reversed.nodes[parent.0].children.push(level);

            let mut members = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(op) = ops.remove(&id) {
                    let mut member = OperationNode::new(NodeWork::Operation(op), Some(level), depth);
                    member.level = Some(level);
                    members.push(reversed.push(member));
                }
            }
            reversed.nodes[level.0].work = NodeWork::Level { members };
            parent = level;
        }
        reversed
    }

    pub(crate) fn record_skip(&mut self, path: PathBuf, reason: SyncError) {
        self.skipped.push(SkippedPath::new(path, reason));
    }
}

fn push_successors(stack: &mut Vec<NodeId>, node: &OperationNode) {
    stack.extend(node.children.iter().rev());
    stack.extend(node.members().iter().rev());
}

/// Turns ordered path lists into process trees.
pub struct ProcessTreeBuilder {
    factory: Arc<dyn OperationFactory>,
    span: Span,
}

impl ProcessTreeBuilder {
    pub fn new(factory: Arc<dyn OperationFactory>) -> Self {
        Self {
            factory,
            span: Span::current(),
        }
    }

    /// Replaces the logging span; built trees inherit it.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Builds a tree from a pre-order path list.
    ///
    /// Each node hangs below the node of its parent path, or below the
    /// root when the parent is not part of the tree. Paths whose operation
    /// cannot be constructed are logged, recorded and skipped; the rest of
    /// the tree still builds. Delete trees come back reversed.
    pub fn build(&self, paths: &[PathBuf], action: FileAction) -> ProcessTree {
        let mut tree = ProcessTree::new(action, self.span.clone());
        let mut index: HashMap<EntityPath, NodeId> = HashMap::new();

        for path in paths {
            let op = match self.factory.create(path, action) {
                Ok(op) => op,
                Err(e) => {
                    warn!(parent: &self.span, "Skipping {} ({}): {}", path.display(), action, e);
                    tree.record_skip(path.clone(), e);
                    continue;
                }
            };
            let parent = op
                .target()
                .parent()
                .and_then(|p| index.get(&p).copied())
                .unwrap_or(NodeId::ROOT);
            let target = op.target().clone();
            let id = tree.attach(parent, op);
            index.insert(target, id);
        }

        debug!(
            parent: &self.span,
            "Built {} tree with {} nodes ({} skipped)",
            action,
            tree.len(),
            tree.skipped().len()
        );

        if action == FileAction::Delete {
            tree.reverse()
        } else {
            tree
        }
    }
}
