//! Process-tree execution.
//!
//! Every operation node runs as its own task on a [`JoinSet`]; a shared
//! [`Semaphore`] caps how many execute at once. The scheduler loop owns
//! all node state: tasks only report `(node, result)` back, and the loop
//! decides which children become ready, which subtrees cascade, and when
//! a level is complete.

use crate::error::{SyncError, SyncResult};
use crate::operation::OperationOutcome;
use crate::tree::{NodeId, NodeStatus, NodeWork, ProcessTree, SkippedPath};
use peerfs_types::EntityPath;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinHandle, JoinSet};
use tracing::{debug, info, warn, Instrument};

/// Caller-supplied completion callback, invoked exactly once per tree.
pub trait TreeListener: Send + Sync {
    fn on_success(&self);
    fn on_failure(&self, reason: &SyncError);
}

/// A listener that ignores both outcomes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl TreeListener for NoopListener {
    fn on_success(&self) {}
    fn on_failure(&self, _reason: &SyncError) {}
}

/// Aggregate result of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeOutcome {
    /// Every constructed node succeeded.
    Succeeded,
    /// At least one node failed or was cascaded.
    Failed,
    /// The tree has not run yet.
    NotStarted,
}

/// Per-path summary of an executed tree.
#[derive(Debug, Clone)]
pub struct TreeReport {
    pub outcome: TreeOutcome,
    /// Nodes that changed something, in pre-order.
    pub succeeded: Vec<EntityPath>,
    /// Nodes that finished without anything to change.
    pub unchanged: Vec<EntityPath>,
    /// Nodes that ran and failed.
    pub failed: Vec<(EntityPath, SyncError)>,
    /// Nodes never started because an ancestor failed.
    pub cascaded: Vec<EntityPath>,
    /// Paths the builder could not construct.
    pub skipped: Vec<SkippedPath>,
    /// The first failure the scheduler observed.
    pub first_failure: Option<SyncError>,
}

impl TreeReport {
    pub fn is_success(&self) -> bool {
        self.outcome == TreeOutcome::Succeeded
    }

    /// Succeeded and nothing was skipped at construction.
    pub fn is_complete(&self) -> bool {
        self.is_success() && self.skipped.is_empty()
    }
}

type TaskResult = (NodeId, SyncResult<OperationOutcome>);

struct Run {
    pool: Arc<Semaphore>,
    tasks: JoinSet<TaskResult>,
    running: HashMap<task::Id, NodeId>,
    ready: VecDeque<NodeId>,
    pending_members: HashMap<NodeId, usize>,
    first_failure: Option<SyncError>,
}

impl ProcessTree {
    /// Runs the tree to completion with at most `workers` operations in
    /// flight, then notifies `listener` once.
    ///
    /// A tree runs once; calling this again only returns the report.
    pub async fn execute(&mut self, workers: usize, listener: &dyn TreeListener) -> TreeReport {
        if self.nodes[NodeId::ROOT.index()].status != NodeStatus::Pending {
            debug!(parent: &self.span, "Process tree already executed");
            return self.report();
        }

        let mut run = Run {
            pool: Arc::new(Semaphore::new(workers.max(1))),
            tasks: JoinSet::new(),
            running: HashMap::new(),
            ready: VecDeque::new(),
            pending_members: HashMap::new(),
            first_failure: None,
        };

        info!(parent: &self.span, "Executing {} tree with {} nodes", self.action(), self.len());
        let root = NodeId::ROOT.index();
        self.nodes[root].status = NodeStatus::Running;
        run.ready.extend(self.nodes[root].children.iter().copied());

        loop {
            while let Some(id) = run.ready.pop_front() {
                self.start(id, &mut run);
            }
            let Some(joined) = run.tasks.join_next_with_id().await else {
                break;
            };
            let (id, result) = match joined {
                Ok((task_id, (id, result))) => {
                    run.running.remove(&task_id);
                    (id, result)
                }
                Err(e) => match run.running.remove(&e.id()) {
                    Some(id) => (id, Err(SyncError::TaskFailed(e.to_string()))),
                    None => continue,
                },
            };
            self.settle(id, result, &mut run);
        }

        let all_succeeded = self
            .nodes
            .iter()
            .skip(1)
            .all(|n| n.status == NodeStatus::Succeeded);
        self.first_failure = run.first_failure;
        self.nodes[root].status = if all_succeeded {
            NodeStatus::Succeeded
        } else {
            NodeStatus::Failed
        };

        let report = self.report();
        match &self.first_failure {
            Some(reason) if !all_succeeded => {
                warn!(
                    parent: &self.span,
                    "{} tree failed: {} failed, {} cascaded: {}",
                    self.action(),
                    report.failed.len(),
                    report.cascaded.len(),
                    reason
                );
                listener.on_failure(reason);
            }
            _ => {
                info!(
                    parent: &self.span,
                    "{} tree succeeded: {} applied, {} unchanged",
                    self.action(),
                    report.succeeded.len(),
                    report.unchanged.len()
                );
                listener.on_success();
            }
        }
        report
    }

    /// Moves the tree onto its own task. The handle yields the executed
    /// tree alongside its report.
    pub fn spawn(
        mut self,
        workers: usize,
        listener: Arc<dyn TreeListener>,
    ) -> JoinHandle<(ProcessTree, TreeReport)> {
        tokio::spawn(async move {
            let report = self.execute(workers, listener.as_ref()).await;
            (self, report)
        })
    }

    /// Summarizes node states. Before execution the outcome is
    /// [`TreeOutcome::NotStarted`].
    pub fn report(&self) -> TreeReport {
        let mut report = TreeReport {
            outcome: match self.nodes[NodeId::ROOT.index()].status {
                NodeStatus::Succeeded => TreeOutcome::Succeeded,
                NodeStatus::Failed => TreeOutcome::Failed,
                NodeStatus::Pending | NodeStatus::Running => TreeOutcome::NotStarted,
            },
            succeeded: Vec::new(),
            unchanged: Vec::new(),
            failed: Vec::new(),
            cascaded: Vec::new(),
            skipped: self.skipped().to_vec(),
            first_failure: self.first_failure.clone(),
        };
        for id in self.operations() {
            let node = &self.nodes[id.index()];
            let Some(path) = node.target().cloned() else {
                continue;
            };
            match (node.status, node.outcome, &node.error) {
                (NodeStatus::Succeeded, Some(OperationOutcome::Unchanged), _) => {
                    report.unchanged.push(path)
                }
                (NodeStatus::Succeeded, _, _) => report.succeeded.push(path),
                (NodeStatus::Failed, _, Some(SyncError::Cascade(_))) => report.cascaded.push(path),
                (NodeStatus::Failed, _, Some(e)) => report.failed.push((path, e.clone())),
                _ => {}
            }
        }
        report
    }

    fn start(&mut self, id: NodeId, run: &mut Run) {
        let node = &mut self.nodes[id.index()];
        if node.status != NodeStatus::Pending {
            return;
        }
        node.status = NodeStatus::Running;
        let depth = node.depth;
        let members = match &node.work {
            NodeWork::Operation(op) => {
                let op = op.clone();
                let pool = run.pool.clone();
                debug!(parent: &self.span, "Starting {:?}", op);
                let handle = run.tasks.spawn(
                    async move {
                        let Ok(_permit) = pool.acquire_owned().await else {
                            return (id, Err(SyncError::ChannelClosed));
                        };
                        (id, op.execute().await)
                    }
                    .instrument(self.span.clone()),
                );
                run.running.insert(handle.id(), id);
                return;
            }
            NodeWork::Level { members } => members.clone(),
            NodeWork::Root => return,
        };

        if members.is_empty() {
            self.settle(id, Ok(OperationOutcome::Applied), run);
            return;
        }
        debug!(parent: &self.span, "Starting level {} ({} nodes)", depth, members.len());
        run.pending_members.insert(id, members.len());
        run.ready.extend(members);
    }

    /// Records a terminal state and schedules whatever it unblocks.
    fn settle(&mut self, id: NodeId, result: SyncResult<OperationOutcome>, run: &mut Run) {
        let mut next = Some((id, result));
        while let Some((id, result)) = next.take() {
            let label = self.nodes[id.index()].label();
            let level = self.nodes[id.index()].level;
            match result {
                Ok(outcome) => {
                    debug!(parent: &self.span, "{} succeeded ({:?})", label, outcome);
                    let node = &mut self.nodes[id.index()];
                    node.status = NodeStatus::Succeeded;
                    node.outcome = Some(outcome);
                    if level.is_none() {
                        run.ready.extend(node.children.iter().copied());
                    }
                }
                Err(e) => {
                    warn!(parent: &self.span, "{} failed: {}", label, e);
                    if run.first_failure.is_none() {
                        run.first_failure = Some(e.clone());
                    }
                    let node = &mut self.nodes[id.index()];
                    node.status = NodeStatus::Failed;
                    node.error = Some(e);
                    if level.is_none() {
                        self.cascade(id, &label);
                    }
                }
            }

            if let Some(level) = level {
                next = self.member_settled(level, run);
            }
        }
    }

    /// Counts down a level; yields the level's own result once every
    /// member is terminal.
    fn member_settled(&mut self, level: NodeId, run: &mut Run) -> Option<TaskResult> {
        let remaining = run.pending_members.get_mut(&level)?;
        *remaining -= 1;
        if *remaining > 0 {
            return None;
        }
        run.pending_members.remove(&level);
        let failure = self.nodes[level.index()]
            .members()
            .iter()
            .find_map(|m| self.nodes[m.index()].error.clone());
        Some(match failure {
            Some(e) => (level, Err(e)),
            None => (level, Ok(OperationOutcome::Applied)),
        })
    }

    /// Fails every not-yet-started node below `id` without running it.
    fn cascade(&mut self, id: NodeId, label: &str) {
        let mut count = 0;
        for below in self.all_children(id) {
            let node = &mut self.nodes[below.index()];
            if node.status == NodeStatus::Pending {
                node.status = NodeStatus::Failed;
                node.error = Some(SyncError::Cascade(label.to_string()));
                count += 1;
            }
        }
        if count > 0 {
            debug!(parent: &self.span, "Cascaded failure of {} to {} nodes", label, count);
        }
    }
}
