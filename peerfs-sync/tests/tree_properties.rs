//! Property tests for process-tree ordering.

use async_trait::async_trait;
use peerfs_sync::{
    FileAction, NoopListener, Operation, OperationFactory, OperationOutcome, ProcessTreeBuilder,
    SyncResult,
};
use peerfs_types::EntityPath;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Start(EntityPath),
    End(EntityPath),
}

struct LoggedOp {
    target: EntityPath,
    log: Arc<Mutex<Vec<Event>>>,
}

#[async_trait]
impl Operation for LoggedOp {
    fn action(&self) -> FileAction {
        FileAction::Create
    }

    fn target(&self) -> &EntityPath {
        &self.target
    }

    async fn execute(&self) -> SyncResult<OperationOutcome> {
        self.log.lock().unwrap().push(Event::Start(self.target.clone()));
        tokio::task::yield_now().await;
        self.log.lock().unwrap().push(Event::End(self.target.clone()));
        Ok(OperationOutcome::Applied)
    }
}

struct LoggedFactory {
    log: Arc<Mutex<Vec<Event>>>,
}

impl OperationFactory for LoggedFactory {
    fn create(&self, path: &Path, _action: FileAction) -> SyncResult<Arc<dyn Operation>> {
        Ok(Arc::new(LoggedOp {
            target: EntityPath::from_relative(path)?,
            log: self.log.clone(),
        }))
    }
}

fn arb_tree() -> impl Strategy<Value = BTreeSet<EntityPath>> {
    let component = prop::sample::select(vec!["a", "b", "c", "d"]);
    prop::collection::vec(prop::collection::vec(component, 1..5), 1..12).prop_map(|raw| {
        let mut set = BTreeSet::new();
        for components in raw {
            for end in 1..=components.len() {
                set.insert(EntityPath::from_components(components[..end].iter().copied()).unwrap());
            }
        }
        set
    })
}

fn run(paths: &BTreeSet<EntityPath>, action: FileAction, workers: usize) -> Vec<Event> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let factory = LoggedFactory { log: log.clone() };
    let list: Vec<PathBuf> = paths.iter().map(|p| p.to_local(Path::new(""))).collect();
    let mut tree = ProcessTreeBuilder::new(Arc::new(factory)).build(&list, action);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .build()
        .unwrap();
    let report = runtime.block_on(tree.execute(workers, &NoopListener));
    assert!(report.is_success());

    log.lock().unwrap().clone()
}

fn index_of(events: &[Event], event: &Event) -> usize {
    events.iter().position(|e| e == event).unwrap()
}

proptest! {
    #[test]
    fn sorted_paths_are_preorder(paths in arb_tree()) {
        let list: Vec<&EntityPath> = paths.iter().collect();
        for (i, path) in list.iter().enumerate() {
            if let Some(parent) = path.parent() {
                if !parent.is_root() {
                    let parent_index = list.iter().position(|p| **p == parent).unwrap();
                    prop_assert!(parent_index < i);
                }
            }
        }
    }

    #[test]
    fn create_never_starts_child_before_parent_succeeds(
        paths in arb_tree(),
        workers in 1usize..6,
    ) {
        let events = run(&paths, FileAction::Create, workers);
        prop_assert_eq!(events.len(), paths.len() * 2);
        for path in &paths {
            let Some(parent) = path.parent().filter(|p| !p.is_root()) else { continue };
            prop_assert!(
                index_of(&events, &Event::End(parent.clone()))
                    < index_of(&events, &Event::Start(path.clone()))
            );
        }
    }

    #[test]
    fn delete_runs_deeper_entries_first(
        paths in arb_tree(),
        workers in 1usize..6,
    ) {
        let events = run(&paths, FileAction::Delete, workers);
        prop_assert_eq!(events.len(), paths.len() * 2);
        for deep in &paths {
            for shallow in paths.iter().filter(|s| s.depth() < deep.depth()) {
                prop_assert!(
                    index_of(&events, &Event::End(deep.clone()))
                        < index_of(&events, &Event::Start(shallow.clone()))
                );
            }
        }
    }
}
