use peerfs_crypto::{CryptoProvider, Ed25519Provider, KeyPair};
use peerfs_sync::ops::content_key;
use peerfs_sync::store::mock::MemoryOverlay;
use peerfs_sync::transport::mock::MemoryNetwork;
use async_trait::async_trait;
use peerfs_sync::{
    FileAction, NoopListener, OverlayStore, SyncConfig, SyncEngine, SyncError, SyncResult,
    TreeListener, VersionedValue,
};
use peerfs_types::{EntityPath, PeerId};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Set `RUST_LOG=peerfs_sync=debug` to see engine logs.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> SyncConfig {
    SyncConfig {
        device_name: "test device".into(),
        backoff_min_ms: 1,
        backoff_max_ms: 5,
        request_timeout_ms: 1_000,
        ..SyncConfig::default()
    }
}

fn p(s: &str) -> EntityPath {
    EntityPath::parse(s).unwrap()
}

/// docs/a.txt, docs/sub/b.txt and top.txt.
fn populate(root: &Path) {
    fs::create_dir_all(root.join("docs/sub")).unwrap();
    fs::write(root.join("docs/a.txt"), b"alpha").unwrap();
    fs::write(root.join("docs/sub/b.txt"), b"beta").unwrap();
    fs::write(root.join("top.txt"), b"top").unwrap();
}

struct Device {
    dir: TempDir,
    engine: SyncEngine,
}

impl Device {
    fn root(&self) -> &Path {
        self.dir.path()
    }
}

fn device(store: &Arc<MemoryOverlay>, keys: &KeyPair) -> Device {
    let dir = TempDir::new().unwrap();
    let engine = SyncEngine::new(PeerId::new(), config(), store.clone());
    engine.login("alice", keys.clone(), dir.path());
    Device { dir, engine }
}

async fn uploaded_device(store: &Arc<MemoryOverlay>) -> Device {
    init_tracing();
    let keys = KeyPair::generate();
    let device = device(store, &keys);
    populate(device.root());
    device.engine.register().await.unwrap();
    let report = device
        .engine
        .sync_path(device.root(), FileAction::Create, &NoopListener)
        .await
        .unwrap();
    assert!(report.is_complete(), "{report:?}");
    device
}

#[derive(Default)]
struct CountingListener {
    successes: AtomicUsize,
    failures: AtomicUsize,
}

impl TreeListener for CountingListener {
    fn on_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failure(&self, _reason: &SyncError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Sessions ─────────────────────────────────────────────────────

#[tokio::test]
async fn engine_without_session_builds_nothing() {
    let store = Arc::new(MemoryOverlay::new());
    let dir = TempDir::new().unwrap();
    populate(dir.path());
    let engine = SyncEngine::new(PeerId::new(), config(), store.clone());

    let tree = engine.build_tree(&[dir.path().join("top.txt")], FileAction::Create);
    assert!(tree.is_empty());
    assert!(matches!(tree.skipped()[0].reason(), SyncError::NoActiveSession));

    let result = engine
        .sync_path(dir.path(), FileAction::Create, &NoopListener)
        .await;
    assert!(matches!(result, Err(SyncError::NoActiveSession)));
    assert_eq!(store.operation_count(), 0);
}

#[tokio::test]
async fn logout_ends_the_session() {
    let store = Arc::new(MemoryOverlay::new());
    let device = device(&store, &KeyPair::generate());
    assert_eq!(device.engine.session().unwrap().user_id(), "alice");

    device.engine.logout();
    assert!(matches!(device.engine.session(), Err(SyncError::NoActiveSession)));
}

// ── Change sets ──────────────────────────────────────────────────

#[tokio::test]
async fn change_set_is_preorder_without_root() {
    let store = Arc::new(MemoryOverlay::new());
    let device = device(&store, &KeyPair::generate());
    populate(device.root());

    let listed = device.engine.change_set(device.root()).unwrap();
    let relative: Vec<String> = listed
        .iter()
        .map(|p| p.strip_prefix(device.root()).unwrap().to_string_lossy().replace('\\', "/"))
        .collect();
    assert_eq!(
        relative,
        vec!["docs", "docs/a.txt", "docs/sub", "docs/sub/b.txt", "top.txt"]
    );
    assert_eq!(device.engine.change_set(device.root()).unwrap(), listed);
}

#[tokio::test]
async fn enumeration_of_unchanged_trees_is_reproducible() {
    let store = Arc::new(MemoryOverlay::new());
    let device = uploaded_device(&store).await;

    let first = device.engine.change_set(device.root()).unwrap();
    fs::write(device.root().join("top.txt"), b"same name, new bytes").unwrap();
    let second = device.engine.change_set(device.root()).unwrap();
    assert_eq!(first, second);

    let remote = device.engine.remote_change_set(device.root()).await.unwrap();
    let again = device.engine.remote_change_set(device.root()).await.unwrap();
    assert_eq!(remote, again);
    assert_eq!(remote, first);
}

// ── Create ───────────────────────────────────────────────────────

#[tokio::test]
async fn create_uploads_tree_and_content() {
    let store = Arc::new(MemoryOverlay::new());
    let device = uploaded_device(&store).await;

    let (snapshot, _) = device.engine.session().unwrap().profile().get(0, true).await.unwrap();
    assert_eq!(snapshot.len(), 5);
    assert!(snapshot.entry(&p("docs/sub")).unwrap().is_folder());
    assert_eq!(snapshot.entry(&p("docs/a.txt")).unwrap().version_count(), 1);

    let alpha = Ed25519Provider.hash(b"alpha");
    assert!(store.contains(&content_key(&alpha)));
}

#[tokio::test]
async fn path_outside_root_is_skipped() {
    let store = Arc::new(MemoryOverlay::new());
    let device = uploaded_device(&store).await;
    let elsewhere = TempDir::new().unwrap();
    fs::write(elsewhere.path().join("x.txt"), b"x").unwrap();

    let tree = device.engine.build_tree(
        &[elsewhere.path().join("x.txt"), device.root().join("top.txt")],
        FileAction::Modify,
    );

    assert_eq!(tree.len(), 1);
    assert!(matches!(tree.skipped()[0].reason(), SyncError::InvalidLocation(_)));
}

#[tokio::test]
async fn creating_an_existing_entry_fails_the_node() {
    let store = Arc::new(MemoryOverlay::new());
    let device = uploaded_device(&store).await;
    let listener = CountingListener::default();

    let report = device
        .engine
        .sync_path(&device.root().join("top.txt"), FileAction::Create, &listener)
        .await
        .unwrap();

    assert!(!report.is_success());
    assert!(matches!(report.failed[0].1, SyncError::AlreadyExists(_)));
    assert_eq!(listener.failures.load(Ordering::SeqCst), 1);
    assert_eq!(listener.successes.load(Ordering::SeqCst), 0);
}

// ── Modify ───────────────────────────────────────────────────────

#[tokio::test]
async fn identical_upload_keeps_one_version() {
    let store = Arc::new(MemoryOverlay::new());
    let device = uploaded_device(&store).await;
    let profile_version = store.version_of(device.engine.session().unwrap().profile().key());

    let report = device
        .engine
        .sync_path(&device.root().join("top.txt"), FileAction::Modify, &NoopListener)
        .await
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.unchanged, vec![p("top.txt")]);
    let profile = device.engine.session().unwrap().profile().clone();
    assert_eq!(store.version_of(profile.key()), profile_version);
    let (snapshot, _) = profile.get(0, true).await.unwrap();
    assert_eq!(snapshot.entry(&p("top.txt")).unwrap().version_count(), 1);
}

#[tokio::test]
async fn changed_upload_adds_one_version_seen_by_other_devices() {
    let store = Arc::new(MemoryOverlay::new());
    let laptop = uploaded_device(&store).await;
    fs::write(laptop.root().join("top.txt"), b"top, edited").unwrap();

    let report = laptop
        .engine
        .sync_path(&laptop.root().join("top.txt"), FileAction::Modify, &NoopListener)
        .await
        .unwrap();
    assert_eq!(report.succeeded, vec![p("top.txt")]);

    let keys = laptop.engine.session().unwrap().keys().clone();
    let phone = device(&store, &keys);
    let (snapshot, _) = phone.engine.session().unwrap().profile().get(0, true).await.unwrap();
    let entry = snapshot.entry(&p("top.txt")).unwrap();
    assert_eq!(entry.version_count(), 2);
    assert_eq!(entry.latest().unwrap().fingerprint, Ed25519Provider.hash(b"top, edited"));

    let report = phone.engine.download_all(&NoopListener).await.unwrap();
    assert!(report.is_complete(), "{report:?}");
    assert_eq!(fs::read(phone.root().join("top.txt")).unwrap(), b"top, edited");
    assert_eq!(fs::read(phone.root().join("docs/sub/b.txt")).unwrap(), b"beta");
}

#[tokio::test]
async fn modify_compares_against_stored_version_not_cached_one() {
    let store = Arc::new(MemoryOverlay::new());
    let laptop = uploaded_device(&store).await;
    let keys = laptop.engine.session().unwrap().keys().clone();
    let phone = device(&store, &keys);
    phone.engine.download_all(&NoopListener).await.unwrap();

    fs::write(phone.root().join("top.txt"), b"top, from the phone").unwrap();
    let report = phone
        .engine
        .sync_path(&phone.root().join("top.txt"), FileAction::Modify, &NoopListener)
        .await
        .unwrap();
    assert_eq!(report.succeeded, vec![p("top.txt")]);

    // The laptop's cached profile still lists its own "top" as latest.
    let report = laptop
        .engine
        .sync_path(&laptop.root().join("top.txt"), FileAction::Modify, &NoopListener)
        .await
        .unwrap();
    assert_eq!(report.succeeded, vec![p("top.txt")], "{report:?}");
    assert!(report.unchanged.is_empty());

    let observer = device(&store, &keys);
    let (snapshot, _) = observer.engine.session().unwrap().profile().get(0, true).await.unwrap();
    let entry = snapshot.entry(&p("top.txt")).unwrap();
    assert_eq!(entry.version_count(), 3);
    assert_eq!(entry.latest().unwrap().fingerprint, Ed25519Provider.hash(b"top"));
}

#[tokio::test]
async fn folder_version_fails_before_any_network_access() {
    let store = Arc::new(MemoryOverlay::new());
    let device = uploaded_device(&store).await;
    let before = store.operation_count();

    let tree = device
        .engine
        .build_tree(&[device.root().join("docs")], FileAction::Modify);

    assert!(tree.is_empty());
    assert!(matches!(
        tree.skipped()[0].reason(),
        SyncError::IllegalFolderVersion(path) if *path == p("docs")
    ));
    assert_eq!(store.operation_count(), before);
}

// ── Delete ───────────────────────────────────────────────────────

#[tokio::test]
async fn delete_removes_subtree_and_unreferenced_content() {
    let store = Arc::new(MemoryOverlay::new());
    let device = uploaded_device(&store).await;
    let listener = CountingListener::default();

    let report = device
        .engine
        .sync_path(&device.root().join("docs"), FileAction::Delete, &listener)
        .await
        .unwrap();

    assert!(report.is_success(), "{report:?}");
    assert_eq!(report.succeeded.len(), 4);
    assert_eq!(listener.successes.load(Ordering::SeqCst), 1);

    let (snapshot, _) = device.engine.session().unwrap().profile().get(0, true).await.unwrap();
    let remaining: Vec<&EntityPath> = snapshot.entries().map(|(path, _)| path).collect();
    assert_eq!(remaining, vec![&p("top.txt")]);
    assert!(!store.contains(&content_key(&Ed25519Provider.hash(b"alpha"))));
    assert!(store.contains(&content_key(&Ed25519Provider.hash(b"top"))));
}

#[tokio::test]
async fn shared_content_survives_deleting_one_copy() {
    let store = Arc::new(MemoryOverlay::new());
    let device = uploaded_device(&store).await;
    fs::write(device.root().join("copy.txt"), b"top").unwrap();
    device
        .engine
        .sync_path(&device.root().join("copy.txt"), FileAction::Create, &NoopListener)
        .await
        .unwrap();

    device
        .engine
        .sync_path(&device.root().join("top.txt"), FileAction::Delete, &NoopListener)
        .await
        .unwrap();

    assert!(store.contains(&content_key(&Ed25519Provider.hash(b"top"))));
}

/// Drops one content record right before every profile write, as a delete
/// on another device does when it commits and cleans up first.
struct RacingDelete {
    inner: MemoryOverlay,
    victim: String,
}

#[async_trait]
impl OverlayStore for RacingDelete {
    async fn get(&self, key: &str) -> SyncResult<Option<VersionedValue>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, expected_version: u64) -> SyncResult<u64> {
        if key.starts_with("profile/") {
            let _ = self.inner.remove(&self.victim).await;
        }
        self.inner.put(key, value, expected_version).await
    }

    async fn remove(&self, key: &str) -> SyncResult<()> {
        self.inner.remove(key).await
    }
}

#[tokio::test]
async fn content_removed_before_commit_is_stored_again() {
    init_tracing();
    let fingerprint = Ed25519Provider.hash(b"top");
    let store = Arc::new(RacingDelete {
        inner: MemoryOverlay::new(),
        victim: content_key(&fingerprint),
    });
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("top.txt"), b"top").unwrap();
    let engine = SyncEngine::new(PeerId::new(), config(), store.clone());
    engine.login("alice", KeyPair::generate(), dir.path());
    engine.register().await.unwrap();

    let report = engine
        .sync_path(&dir.path().join("top.txt"), FileAction::Create, &NoopListener)
        .await
        .unwrap();

    assert!(report.is_success(), "{report:?}");
    assert!(store.inner.contains(&content_key(&fingerprint)));
}

// ── Download ─────────────────────────────────────────────────────

#[tokio::test]
async fn download_of_current_files_is_unchanged() {
    let store = Arc::new(MemoryOverlay::new());
    let device = uploaded_device(&store).await;

    let report = device.engine.download_all(&NoopListener).await.unwrap();

    assert!(report.is_success());
    assert_eq!(report.unchanged.len(), 3);
    assert_eq!(report.succeeded.len(), 2);
}

#[tokio::test]
async fn corrupted_content_fails_download() {
    let store = Arc::new(MemoryOverlay::new());
    let laptop = uploaded_device(&store).await;
    let key = content_key(&Ed25519Provider.hash(b"beta"));
    store.put(&key, b"not beta".to_vec(), 1).await.unwrap();

    let keys = laptop.engine.session().unwrap().keys().clone();
    let phone = device(&store, &keys);
    let report = phone.engine.download_all(&NoopListener).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0].1, SyncError::ContentMismatch(_)));
    assert!(!phone.root().join("docs/sub/b.txt").exists());
    assert_eq!(fs::read(phone.root().join("docs/a.txt")).unwrap(), b"alpha");
}

// ── Messaging ────────────────────────────────────────────────────

#[tokio::test]
async fn announced_profile_change_reaches_other_device() {
    let store = Arc::new(MemoryOverlay::new());
    let network = MemoryNetwork::new();
    let laptop = uploaded_device(&store).await;
    let keys = laptop.engine.session().unwrap().keys().clone();
    let phone = device(&store, &keys);
    let phone_profile = phone.engine.session().unwrap().profile().clone();
    phone_profile.get(0, true).await.unwrap();

    let laptop_messenger = laptop
        .engine
        .connect(Arc::new(network.join(laptop.engine.peer_id())))
        .unwrap();
    let phone_messenger = phone
        .engine
        .connect(Arc::new(network.join(phone.engine.peer_id())))
        .unwrap();
    laptop_messenger.add_peer(phone.engine.peer_id(), keys.verifying_key);
    phone_messenger.add_peer(laptop.engine.peer_id(), keys.verifying_key);

    laptop_messenger
        .contact(phone.engine.peer_id(), "still there?")
        .await
        .unwrap();

    let cached = phone_profile.cached_version().await.unwrap();
    let reached = laptop
        .engine
        .announce_profile(&laptop_messenger, cached + 1)
        .await
        .unwrap();
    assert_eq!(reached, 1);

    let mut invalidated = false;
    for _ in 0..50 {
        if phone_profile.cached_version().await.is_none() {
            invalidated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(invalidated);

    laptop_messenger.shutdown().await;
    phone_messenger.shutdown().await;
}

#[tokio::test]
async fn connect_rejects_foreign_transport() {
    let store = Arc::new(MemoryOverlay::new());
    let network = MemoryNetwork::new();
    let device = device(&store, &KeyPair::generate());

    let result = device.engine.connect(Arc::new(network.join(PeerId::new())));
    assert!(matches!(result, Err(SyncError::Protocol(_))));
}
