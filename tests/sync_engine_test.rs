//! End-to-end behavior of the sync engine over a filesystem vault and a
//! temp external root.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use vaultsync::{
    AlwaysConfirm, ChangeGuard, FileContent, FileKind, FsVault, InboundSync, OutboundSync,
    SyncConfig, SyncEngine, SyncRoot, Vault, VaultEntry, VaultResult, WatchService,
};

/// Vault wrapper that counts successful write operations.
struct CountingVault {
    inner: FsVault,
    file_writes: AtomicUsize,
    folder_creates: AtomicUsize,
    trashes: AtomicUsize,
}

impl CountingVault {
    fn new(inner: FsVault) -> Self {
        Self {
            inner,
            file_writes: AtomicUsize::new(0),
            folder_creates: AtomicUsize::new(0),
            trashes: AtomicUsize::new(0),
        }
    }

    fn file_writes(&self) -> usize {
        self.file_writes.load(Ordering::SeqCst)
    }

    fn folder_creates(&self) -> usize {
        self.folder_creates.load(Ordering::SeqCst)
    }

    fn trashes(&self) -> usize {
        self.trashes.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.file_writes.store(0, Ordering::SeqCst);
        self.folder_creates.store(0, Ordering::SeqCst);
        self.trashes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Vault for CountingVault {
    async fn entries(&self) -> VaultResult<Vec<VaultEntry>> {
        self.inner.entries().await
    }

    async fn resolve(&self, path: &str) -> VaultResult<Option<VaultEntry>> {
        self.inner.resolve(path).await
    }

    async fn read(&self, path: &str, kind: FileKind) -> VaultResult<FileContent> {
        self.inner.read(path, kind).await
    }

    async fn create_file(&self, path: &str, content: &FileContent) -> VaultResult<()> {
        self.inner.create_file(path, content).await?;
        self.file_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn modify_file(&self, path: &str, content: &FileContent) -> VaultResult<()> {
        self.inner.modify_file(path, content).await?;
        self.file_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_folder(&self, path: &str) -> VaultResult<()> {
        self.inner.create_folder(path).await?;
        self.folder_creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn trash(&self, path: &str) -> VaultResult<()> {
        self.inner.trash(path).await?;
        self.trashes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    _vault_dir: TempDir,
    _external_dir: TempDir,
    external_root: PathBuf,
    counting: Arc<CountingVault>,
    guard: ChangeGuard,
    outbound: OutboundSync,
    inbound: InboundSync,
    config: Arc<SyncConfig>,
}

fn harness_with(mut config: SyncConfig) -> Harness {
    let vault_dir = TempDir::new().unwrap();
    let external_dir = TempDir::new().unwrap();
    let external_root = external_dir.path().to_path_buf();

    config.external_root = Some(external_root.clone());
    config.settle_ms = 30;
    config.debounce_ms = 100;
    let config = Arc::new(config);

    let counting = Arc::new(CountingVault::new(FsVault::open(vault_dir.path()).unwrap()));
    let vault: Arc<dyn Vault> = counting.clone();
    let guard = ChangeGuard::new(config.settle_ms);
    let outbound = OutboundSync::new(
        Arc::clone(&vault),
        Arc::clone(&config),
        guard.clone(),
        Arc::new(AlwaysConfirm),
    );
    let inbound = InboundSync::new(vault, Arc::clone(&config), guard.clone());

    Harness {
        _vault_dir: vault_dir,
        _external_dir: external_dir,
        external_root,
        counting,
        guard,
        outbound,
        inbound,
        config,
    }
}

fn harness() -> Harness {
    harness_with(SyncConfig::default())
}

impl Harness {
    fn root(&self) -> SyncRoot {
        SyncRoot {
            external: self.external_root.clone(),
            prefix: String::new(),
        }
    }

    fn external_file(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.external_root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
        path
    }

    async fn vault_text(&self, path: &str) -> String {
        match self.counting.read(path, FileKind::Text).await.unwrap() {
            FileContent::Text(s) => s,
            other => panic!("expected text, got {other:?}"),
        }
    }
}

fn text(s: &str) -> FileContent {
    FileContent::Text(s.to_string())
}

#[tokio::test]
async fn excluded_paths_are_never_touched() {
    let mut config = SyncConfig::default();
    config.excluded_paths.insert("private".to_string());
    let h = harness_with(config);

    h.counting.create_folder("private").await.unwrap();
    h.counting
        .create_file("private/secret.md", &text("secret"))
        .await
        .unwrap();
    h.counting.create_folder("notes").await.unwrap();
    h.counting
        .create_file("notes/ok.md", &text("ok"))
        .await
        .unwrap();

    h.outbound.sync_file("private/secret.md").await.unwrap();
    h.outbound.sync_file("notes/ok.md").await.unwrap();

    assert!(!h.external_root.join("private/secret.md").exists());
    assert!(h.external_root.join("notes/ok.md").exists());

    // Inbound direction: excluded external content never reaches the vault.
    h.external_file("private/incoming.md", b"intruder");
    h.counting.reset();
    h.inbound.sync_all().await.unwrap();

    assert_eq!(h.counting.resolve("private/incoming.md").await.unwrap(), None);
    assert_eq!(h.counting.file_writes(), 0);
}

#[tokio::test]
async fn full_sync_twice_issues_no_redundant_writes() {
    let h = harness();
    h.external_file("notes/a.md", b"alpha");
    h.external_file("notes/sub/b.md", b"beta");
    std::fs::create_dir_all(h.external_root.join("empty")).unwrap();

    h.inbound.sync_all().await.unwrap();
    assert_eq!(h.vault_text("notes/a.md").await, "alpha");
    assert_eq!(h.vault_text("notes/sub/b.md").await, "beta");
    assert!(h.counting.file_writes() > 0);

    h.counting.reset();
    h.inbound.sync_all().await.unwrap();
    assert_eq!(h.counting.file_writes(), 0);
    assert_eq!(h.counting.folder_creates(), 0);
}

#[tokio::test]
async fn round_trip_leaves_no_trace_and_reproduces_content() {
    let h = harness();
    h.counting.create_folder("a").await.unwrap();
    h.counting.create_file("a/x.md", &text("hello")).await.unwrap();

    h.outbound.sync_file("a/x.md").await.unwrap();
    let external = h.external_root.join("a/x.md");
    assert_eq!(std::fs::read(&external).unwrap(), b"hello");

    // Host deletes the vault file; confirmed deletion removes the mirror.
    h.counting.trash("a/x.md").await.unwrap();
    h.outbound.handle_file_deletion("a/x.md").await.unwrap();
    assert!(!external.exists());

    // Identical recreate reproduces byte-identical external content.
    h.counting.create_file("a/x.md", &text("hello")).await.unwrap();
    h.outbound.sync_file("a/x.md").await.unwrap();
    assert_eq!(std::fs::read(&external).unwrap(), b"hello");
}

#[tokio::test]
async fn declined_deletion_leaves_external_file_intact() {
    let vault_dir = TempDir::new().unwrap();
    let external_dir = TempDir::new().unwrap();
    let config = Arc::new(SyncConfig {
        external_root: Some(external_dir.path().to_path_buf()),
        ..SyncConfig::default()
    });
    let vault: Arc<dyn Vault> = Arc::new(FsVault::open(vault_dir.path()).unwrap());
    let guard = ChangeGuard::new(30);
    let outbound = OutboundSync::new(
        Arc::clone(&vault),
        Arc::clone(&config),
        guard,
        Arc::new(vaultsync::NeverConfirm),
    );

    vault.create_file("x.md", &text("keep me")).await.unwrap();
    outbound.sync_file("x.md").await.unwrap();

    outbound.handle_file_deletion("x.md").await.unwrap();
    assert!(external_dir.path().join("x.md").exists());
}

#[tokio::test]
async fn empty_external_directory_is_mirrored_without_file_writes() {
    let h = harness();
    std::fs::create_dir_all(h.external_root.join("archive/empty-inner")).unwrap();

    h.inbound.sync_all().await.unwrap();

    assert_eq!(
        h.counting.resolve("archive/empty-inner").await.unwrap(),
        Some(VaultEntry::Directory("archive/empty-inner".into()))
    );
    assert_eq!(h.counting.file_writes(), 0);
    assert_eq!(h.counting.folder_creates(), 2);
}

#[tokio::test]
async fn file_rename_moves_the_external_file_in_place() {
    let h = harness();
    h.counting.create_folder("a").await.unwrap();
    h.counting.create_file("a/x.md", &text("content")).await.unwrap();
    h.outbound.sync_file("a/x.md").await.unwrap();

    let old_external = h.external_root.join("a/x.md");
    #[cfg(unix)]
    let old_inode = {
        use std::os::unix::fs::MetadataExt;
        std::fs::metadata(&old_external).unwrap().ino()
    };

    let renamed = h.outbound.handle_file_rename("a/x.md", "a/y.md").await.unwrap();
    assert!(renamed);
    assert!(!old_external.exists());

    let new_external = h.external_root.join("a/y.md");
    assert_eq!(std::fs::read(&new_external).unwrap(), b"content");

    // Same inode: the file was renamed, not copy-deleted.
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        assert_eq!(std::fs::metadata(&new_external).unwrap().ino(), old_inode);
    }

    // Missing external source reports false so the caller can resync.
    let renamed = h.outbound.handle_file_rename("a/ghost.md", "a/z.md").await.unwrap();
    assert!(!renamed);
}

#[tokio::test]
async fn folder_rename_merges_into_existing_target() {
    let h = harness();
    h.external_file("old/one.md", b"one");
    h.external_file("old/sub/two.md", b"two");
    h.external_file("new/keep.md", b"keep");

    h.outbound.handle_folder_rename("old", "new").await.unwrap();

    assert_eq!(std::fs::read(h.external_root.join("new/one.md")).unwrap(), b"one");
    assert_eq!(std::fs::read(h.external_root.join("new/sub/two.md")).unwrap(), b"two");
    assert_eq!(std::fs::read(h.external_root.join("new/keep.md")).unwrap(), b"keep");
    // The emptied source tree is gone.
    assert!(!h.external_root.join("old").exists());
}

#[tokio::test]
async fn folder_rename_without_target_renames_directory() {
    let h = harness();
    h.external_file("old/one.md", b"one");

    h.outbound.handle_folder_rename("old", "renamed").await.unwrap();

    assert!(!h.external_root.join("old").exists());
    assert_eq!(
        std::fs::read(h.external_root.join("renamed/one.md")).unwrap(),
        b"one"
    );
}

#[tokio::test]
async fn external_deletions_soft_delete_into_the_vault() {
    let h = harness();
    h.external_file("notes/gone.md", b"bye");
    h.inbound.sync_all().await.unwrap();
    assert!(h.counting.resolve("notes/gone.md").await.unwrap().is_some());

    std::fs::remove_file(h.external_root.join("notes/gone.md")).unwrap();
    h.inbound
        .handle_file_deletion(&h.root(), Path::new("notes/gone.md"))
        .await
        .unwrap();

    assert_eq!(h.counting.resolve("notes/gone.md").await.unwrap(), None);
    assert_eq!(h.counting.trashes(), 1);

    // Directory deletion trashes the folder with its contents.
    h.external_file("proj/doc.md", b"doc");
    h.inbound.sync_all().await.unwrap();
    std::fs::remove_dir_all(h.external_root.join("proj")).unwrap();
    h.inbound
        .handle_directory_deletion(&h.root(), Path::new("proj"))
        .await
        .unwrap();
    assert_eq!(h.counting.resolve("proj").await.unwrap(), None);
}

#[tokio::test]
async fn identical_binary_rewrite_causes_no_vault_write() {
    let h = harness();
    let bytes = vec![0x89u8, 0x50, 0x4e, 0x47, 0x00, 0x01, 0x02];
    h.external_file("img/logo.png", &bytes);

    h.inbound.sync_all().await.unwrap();
    assert_eq!(h.counting.file_writes(), 1);

    // Byte-identical rewrite: the difference check suppresses the write.
    h.external_file("img/logo.png", &bytes);
    h.counting.reset();
    h.inbound.sync_all().await.unwrap();
    assert_eq!(h.counting.file_writes(), 0);

    // A real change still propagates.
    h.external_file("img/logo.png", &[0xffu8, 0x00]);
    h.inbound.sync_all().await.unwrap();
    assert_eq!(h.counting.file_writes(), 1);
}

#[tokio::test]
async fn sync_on_write_hooks_respect_the_guard() {
    let h = harness();
    let vault: Arc<dyn Vault> = h.counting.clone();
    let engine = SyncEngine::new(vault, (*h.config).clone(), Arc::new(AlwaysConfirm));
    let external = h.external_root.join("note.md");

    h.counting.create_file("note.md", &text("v1")).await.unwrap();
    engine.notify_vault_file_written("note.md").await.unwrap();
    assert_eq!(std::fs::read(&external).unwrap(), b"v1");

    // While the guard is held the hook is a no-op: the write was
    // inbound-triggered and must not bounce back outbound.
    engine.guard().engage();
    h.counting.modify_file("note.md", &text("v2")).await.unwrap();
    engine.notify_vault_file_written("note.md").await.unwrap();
    assert_eq!(std::fs::read(&external).unwrap(), b"v1");

    engine.guard().release_now();
    engine.notify_vault_file_written("note.md").await.unwrap();
    assert_eq!(std::fs::read(&external).unwrap(), b"v2");

    // A rename whose external source is missing falls back to a fresh sync
    // of the new path.
    h.counting.create_file("orphan.md", &text("orphan")).await.unwrap();
    engine
        .notify_vault_rename("never-synced.md", "orphan.md", false)
        .await
        .unwrap();
    assert_eq!(std::fs::read(h.external_root.join("orphan.md")).unwrap(), b"orphan");
}

#[tokio::test]
async fn engine_watches_and_shuts_down_cleanly() {
    let h = harness();
    let vault: Arc<dyn Vault> = h.counting.clone();
    let mut engine = SyncEngine::new(vault, (*h.config).clone(), Arc::new(AlwaysConfirm));
    engine.start().await.unwrap();

    h.external_file("live.md", b"live");
    sleep(Duration::from_millis(800)).await;
    assert!(h.counting.resolve("live.md").await.unwrap().is_some());

    engine.shutdown().await;

    // All watches are closed: later external changes are not applied.
    h.external_file("after.md", b"late");
    sleep(Duration::from_millis(500)).await;
    assert_eq!(h.counting.resolve("after.md").await.unwrap(), None);
}

#[tokio::test]
async fn guard_window_drops_external_events() {
    let h = harness();
    let vault: Arc<dyn Vault> = h.counting.clone();
    let inbound = Arc::new(InboundSync::new(
        Arc::clone(&vault),
        Arc::clone(&h.config),
        h.guard.clone(),
    ));

    let mut service = WatchService::new(
        Arc::clone(&vault),
        inbound,
        Arc::clone(&h.config),
        h.guard.clone(),
    )
    .unwrap();
    service.start();

    let token = CancellationToken::new();
    let runner = tokio::spawn(service.run(token.clone()));

    // Raw events arriving while the guard is held are discarded.
    h.guard.engage();
    h.external_file("held.md", b"should be dropped");
    sleep(Duration::from_millis(600)).await;
    h.guard.release_now();
    sleep(Duration::from_millis(300)).await;

    assert_eq!(h.counting.file_writes(), 0);
    assert_eq!(h.counting.resolve("held.md").await.unwrap(), None);

    // With the guard released, fresh events flow through.
    h.external_file("free.md", b"synced");
    sleep(Duration::from_millis(800)).await;
    assert!(h.counting.resolve("free.md").await.unwrap().is_some());

    token.cancel();
    runner.await.unwrap();
}
