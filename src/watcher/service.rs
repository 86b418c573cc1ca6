//! Watch service for the external store.
//!
//! One `notify::RecommendedWatcher` covers every sync root. Each root is
//! watched recursively when the platform allows it; otherwise the service
//! falls back to individually watching the root and every subdirectory,
//! registering new watches as directories appear in create events.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::sync::{ChangeGuard, InboundSync, PathPolicy, SyncRoot};
use crate::vault::{Vault, VaultEntry};

use super::debouncer::Debouncer;
use super::error::WatchError;

/// Watch state for one sync root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchMode {
    Unwatched,
    Recursive,
    PerDirectory,
}

/// One sync root and its active registrations.
struct RootWatch {
    root: SyncRoot,
    mode: WatchMode,
    /// Every path registered with the watcher for this root.
    watched: HashSet<PathBuf>,
}

impl RootWatch {
    fn new(root: SyncRoot) -> Self {
        Self {
            root,
            mode: WatchMode::Unwatched,
            watched: HashSet::new(),
        }
    }
}

/// Watches every sync root and dispatches classified events to inbound
/// sync.
pub struct WatchService {
    vault: Arc<dyn Vault>,
    inbound: Arc<InboundSync>,
    policy: PathPolicy,
    guard: ChangeGuard,
    debouncer: Debouncer<usize>,
    roots: Vec<RootWatch>,
    event_rx: mpsc::Receiver<notify::Result<Event>>,
    watcher: notify::RecommendedWatcher,
}

impl WatchService {
    /// Create the service and its underlying watcher. No paths are watched
    /// until [`start`](Self::start).
    pub fn new(
        vault: Arc<dyn Vault>,
        inbound: Arc<InboundSync>,
        config: Arc<SyncConfig>,
        guard: ChangeGuard,
    ) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel(256);
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;

        let policy = PathPolicy::new(Arc::clone(&config));
        let roots = policy.sync_roots().into_iter().map(RootWatch::new).collect();

        Ok(Self {
            vault,
            inbound,
            policy,
            guard,
            debouncer: Debouncer::new(config.debounce_ms),
            roots,
            event_rx: rx,
            watcher,
        })
    }

    /// Register watches on every sync root.
    ///
    /// Per-root failures are recovered (fallback) or logged; a root that
    /// cannot be watched at all leaves the rest of the service running.
    pub fn start(&mut self) {
        if self.roots.is_empty() {
            crate::log_event!("watcher", "no external root configured, watcher idle");
            return;
        }
        for idx in 0..self.roots.len() {
            self.watch_root(idx);
        }
    }

    /// Event loop. Runs until the token is cancelled, then closes every
    /// watch.
    pub async fn run(mut self, token: CancellationToken) {
        crate::log_event!("watcher", "started");

        loop {
            // Periodic check for debounced events.
            let tick = sleep(Duration::from_millis(100));
            tokio::pin!(tick);

            tokio::select! {
                _ = token.cancelled() => break,

                maybe = self.event_rx.recv() => {
                    match maybe {
                        Some(Ok(event)) => self.process_event(event).await,
                        Some(Err(e)) => {
                            tracing::error!("[watcher] file watch error: {e}");
                        }
                        None => {
                            tracing::warn!("[watcher] event channel closed");
                            break;
                        }
                    }
                }

                _ = &mut tick => {
                    self.flush_ready().await;
                }
            }
        }

        self.close_all();
        crate::log_event!("watcher", "stopped");
    }

    /// Attempt a recursive watch on one root, falling back to
    /// per-directory registration when the platform rejects it.
    fn watch_root(&mut self, idx: usize) {
        let external = self.roots[idx].root.external.clone();
        if !external.is_dir() {
            tracing::warn!(
                "[watcher] sync root {} does not exist, not watching",
                external.display()
            );
            return;
        }

        match self.watcher.watch(&external, RecursiveMode::Recursive) {
            Ok(()) => {
                self.roots[idx].mode = WatchMode::Recursive;
                self.roots[idx].watched.insert(external.clone());
                crate::log_event!("watcher", "watching recursively", "{}", external.display());
            }
            Err(e) => {
                crate::log_event!(
                    "watcher",
                    "recursive watch unavailable, falling back",
                    "{e}"
                );
                self.watch_per_directory(idx, &external);
            }
        }
    }

    /// Fallback: watch the root and every subdirectory individually.
    fn watch_per_directory(&mut self, idx: usize, external: &Path) {
        self.roots[idx].mode = WatchMode::PerDirectory;

        let dirs: Vec<PathBuf> = WalkDir::new(external)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect();
        for dir in &dirs {
            self.watch_dir(idx, dir);
        }

        crate::log_event!(
            "watcher",
            "per-directory fallback active",
            "{} directories under {}",
            dirs.len(),
            external.display()
        );
    }

    /// Register a single directory, once.
    fn watch_dir(&mut self, idx: usize, dir: &Path) {
        if self.roots[idx].watched.contains(dir) {
            return;
        }
        match self.watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                self.roots[idx].watched.insert(dir.to_path_buf());
                crate::debug_event!("watcher", "watching", "{}", dir.display());
            }
            Err(e) => {
                tracing::warn!("[watcher] failed to watch {}: {e}", dir.display());
            }
        }
    }

    /// Classify and dispatch one raw event.
    async fn process_event(&mut self, event: Event) {
        if self.guard.is_held() {
            crate::debug_event!("watcher", "event dropped while guard held");
            return;
        }
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }

        let Event { kind, paths, .. } = event;
        for path in paths {
            self.process_path(&kind, &path).await;
        }
    }

    async fn process_path(&mut self, kind: &EventKind, path: &Path) {
        let Some(idx) = self.locate(path) else {
            return;
        };
        let root = self.roots[idx].root.clone();
        let Ok(relative) = path.strip_prefix(&root.external) else {
            return;
        };
        let managed = root.managed_path(relative);
        if !self.policy.should_sync(&managed) {
            crate::debug_event!("watcher", "excluded", "{managed}");
            return;
        }

        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                if self.roots[idx].mode == WatchMode::PerDirectory {
                    self.watch_dir(idx, path);
                }
                if matches!(kind, EventKind::Create(_)) {
                    if let Err(e) = self.inbound.handle_directory_creation(&root, relative).await {
                        tracing::error!(
                            "[watcher] directory mirror failed for {}: {e}",
                            path.display()
                        );
                    }
                }
            }
            Ok(_) => {
                // Genuine file event: defer so partially-written files
                // settle before they are read.
                if matches!(
                    kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any | EventKind::Other
                ) {
                    self.debouncer.record(path.to_path_buf(), idx);
                }
            }
            Err(_) => {
                // Path is gone. An ambiguous disappearance is always a
                // deletion; file vs directory is decided by what the vault
                // holds at the mapped path.
                self.debouncer.remove(path);
                self.dispatch_removal(&root, relative, &managed).await;
            }
        }
    }

    async fn dispatch_removal(&self, root: &SyncRoot, relative: &Path, managed: &str) {
        let holds_directory = matches!(
            self.vault.resolve(managed).await,
            Ok(Some(VaultEntry::Directory(_)))
        );
        let result = if holds_directory {
            self.inbound.handle_directory_deletion(root, relative).await
        } else {
            self.inbound.handle_file_deletion(root, relative).await
        };
        if let Err(e) = result {
            tracing::error!("[watcher] removal handling failed for {managed}: {e}");
        }
    }

    /// Dispatch debounced file events that have settled.
    async fn flush_ready(&mut self) {
        if self.guard.is_held() {
            // Leave entries pending; they flush once the guard settles.
            return;
        }
        for (path, idx) in self.debouncer.take_ready() {
            let root = self.roots[idx].root.clone();
            if tokio::fs::metadata(&path).await.is_err() {
                // Deleted while settling (rename-as-modify platforms).
                let Ok(relative) = path.strip_prefix(&root.external) else {
                    continue;
                };
                let managed = root.managed_path(relative);
                self.dispatch_removal(&root, relative, &managed).await;
                continue;
            }
            if let Err(e) = self.inbound.handle_file_change(&path, &root).await {
                tracing::error!("[watcher] file sync failed for {}: {e}", path.display());
            }
        }
    }

    /// The sync root owning a path, preferring the longest match so
    /// external folders nested under the external root resolve correctly.
    fn locate(&self, path: &Path) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (idx, rw) in self.roots.iter().enumerate() {
            if path.starts_with(&rw.root.external) {
                let depth = rw.root.external.components().count();
                if best.is_none_or(|(_, d)| depth > d) {
                    best = Some((idx, depth));
                }
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Unwatch every registration and return all roots to `Unwatched`.
    fn close_all(&mut self) {
        for rw in &mut self.roots {
            for dir in rw.watched.drain() {
                if let Err(e) = self.watcher.unwatch(&dir) {
                    crate::debug_event!("watcher", "unwatch failed", "{}: {e}", dir.display());
                }
            }
            rw.mode = WatchMode::Unwatched;
        }
    }
}
