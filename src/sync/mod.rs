//! The synchronization engine.
//!
//! [`SyncEngine`] is the single context object owning all cross-cutting
//! state: the change guard, the outbound and inbound components, the watch
//! task, and the periodic full-sync task. It is created at startup, rebuilt
//! on every configuration save, and explicitly shut down (closing all
//! watches) at exit.

pub mod error;
pub mod guard;
pub mod inbound;
pub mod outbound;
pub mod policy;

pub use error::{SyncError, SyncResult};
pub use guard::ChangeGuard;
pub use inbound::InboundSync;
pub use outbound::{AlwaysConfirm, DeletePrompt, NeverConfirm, OutboundSync};
pub use policy::{PathPolicy, SyncRoot};

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::config::SyncConfig;
use crate::vault::Vault;
use crate::watcher::{WatchError, WatchService};

/// Owns the running synchronization machinery for one vault.
pub struct SyncEngine {
    vault: Arc<dyn Vault>,
    config: Arc<SyncConfig>,
    guard: ChangeGuard,
    prompt: Arc<dyn DeletePrompt>,
    outbound: Arc<OutboundSync>,
    inbound: Arc<InboundSync>,
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncEngine {
    /// Build an engine from a vault, a configuration snapshot, and a
    /// deletion prompt. No tasks run until [`start`](Self::start).
    pub fn new(vault: Arc<dyn Vault>, config: SyncConfig, prompt: Arc<dyn DeletePrompt>) -> Self {
        if config.has_basename_collision() {
            tracing::warn!(
                "[engine] external folders share a basename; the path mapping is ambiguous"
            );
        }
        let config = Arc::new(config);
        let guard = ChangeGuard::new(config.settle_ms);
        let outbound = Arc::new(OutboundSync::new(
            Arc::clone(&vault),
            Arc::clone(&config),
            guard.clone(),
            Arc::clone(&prompt),
        ));
        let inbound = Arc::new(InboundSync::new(
            Arc::clone(&vault),
            Arc::clone(&config),
            guard.clone(),
        ));

        Self {
            vault,
            config,
            guard,
            prompt,
            outbound,
            inbound,
            token: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    /// The active configuration snapshot.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn guard(&self) -> &ChangeGuard {
        &self.guard
    }

    pub fn outbound(&self) -> &OutboundSync {
        &self.outbound
    }

    pub fn inbound(&self) -> &InboundSync {
        &self.inbound
    }

    /// Start the watch service and, when configured, the periodic full
    /// sync task.
    pub async fn start(&mut self) -> Result<(), WatchError> {
        let mut service = WatchService::new(
            Arc::clone(&self.vault),
            Arc::clone(&self.inbound),
            Arc::clone(&self.config),
            self.guard.clone(),
        )?;
        service.start();
        let token = self.token.clone();
        self.tasks.push(tokio::spawn(service.run(token)));

        if self.config.sync_interval_secs > 0 {
            let outbound = Arc::clone(&self.outbound);
            let inbound = Arc::clone(&self.inbound);
            let token = self.token.clone();
            let period = Duration::from_secs(self.config.sync_interval_secs);
            self.tasks.push(tokio::spawn(async move {
                let mut ticker = interval(period);
                // The first tick fires immediately; the initial sync is the
                // caller's decision, not the timer's.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = outbound.push_all().await {
                                tracing::error!("[engine] periodic push failed: {e}");
                            }
                            if let Err(e) = inbound.sync_all().await {
                                tracing::error!("[engine] periodic sync failed: {e}");
                            }
                        }
                    }
                }
            }));
        }

        crate::log_event!("engine", "started");
        Ok(())
    }

    /// On-demand full synchronization: push vault state outbound, then run
    /// the inbound two-phase pass.
    pub async fn full_sync(&self) -> SyncResult<()> {
        self.outbound.push_all().await?;
        self.inbound.sync_all().await
    }

    /// Replace the configuration: all watches are destroyed, components are
    /// rebuilt against the new snapshot, and watching restarts.
    pub async fn apply_config(&mut self, new_config: SyncConfig) -> Result<(), WatchError> {
        self.stop_tasks().await;

        if new_config.has_basename_collision() {
            tracing::warn!(
                "[engine] external folders share a basename; the path mapping is ambiguous"
            );
        }
        self.config = Arc::new(new_config);
        self.guard = ChangeGuard::new(self.config.settle_ms);
        self.outbound = Arc::new(OutboundSync::new(
            Arc::clone(&self.vault),
            Arc::clone(&self.config),
            self.guard.clone(),
            Arc::clone(&self.prompt),
        ));
        self.inbound = Arc::new(InboundSync::new(
            Arc::clone(&self.vault),
            Arc::clone(&self.config),
            self.guard.clone(),
        ));

        crate::log_event!("engine", "configuration applied, watches recreated");
        self.start().await
    }

    /// Stop all tasks and close every watch.
    pub async fn shutdown(&mut self) {
        self.stop_tasks().await;
        self.guard.release_now();
        crate::log_event!("engine", "stopped");
    }

    async fn stop_tasks(&mut self) {
        self.token.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.token = CancellationToken::new();
    }

    /// Host hook: a vault file was created or modified.
    ///
    /// No-op when sync-on-write is disabled or the change guard is held
    /// (the write was inbound-triggered and must not bounce back).
    pub async fn notify_vault_file_written(&self, path: &str) -> SyncResult<()> {
        if !self.config.sync_on_write || self.guard.is_held() {
            return Ok(());
        }
        self.outbound.sync_file(path).await
    }

    /// Host hook: a vault folder was created.
    pub async fn notify_vault_folder_created(&self, path: &str) -> SyncResult<()> {
        if !self.config.sync_on_write || self.guard.is_held() {
            return Ok(());
        }
        self.outbound.sync_folder(path).await
    }

    /// Host hook: a vault file was deleted.
    pub async fn notify_vault_file_deleted(&self, path: &str) -> SyncResult<()> {
        if !self.config.sync_on_write || self.guard.is_held() {
            return Ok(());
        }
        self.outbound.handle_file_deletion(path).await
    }

    /// Host hook: a vault file or folder was renamed.
    ///
    /// A file rename whose external source is missing falls back to a
    /// fresh sync of the new path.
    pub async fn notify_vault_rename(
        &self,
        old_path: &str,
        new_path: &str,
        is_folder: bool,
    ) -> SyncResult<()> {
        if !self.config.sync_on_write || self.guard.is_held() {
            return Ok(());
        }
        if is_folder {
            self.outbound.handle_folder_rename(old_path, new_path).await
        } else if !self.outbound.handle_file_rename(old_path, new_path).await? {
            self.outbound.sync_file(new_path).await
        } else {
            Ok(())
        }
    }
}
