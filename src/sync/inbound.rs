//! Inbound synchronization: external-store changes applied to the vault.
//!
//! Inbound writes are difference-checked: content is compared against the
//! existing vault file (text-equal or binary-equal) and written only when it
//! actually differs, so rescans and duplicate events do not generate
//! redundant modification traffic. Vault deletions are always soft (trash).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use walkdir::WalkDir;

use crate::config::SyncConfig;
use crate::vault::{FileContent, FileKind, Vault, VaultEntry, VaultError, normalize_path};

use super::error::{SyncError, SyncResult};
use super::guard::ChangeGuard;
use super::policy::{PathPolicy, SyncRoot};

/// Delay before retrying a create that lost a race as a modify.
const CREATE_RETRY_DELAY: Duration = Duration::from_millis(150);

/// Applies external-store changes to the vault.
pub struct InboundSync {
    vault: Arc<dyn Vault>,
    policy: PathPolicy,
    guard: ChangeGuard,
}

impl InboundSync {
    pub fn new(vault: Arc<dyn Vault>, config: Arc<SyncConfig>, guard: ChangeGuard) -> Self {
        Self {
            vault,
            policy: PathPolicy::new(config),
            guard,
        }
    }

    /// Apply an external file's current content to the vault.
    ///
    /// Creates intermediate vault folders as needed. A create that loses a
    /// race against a concurrent create is retried as a modify after a
    /// short delay.
    pub async fn handle_file_change(
        &self,
        external_path: &Path,
        root: &SyncRoot,
    ) -> SyncResult<()> {
        let Ok(relative) = external_path.strip_prefix(&root.external) else {
            tracing::warn!(
                "[inbound] {} is not under {}; skipping",
                external_path.display(),
                root.external.display()
            );
            return Ok(());
        };
        let managed = root.managed_path(relative);
        if !self.policy.should_sync(&managed) {
            crate::debug_event!("inbound", "skipped by policy", "{managed}");
            return Ok(());
        }

        let kind = FileKind::of(&managed);
        let content = read_external(external_path, kind).await?;

        match self.vault.resolve(&managed).await? {
            Some(VaultEntry::File(_)) => {
                let existing = self.vault.read(&managed, kind).await?;
                if existing == content {
                    crate::debug_event!("inbound", "unchanged", "{managed}");
                    return Ok(());
                }
                self.guard.engage();
                let result = self.vault.modify_file(&managed, &content).await;
                self.guard.release_after_settle();
                result?;
                crate::log_event!("inbound", "updated", "{managed}");
            }
            Some(VaultEntry::Directory(_)) => {
                tracing::warn!("[inbound] a folder occupies {managed}; file change dropped");
            }
            None => {
                self.guard.engage();
                let outcome = async {
                    if let Some((parent, _)) = managed.rsplit_once('/') {
                        self.create_folder_chain(parent).await?;
                    }
                    match self.vault.create_file(&managed, &content).await {
                        Err(VaultError::AlreadyExists { .. }) => {
                            // Lost a race with a concurrent create.
                            sleep(CREATE_RETRY_DELAY).await;
                            self.vault
                                .modify_file(&managed, &content)
                                .await
                                .map_err(SyncError::from)
                        }
                        other => other.map_err(SyncError::from),
                    }
                }
                .await;
                self.guard.release_after_settle();
                outcome?;
                crate::log_event!("inbound", "created", "{managed}");
            }
        }
        Ok(())
    }

    /// Soft-delete the vault file mirrored by a deleted external file.
    pub async fn handle_file_deletion(&self, root: &SyncRoot, relative: &Path) -> SyncResult<()> {
        let managed = root.managed_path(relative);
        if !self.policy.should_sync(&managed) {
            return Ok(());
        }

        match self.vault.resolve(&managed).await? {
            Some(VaultEntry::File(_)) => {
                self.guard.engage();
                let result = self.vault.trash(&managed).await;
                self.guard.release_after_settle();
                result?;
                crate::log_event!("inbound", "trashed", "{managed}");
            }
            _ => {
                crate::debug_event!("inbound", "nothing to trash", "{managed}");
            }
        }
        Ok(())
    }

    /// Mirror an external directory into the vault, empty or not.
    pub async fn handle_directory_creation(
        &self,
        root: &SyncRoot,
        relative: &Path,
    ) -> SyncResult<()> {
        let managed = root.managed_path(relative);
        if managed.is_empty() || !self.policy.should_sync(&managed) {
            return Ok(());
        }

        self.guard.engage();
        let result = self.create_folder_chain(&managed).await;
        self.guard.release_after_settle();
        result?;
        crate::debug_event!("inbound", "directory mirrored", "{managed}");
        Ok(())
    }

    /// Soft-delete the vault directory (and its contents) mirrored by a
    /// deleted external directory.
    pub async fn handle_directory_deletion(
        &self,
        root: &SyncRoot,
        relative: &Path,
    ) -> SyncResult<()> {
        let managed = root.managed_path(relative);
        if managed.is_empty() || !self.policy.should_sync(&managed) {
            return Ok(());
        }

        match self.vault.resolve(&managed).await? {
            Some(VaultEntry::Directory(_)) => {
                self.guard.engage();
                let result = self.vault.trash(&managed).await;
                self.guard.release_after_settle();
                result?;
                crate::log_event!("inbound", "directory trashed", "{managed}");
            }
            _ => {
                crate::debug_event!("inbound", "no vault directory at", "{managed}");
            }
        }
        Ok(())
    }

    /// Two-phase full synchronization of every sync root.
    ///
    /// Phase 1 mirrors the directory structure so empty directories exist
    /// in the vault and every parent is present before content moves.
    /// Phase 2 walks the same trees again and applies file contents with
    /// the usual difference check. Item failures are logged and never abort
    /// the traversal.
    pub async fn sync_all(&self) -> SyncResult<()> {
        let roots = self.policy.sync_roots();
        if roots.is_empty() {
            crate::debug_event!("inbound", "no external root configured, full sync skipped");
            return Ok(());
        }

        crate::log_event!("inbound", "full sync", "{} roots", roots.len());
        for root in &roots {
            self.mirror_directories(root).await;
        }
        for root in &roots {
            self.sync_file_contents(root).await;
        }
        Ok(())
    }

    /// Phase 1: create every missing vault directory under one root.
    async fn mirror_directories(&self, root: &SyncRoot) {
        // The root of an externally-mapped folder needs its vault folder
        // even when the external tree is empty.
        if let Err(e) = self.handle_directory_creation(root, Path::new("")).await {
            tracing::warn!("[inbound] failed to mirror root {}: {e}", root.prefix);
        }

        for entry in WalkDir::new(&root.external) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        "[inbound] walk error under {}: {e}",
                        root.external.display()
                    );
                    continue;
                }
            };
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&root.external) else {
                continue;
            };
            if let Err(e) = self.handle_directory_creation(root, relative).await {
                tracing::warn!(
                    "[inbound] failed to mirror directory {}: {e}",
                    entry.path().display()
                );
            }
        }
    }

    /// Phase 2: synchronize file contents under one root.
    async fn sync_file_contents(&self, root: &SyncRoot) {
        for entry in WalkDir::new(&root.external) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(
                        "[inbound] walk error under {}: {e}",
                        root.external.display()
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Err(e) = self.handle_file_change(entry.path(), root).await {
                tracing::warn!("[inbound] failed to sync {}: {e}", entry.path().display());
            }
        }
    }

    /// Create a folder and any missing ancestors, tolerating ones that
    /// already exist.
    async fn create_folder_chain(&self, managed_folder: &str) -> SyncResult<()> {
        let normalized = normalize_path(managed_folder);
        if normalized.is_empty() {
            return Ok(());
        }
        let mut prefix = String::new();
        for segment in normalized.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            match self.vault.create_folder(&prefix).await {
                Ok(()) | Err(VaultError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Read an external file with kind-appropriate decoding.
async fn read_external(path: &Path, kind: FileKind) -> SyncResult<FileContent> {
    match kind {
        FileKind::Text => tokio::fs::read_to_string(path)
            .await
            .map(FileContent::Text)
            .map_err(|e| SyncError::io(path, e)),
        FileKind::Binary => tokio::fs::read(path)
            .await
            .map(FileContent::Binary)
            .map_err(|e| SyncError::io(path, e)),
    }
}
