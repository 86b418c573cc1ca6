//! Outbound synchronization: vault mutations propagated to the external
//! store.
//!
//! Outbound writes originate from an authoritative local edit, so files are
//! written unconditionally (no pre-write comparison) but atomically: content
//! lands in a temp file that is renamed over the target. Every external
//! write engages the change guard first so the watch service ignores the
//! engine's own filesystem events.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SyncConfig;
use crate::vault::Vault;

use super::error::{SyncError, SyncResult};
use super::guard::ChangeGuard;
use super::policy::PathPolicy;

/// Confirmation hook for external deletions.
///
/// Deleting an external file because its vault counterpart was deleted is
/// the only destructive external operation, and it is gated on this answer.
#[async_trait]
pub trait DeletePrompt: Send + Sync {
    /// Ask whether the external file at `path` may be deleted.
    async fn confirm_delete(&self, path: &Path) -> bool;
}

/// Confirms every deletion. Used by tests and `--yes` runs.
pub struct AlwaysConfirm;

#[async_trait]
impl DeletePrompt for AlwaysConfirm {
    async fn confirm_delete(&self, _path: &Path) -> bool {
        true
    }
}

/// Declines every deletion.
pub struct NeverConfirm;

#[async_trait]
impl DeletePrompt for NeverConfirm {
    async fn confirm_delete(&self, _path: &Path) -> bool {
        false
    }
}

/// Propagates vault mutations to the external store.
pub struct OutboundSync {
    vault: Arc<dyn Vault>,
    policy: PathPolicy,
    guard: ChangeGuard,
    prompt: Arc<dyn DeletePrompt>,
}

impl OutboundSync {
    pub fn new(
        vault: Arc<dyn Vault>,
        config: Arc<SyncConfig>,
        guard: ChangeGuard,
        prompt: Arc<dyn DeletePrompt>,
    ) -> Self {
        Self {
            vault,
            policy: PathPolicy::new(config),
            guard,
            prompt,
        }
    }

    /// Write a vault file's content to its external counterpart.
    ///
    /// No-op when the path does not participate in sync or no external root
    /// is configured. The external parent directory is created as needed.
    pub async fn sync_file(&self, managed_path: &str) -> SyncResult<()> {
        if !self.policy.should_sync(managed_path) {
            crate::debug_event!("outbound", "skipped by policy", "{managed_path}");
            return Ok(());
        }
        let Some(external) = self.policy.external_path(managed_path) else {
            return Ok(());
        };

        let kind = self.policy.file_kind(managed_path);
        let content = self.vault.read(managed_path, kind).await?;

        self.guard.engage();
        let result = write_atomic(&external, content.as_bytes()).await;
        self.guard.release_after_settle();
        result?;

        crate::log_event!("outbound", "synced", "{managed_path}");
        Ok(())
    }

    /// Mirror a vault folder into the external store. Idempotent.
    pub async fn sync_folder(&self, managed_path: &str) -> SyncResult<()> {
        if !self.policy.should_sync(managed_path) {
            return Ok(());
        }
        let Some(external) = self.policy.external_path(managed_path) else {
            return Ok(());
        };

        self.guard.engage();
        let result = tokio::fs::create_dir_all(&external)
            .await
            .map_err(|e| SyncError::io(&external, e));
        self.guard.release_after_settle();
        result?;

        crate::debug_event!("outbound", "folder ensured", "{managed_path}");
        Ok(())
    }

    /// React to a vault file deletion.
    ///
    /// The external counterpart is deleted only after the prompt confirms;
    /// a declined prompt leaves it untouched.
    pub async fn handle_file_deletion(&self, managed_path: &str) -> SyncResult<()> {
        if !self.policy.should_sync(managed_path) {
            return Ok(());
        }
        let Some(external) = self.policy.external_path(managed_path) else {
            return Ok(());
        };
        if tokio::fs::metadata(&external).await.is_err() {
            return Ok(());
        }

        if !self.prompt.confirm_delete(&external).await {
            crate::log_event!(
                "outbound",
                "deletion declined",
                "{} left intact",
                external.display()
            );
            return Ok(());
        }

        self.guard.engage();
        let result = tokio::fs::remove_file(&external)
            .await
            .map_err(|e| SyncError::io(&external, e));
        self.guard.release_after_settle();
        result?;

        crate::log_event!("outbound", "deleted", "{managed_path}");
        Ok(())
    }

    /// React to a vault file rename.
    ///
    /// Renames the external file in place when the old external path exists
    /// and returns `true`. Returns `false` when the source is missing so
    /// the caller can fall back to a fresh [`sync_file`](Self::sync_file)
    /// on the new path.
    pub async fn handle_file_rename(&self, old_path: &str, new_path: &str) -> SyncResult<bool> {
        if !self.policy.should_sync(new_path) {
            return Ok(false);
        }
        let (Some(old_external), Some(new_external)) = (
            self.policy.external_path(old_path),
            self.policy.external_path(new_path),
        ) else {
            return Ok(false);
        };
        if tokio::fs::metadata(&old_external).await.is_err() {
            return Ok(false);
        }

        self.guard.engage();
        let result = async {
            if let Some(parent) = new_external.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SyncError::io(parent, e))?;
            }
            tokio::fs::rename(&old_external, &new_external)
                .await
                .map_err(|e| SyncError::io(&new_external, e))
        }
        .await;
        self.guard.release_after_settle();
        result?;

        crate::log_event!("outbound", "renamed", "{old_path} -> {new_path}");
        Ok(true)
    }

    /// React to a vault folder rename.
    ///
    /// Renames the external directory when the target is absent; merges
    /// source contents into the target when both exist; creates the target
    /// fresh when the source is missing.
    pub async fn handle_folder_rename(&self, old_path: &str, new_path: &str) -> SyncResult<()> {
        if !self.policy.should_sync(new_path) {
            return Ok(());
        }
        let (Some(old_external), Some(new_external)) = (
            self.policy.external_path(old_path),
            self.policy.external_path(new_path),
        ) else {
            return Ok(());
        };

        let old_exists = tokio::fs::metadata(&old_external).await.is_ok();
        let new_exists = tokio::fs::metadata(&new_external).await.is_ok();

        self.guard.engage();
        let result = if !old_exists {
            tokio::fs::create_dir_all(&new_external)
                .await
                .map_err(|e| SyncError::io(&new_external, e))
        } else if !new_exists {
            async {
                if let Some(parent) = new_external.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| SyncError::io(parent, e))?;
                }
                tokio::fs::rename(&old_external, &new_external)
                    .await
                    .map_err(|e| SyncError::io(&new_external, e))
            }
            .await
        } else {
            merge_directory(&old_external, &new_external).await
        };
        self.guard.release_after_settle();
        result?;

        crate::log_event!("outbound", "folder renamed", "{old_path} -> {new_path}");
        Ok(())
    }

    /// Push every participating vault entry to the external store.
    ///
    /// Folders first so parents exist, then files. Item failures are logged
    /// and do not abort the sweep.
    pub async fn push_all(&self) -> SyncResult<()> {
        let entries = self.vault.entries().await?;
        let mut failures = 0usize;

        for entry in entries.iter().filter(|e| e.is_directory()) {
            if let Err(e) = self.sync_folder(entry.path()).await {
                tracing::warn!("[outbound] failed to mirror folder {}: {e}", entry.path());
                failures += 1;
            }
        }
        for entry in entries.iter().filter(|e| !e.is_directory()) {
            if let Err(e) = self.sync_file(entry.path()).await {
                tracing::warn!("[outbound] failed to sync {}: {e}", entry.path());
                failures += 1;
            }
        }

        crate::log_event!(
            "outbound",
            "push complete",
            "{} entries, {failures} failures",
            entries.len()
        );
        Ok(())
    }
}

/// Write `bytes` to `path` atomically: temp file in the same directory,
/// then rename over the target.
async fn write_atomic(path: &Path, bytes: &[u8]) -> SyncResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SyncError::io(parent, e))?;
    }
    let Some(name) = path.file_name() else {
        return Err(SyncError::io(
            path,
            std::io::Error::other("external path has no file name"),
        ));
    };
    let tmp = path.with_file_name(format!("{}.vstmp", name.to_string_lossy()));

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| SyncError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| SyncError::io(path, e))
}

/// Merge `source` into `target` file by file, recursing into
/// subdirectories. Emptied source directories are removed; a source
/// directory that still has entries (e.g. after a copy failure) is left in
/// place.
fn merge_directory<'a>(
    source: &'a Path,
    target: &'a Path,
) -> Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(target)
            .await
            .map_err(|e| SyncError::io(target, e))?;

        let mut entries = tokio::fs::read_dir(source)
            .await
            .map_err(|e| SyncError::io(source, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::io(source, e))?
        {
            let from = entry.path();
            let to = target.join(entry.file_name());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| SyncError::io(&from, e))?;

            if file_type.is_dir() {
                merge_directory(&from, &to).await?;
            } else {
                tokio::fs::copy(&from, &to)
                    .await
                    .map_err(|e| SyncError::io(&to, e))?;
                tokio::fs::remove_file(&from)
                    .await
                    .map_err(|e| SyncError::io(&from, e))?;
            }
        }

        // Succeeds only once the merge emptied the directory.
        let _ = tokio::fs::remove_dir(source).await;
        Ok(())
    })
}
