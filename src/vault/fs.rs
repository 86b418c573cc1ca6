//! Filesystem-backed vault.
//!
//! Stores documents under a plain root directory. Soft deletes move items
//! into a `.trash/` area inside the root; enumeration skips `.trash` and the
//! `.vaultsync` configuration directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use super::{FileContent, FileKind, Vault, VaultEntry, VaultError, VaultResult, normalize_path};
use crate::config::CONFIG_DIR;

/// Soft-delete area inside the vault root.
pub const TRASH_DIR: &str = ".trash";

/// A vault stored as a plain directory tree.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    /// Open a vault rooted at `root`, creating the directory if missing.
    pub fn open(root: impl Into<PathBuf>) -> VaultResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| io_err(&root.display().to_string(), e))?;
        Ok(Self { root })
    }

    /// The vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a vault-relative path to an absolute one, rejecting escapes.
    fn absolute(&self, path: &str) -> VaultResult<PathBuf> {
        let normalized = normalize_path(path);
        if normalized.is_empty() || normalized.split('/').any(|seg| seg == "..") {
            return Err(VaultError::InvalidPath {
                path: path.to_string(),
            });
        }
        let mut abs = self.root.clone();
        abs.extend(normalized.split('/'));
        Ok(abs)
    }

    /// True for the engine-internal directories that never sync.
    fn is_internal(name: &str) -> bool {
        name == TRASH_DIR || name == CONFIG_DIR
    }
}

fn io_err(path: &str, source: std::io::Error) -> VaultError {
    VaultError::Io {
        path: path.to_string(),
        source,
    }
}

#[async_trait]
impl Vault for FsVault {
    async fn entries(&self) -> VaultResult<Vec<VaultEntry>> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| {
                !(e.depth() == 1
                    && e.file_name()
                        .to_str()
                        .is_some_and(Self::is_internal))
            });

        for entry in walker {
            let entry = entry.map_err(|e| VaultError::Io {
                path: self.root.display().to_string(),
                source: e.into(),
            })?;
            let relative = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if entry.file_type().is_dir() {
                entries.push(VaultEntry::Directory(path));
            } else if entry.file_type().is_file() {
                entries.push(VaultEntry::File(path));
            }
        }
        Ok(entries)
    }

    async fn resolve(&self, path: &str) -> VaultResult<Option<VaultEntry>> {
        let abs = self.absolute(path)?;
        match tokio::fs::metadata(&abs).await {
            Ok(meta) if meta.is_dir() => Ok(Some(VaultEntry::Directory(normalize_path(path)))),
            Ok(_) => Ok(Some(VaultEntry::File(normalize_path(path)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(path, e)),
        }
    }

    async fn read(&self, path: &str, kind: FileKind) -> VaultResult<FileContent> {
        let abs = self.absolute(path)?;
        match kind {
            FileKind::Text => tokio::fs::read_to_string(&abs)
                .await
                .map(FileContent::Text)
                .map_err(|e| io_err(path, e)),
            FileKind::Binary => tokio::fs::read(&abs)
                .await
                .map(FileContent::Binary)
                .map_err(|e| io_err(path, e)),
        }
    }

    async fn create_file(&self, path: &str, content: &FileContent) -> VaultResult<()> {
        let abs = self.absolute(path)?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&abs)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => VaultError::AlreadyExists {
                    path: path.to_string(),
                },
                _ => io_err(path, e),
            })?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_err(path, e))?;
        file.flush().await.map_err(|e| io_err(path, e))
    }

    async fn modify_file(&self, path: &str, content: &FileContent) -> VaultResult<()> {
        let abs = self.absolute(path)?;
        tokio::fs::write(&abs, content.as_bytes())
            .await
            .map_err(|e| io_err(path, e))
    }

    async fn create_folder(&self, path: &str) -> VaultResult<()> {
        let abs = self.absolute(path)?;
        tokio::fs::create_dir(&abs).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => VaultError::AlreadyExists {
                path: path.to_string(),
            },
            _ => io_err(path, e),
        })
    }

    async fn trash(&self, path: &str) -> VaultResult<()> {
        let abs = self.absolute(path)?;
        if tokio::fs::metadata(&abs).await.is_err() {
            return Err(VaultError::NotFound {
                path: path.to_string(),
            });
        }

        let normalized = normalize_path(path);
        let mut target = self.root.join(TRASH_DIR);
        target.extend(normalized.split('/'));
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(path, e))?;
        }

        // Keep prior generations: suffix the target until it is free.
        let mut candidate = target.clone();
        let mut generation = 0u32;
        while tokio::fs::metadata(&candidate).await.is_ok() {
            generation += 1;
            candidate = target.with_file_name(format!(
                "{} {generation}",
                target
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ));
        }

        tokio::fs::rename(&abs, &candidate)
            .await
            .map_err(|e| io_err(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vault() -> (TempDir, FsVault) {
        let dir = TempDir::new().unwrap();
        let vault = FsVault::open(dir.path()).unwrap();
        (dir, vault)
    }

    #[tokio::test]
    async fn create_then_resolve_and_read() {
        let (_dir, vault) = vault();
        vault.create_folder("notes").await.unwrap();
        vault
            .create_file("notes/a.md", &FileContent::Text("hello".into()))
            .await
            .unwrap();

        assert_eq!(
            vault.resolve("notes/a.md").await.unwrap(),
            Some(VaultEntry::File("notes/a.md".into()))
        );
        assert_eq!(
            vault.read("notes/a.md", FileKind::Text).await.unwrap(),
            FileContent::Text("hello".into())
        );
    }

    #[tokio::test]
    async fn create_file_conflicts_on_existing_path() {
        let (_dir, vault) = vault();
        let content = FileContent::Text("x".into());
        vault.create_file("a.md", &content).await.unwrap();

        let err = vault.create_file("a.md", &content).await.unwrap_err();
        assert!(matches!(err, VaultError::AlreadyExists { .. }));

        // Retry as modify succeeds.
        vault
            .modify_file("a.md", &FileContent::Text("y".into()))
            .await
            .unwrap();
        assert_eq!(
            vault.read("a.md", FileKind::Text).await.unwrap(),
            FileContent::Text("y".into())
        );
    }

    #[tokio::test]
    async fn trash_is_recoverable_and_numbered() {
        let (dir, vault) = vault();
        vault
            .create_file("a.md", &FileContent::Text("first".into()))
            .await
            .unwrap();
        vault.trash("a.md").await.unwrap();

        vault
            .create_file("a.md", &FileContent::Text("second".into()))
            .await
            .unwrap();
        vault.trash("a.md").await.unwrap();

        assert!(dir.path().join(".trash/a.md").exists());
        assert!(dir.path().join(".trash/a.md 1").exists());
        assert_eq!(vault.resolve("a.md").await.unwrap(), None);
    }

    #[tokio::test]
    async fn trash_moves_folders_with_contents() {
        let (dir, vault) = vault();
        vault.create_folder("proj").await.unwrap();
        vault
            .create_file("proj/x.md", &FileContent::Text("x".into()))
            .await
            .unwrap();

        vault.trash("proj").await.unwrap();
        assert!(dir.path().join(".trash/proj/x.md").exists());
        assert_eq!(vault.resolve("proj").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_skip_internal_directories() {
        let (dir, vault) = vault();
        vault.create_folder("notes").await.unwrap();
        vault
            .create_file("notes/a.md", &FileContent::Text("a".into()))
            .await
            .unwrap();
        std::fs::create_dir_all(dir.path().join(".trash/old")).unwrap();
        std::fs::create_dir_all(dir.path().join(".vaultsync")).unwrap();

        let entries = vault.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&VaultEntry::Directory("notes".into())));
        assert!(entries.contains(&VaultEntry::File("notes/a.md".into())));
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let (_dir, vault) = vault();
        let err = vault.resolve("../outside").await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidPath { .. }));
        let err = vault.resolve("").await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidPath { .. }));
    }
}
