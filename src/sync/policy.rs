//! Path participation policy and managed/external path mapping.
//!
//! Pure functions over the current [`SyncConfig`]: whether a vault path
//! takes part in sync, where it lands in the external tree, and the inverse
//! mapping used by inbound sync. External folders are substituted by
//! basename: a vault path whose top segment matches a configured external
//! folder's basename maps under that folder's real root instead of the
//! external root.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{SyncConfig, SyncMode};
use crate::vault::FileKind;

/// A resolved external directory and the vault prefix it mirrors.
///
/// The external root maps with an empty prefix; each configured external
/// folder maps with its basename as prefix. All inbound traversal and
/// watching iterates over these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRoot {
    /// Absolute external directory.
    pub external: PathBuf,
    /// Vault path prefix (`""` for the external root).
    pub prefix: String,
}

impl SyncRoot {
    /// Map an external-relative path back to its vault path.
    pub fn managed_path(&self, relative: &Path) -> String {
        let rel = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        match (self.prefix.is_empty(), rel.is_empty()) {
            (true, _) => rel,
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}/{rel}", self.prefix),
        }
    }
}

/// Decides sync participation and computes external counterparts.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    config: Arc<SyncConfig>,
}

impl PathPolicy {
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self { config }
    }

    /// Whether a vault path participates in synchronization.
    ///
    /// In all-except-excluded mode, true unless the path is under an
    /// excluded prefix. In include-list mode, true iff the path is under an
    /// included prefix (empty prefix = wildcard) or under a top-level folder
    /// mapped to an external folder.
    pub fn should_sync(&self, path: &str) -> bool {
        match self.config.mode {
            SyncMode::AllExceptExcluded => !self
                .config
                .excluded_paths
                .iter()
                .any(|prefix| is_segment_prefix(prefix, path)),
            SyncMode::IncludeListOnly => {
                self.config
                    .included_paths
                    .iter()
                    .any(|prefix| prefix.is_empty() || is_segment_prefix(prefix, path))
                    || self.top_segment_is_external_folder(path)
            }
        }
    }

    /// External counterpart of a vault path, or `None` when no external root
    /// is configured.
    pub fn external_path(&self, managed_path: &str) -> Option<PathBuf> {
        let root = self.config.external_root.as_ref()?;
        let mut segments = segments(managed_path);
        let top = segments.next()?;

        for folder in &self.config.external_folders {
            if folder.file_name().and_then(|n| n.to_str()) == Some(top) {
                let mut out = folder.clone();
                out.extend(segments);
                return Some(out);
            }
        }

        let mut out = root.clone();
        out.push(top);
        out.extend(segments);
        Some(out)
    }

    /// Every external directory the engine mirrors, with its vault prefix.
    ///
    /// Empty when no external root is configured.
    pub fn sync_roots(&self) -> Vec<SyncRoot> {
        let Some(root) = &self.config.external_root else {
            return Vec::new();
        };
        let mut roots = vec![SyncRoot {
            external: root.clone(),
            prefix: String::new(),
        }];
        for folder in &self.config.external_folders {
            if let Some(name) = folder.file_name().and_then(|n| n.to_str()) {
                roots.push(SyncRoot {
                    external: folder.clone(),
                    prefix: name.to_string(),
                });
            }
        }
        roots
    }

    /// Content kind for a vault path.
    pub fn file_kind(&self, path: &str) -> FileKind {
        FileKind::of(path)
    }

    fn top_segment_is_external_folder(&self, path: &str) -> bool {
        let Some(top) = segments(path).next() else {
            return false;
        };
        self.config
            .external_folders
            .iter()
            .any(|folder| folder.file_name().and_then(|n| n.to_str()) == Some(top))
    }
}

/// Split a path on either separator, dropping empty segments.
fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\']).filter(|s| !s.is_empty())
}

/// Segment-wise prefix test, accepting `/` and `\` in either argument.
fn is_segment_prefix(prefix: &str, path: &str) -> bool {
    let mut pre = segments(prefix);
    let mut pat = segments(path);
    loop {
        match (pre.next(), pat.next()) {
            (None, _) => return true,
            (Some(a), Some(b)) if a == b => continue,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexSet;

    fn config() -> SyncConfig {
        SyncConfig {
            external_root: Some(PathBuf::from("/mirror")),
            ..SyncConfig::default()
        }
    }

    fn policy(config: SyncConfig) -> PathPolicy {
        PathPolicy::new(Arc::new(config))
    }

    #[test]
    fn excluded_prefixes_match_whole_segments() {
        let mut cfg = config();
        cfg.excluded_paths = IndexSet::from(["private".to_string()]);
        let policy = policy(cfg);

        assert!(!policy.should_sync("private/note.md"));
        assert!(!policy.should_sync("private"));
        // "privateer" shares a string prefix but not a segment.
        assert!(policy.should_sync("privateer/note.md"));
        assert!(policy.should_sync("notes/private.md"));
    }

    #[test]
    fn accepts_backslash_separated_forms() {
        let mut cfg = config();
        cfg.excluded_paths = IndexSet::from(["a\\b".to_string()]);
        let policy = policy(cfg);

        assert!(!policy.should_sync("a/b/c.md"));
        assert!(!policy.should_sync("a\\b\\c.md"));
        assert!(policy.should_sync("a/c/b.md"));
    }

    #[test]
    fn include_list_mode_requires_membership() {
        let mut cfg = config();
        cfg.mode = SyncMode::IncludeListOnly;
        cfg.included_paths = IndexSet::from(["work".to_string()]);
        let policy = policy(cfg);

        assert!(policy.should_sync("work/plan.md"));
        assert!(!policy.should_sync("personal/plan.md"));
    }

    #[test]
    fn empty_include_prefix_is_wildcard() {
        let mut cfg = config();
        cfg.mode = SyncMode::IncludeListOnly;
        cfg.included_paths = IndexSet::from([String::new()]);
        let policy = policy(cfg);

        assert!(policy.should_sync("anything/at/all.md"));
    }

    #[test]
    fn include_list_mode_admits_external_folder_tops() {
        let mut cfg = config();
        cfg.mode = SyncMode::IncludeListOnly;
        cfg.external_folders = vec![PathBuf::from("/elsewhere/shared")];
        let policy = policy(cfg);

        assert!(policy.should_sync("shared/doc.md"));
        assert!(!policy.should_sync("other/doc.md"));
    }

    #[test]
    fn external_path_concatenates_under_root() {
        let policy = policy(config());
        assert_eq!(
            policy.external_path("notes/a.md"),
            Some(PathBuf::from("/mirror/notes/a.md"))
        );
    }

    #[test]
    fn external_path_substitutes_mapped_folders() {
        let mut cfg = config();
        cfg.external_folders = vec![PathBuf::from("/elsewhere/shared")];
        let policy = policy(cfg);

        assert_eq!(
            policy.external_path("shared/doc.md"),
            Some(PathBuf::from("/elsewhere/shared/doc.md"))
        );
        assert_eq!(
            policy.external_path("notes/doc.md"),
            Some(PathBuf::from("/mirror/notes/doc.md"))
        );
    }

    #[test]
    fn external_path_requires_configured_root() {
        let policy = policy(SyncConfig::default());
        assert_eq!(policy.external_path("notes/a.md"), None);
    }

    #[test]
    fn sync_roots_cover_root_and_folders() {
        let mut cfg = config();
        cfg.external_folders = vec![PathBuf::from("/elsewhere/shared")];
        let policy = policy(cfg);

        let roots = policy.sync_roots();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].prefix, "");
        assert_eq!(roots[1].prefix, "shared");
        assert_eq!(roots[1].external, PathBuf::from("/elsewhere/shared"));
    }

    #[test]
    fn sync_root_maps_relative_paths_back() {
        let root = SyncRoot {
            external: PathBuf::from("/mirror"),
            prefix: String::new(),
        };
        assert_eq!(root.managed_path(Path::new("a/b.md")), "a/b.md");

        let folder = SyncRoot {
            external: PathBuf::from("/elsewhere/shared"),
            prefix: "shared".to_string(),
        };
        assert_eq!(folder.managed_path(Path::new("doc.md")), "shared/doc.md");
        assert_eq!(folder.managed_path(Path::new("")), "shared");
    }
}
