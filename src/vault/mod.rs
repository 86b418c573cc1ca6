//! The managed document store contract.
//!
//! The sync engine never touches vault storage directly; everything goes
//! through the [`Vault`] trait so the host can supply its own document
//! collection. [`FsVault`] is the filesystem-backed implementation used by
//! the CLI and by tests.
//!
//! Vault paths are relative, `/`-separated strings. Deletions are always
//! soft: [`Vault::trash`] moves items to a recoverable area, never removes
//! them permanently.

pub mod fs;

pub use fs::FsVault;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from managed-store operations.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("invalid vault path: {path}")]
    InvalidPath { path: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// How a file's content is compared and transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// UTF-8 text, compared as a string.
    Text,
    /// Opaque byte sequence.
    Binary,
}

/// Extensions treated as binary content. Everything else is text.
const BINARY_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "bmp", "webp", "ico", "tiff", "heic",
    // documents
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "odt",
    // archives
    "zip", "tar", "gz", "bz2", "xz", "7z", "rar",
    // audio
    "mp3", "wav", "ogg", "flac", "m4a", "aac",
    // video
    "mp4", "mkv", "avi", "mov", "webm", "wmv",
    // executables and libraries
    "exe", "dll", "so", "dylib", "bin", "wasm",
    // fonts
    "ttf", "otf", "woff", "woff2", "eot",
];

impl FileKind {
    /// Classify a path by extension, case-insensitive.
    pub fn of(path: &str) -> Self {
        let ext = path
            .rsplit(['/', '\\'])
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());

        match ext {
            Some(ext) if BINARY_EXTENSIONS.contains(&ext.as_str()) => FileKind::Binary,
            _ => FileKind::Text,
        }
    }
}

/// File content in its kind-appropriate representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    /// The kind this content was read as.
    pub fn kind(&self) -> FileKind {
        match self {
            FileContent::Text(_) => FileKind::Text,
            FileContent::Binary(_) => FileKind::Binary,
        }
    }

    /// Raw bytes, regardless of representation.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContent::Text(s) => s.as_bytes(),
            FileContent::Binary(b) => b.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// An entry in the vault tree.
///
/// File-or-folder dispatch throughout the engine pattern-matches on this
/// instead of re-inspecting types at every branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEntry {
    File(String),
    Directory(String),
}

impl VaultEntry {
    /// The vault-relative path of this entry.
    pub fn path(&self) -> &str {
        match self {
            VaultEntry::File(p) | VaultEntry::Directory(p) => p,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, VaultEntry::Directory(_))
    }
}

/// The managed store the engine synchronizes against.
///
/// `create_file` and `create_folder` fail with [`VaultError::AlreadyExists`]
/// when the target is present; callers that want upsert semantics retry with
/// `modify_file`.
#[async_trait]
pub trait Vault: Send + Sync {
    /// Enumerate every folder and file in the vault.
    async fn entries(&self) -> VaultResult<Vec<VaultEntry>>;

    /// Resolve a path to an existing entry, or `None`.
    async fn resolve(&self, path: &str) -> VaultResult<Option<VaultEntry>>;

    /// Read a file's content with kind-appropriate decoding.
    async fn read(&self, path: &str, kind: FileKind) -> VaultResult<FileContent>;

    /// Create a new file. Fails if the path already exists.
    async fn create_file(&self, path: &str, content: &FileContent) -> VaultResult<()>;

    /// Overwrite an existing file's content.
    async fn modify_file(&self, path: &str, content: &FileContent) -> VaultResult<()>;

    /// Create a folder. Fails if the path already exists.
    async fn create_folder(&self, path: &str) -> VaultResult<()>;

    /// Move an item (and any contents) to the soft-delete area.
    async fn trash(&self, path: &str) -> VaultResult<()>;
}

/// Normalize a vault path: `\` becomes `/`, leading/trailing separators and
/// empty segments are dropped.
pub fn normalize_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
