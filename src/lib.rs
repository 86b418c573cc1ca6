//! Bidirectional mirror between a document vault and a plain external folder.
//!
//! The engine keeps two independently-mutable trees consistent without a
//! shared transaction log: outbound propagation pushes vault mutations to the
//! external folder, inbound propagation applies filesystem change events (or
//! full rescans) back into the vault, and a shared change guard keeps the two
//! directions from re-triggering each other.

pub mod config;
pub mod logging;
pub mod sync;
pub mod vault;
pub mod watcher;

pub use config::{LoggingConfig, Settings, SyncConfig, SyncMode};
pub use sync::{
    AlwaysConfirm, ChangeGuard, DeletePrompt, InboundSync, NeverConfirm, OutboundSync, PathPolicy,
    SyncEngine, SyncError, SyncResult, SyncRoot,
};
pub use vault::{FileContent, FileKind, FsVault, Vault, VaultEntry, VaultError, VaultResult};
pub use watcher::{WatchError, WatchService};
