//! External-store watch service.
//!
//! Owns the filesystem watch on every sync root, debounces event bursts,
//! classifies raw events, and dispatches them to inbound sync.
//!
//! # Architecture
//!
//! ```text
//! WatchService
//!   - Single notify::RecommendedWatcher
//!   - Per-root state: Recursive or PerDirectory fallback
//!   - Shared Debouncer (payload = sync root index)
//!   - Dispatches to InboundSync
//! ```
//!
//! Recursive watching is attempted first; when the platform rejects it the
//! service falls back to individually watching the root and every
//! subdirectory, registering new watches as directories appear.

mod debouncer;
mod error;
mod service;

pub use debouncer::Debouncer;
pub use error::WatchError;
pub use service::WatchService;
