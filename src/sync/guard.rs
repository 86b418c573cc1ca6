//! Reentrancy guard between the two sync directions.
//!
//! A single process-wide advisory flag: engaged before any sync-triggered
//! write, cleared a settle delay after the write finishes. While engaged,
//! the watch service discards all external events and the sync-on-write
//! entry points skip outbound propagation, so the engine's own writes never
//! bounce back as fresh changes.
//!
//! This is a coarse flag, not a lock: external changes that genuinely occur
//! inside the settle window are dropped, not queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::sleep;

/// Shared change guard. Clones observe the same flag.
#[derive(Debug, Clone)]
pub struct ChangeGuard {
    held: Arc<AtomicBool>,
    settle: Duration,
}

impl ChangeGuard {
    /// Create a guard with the given settle delay in milliseconds.
    pub fn new(settle_ms: u64) -> Self {
        Self {
            held: Arc::new(AtomicBool::new(false)),
            settle: Duration::from_millis(settle_ms),
        }
    }

    /// True while sync-triggered writes are in flight or settling.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Engage the guard before a sync-triggered write.
    pub fn engage(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Schedule release after the settle delay.
    ///
    /// The delay lets trailing filesystem notifications for the write drain
    /// out of the event queue before inbound handling resumes. Overlapping
    /// engage/release pairs collapse onto the single flag; the earliest
    /// scheduled release wins (accepted coarseness).
    pub fn release_after_settle(&self) {
        let held = Arc::clone(&self.held);
        let settle = self.settle;
        tokio::spawn(async move {
            sleep(settle).await;
            held.store(false, Ordering::SeqCst);
        });
    }

    /// Release immediately. Used at engine teardown.
    pub fn release_now(&self) {
        self.held.store(false, Ordering::SeqCst);
    }
}
