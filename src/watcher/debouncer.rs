//! Debouncing for raw external-store events.
//!
//! Editors write files in bursts (save, rewrite, metadata touch), and a
//! file event that fires mid-write would read a partially-written file.
//! Each path's timer resets on every new event; a path becomes ready only
//! after it has been quiet for the configured duration.
//!
//! Entries carry a payload (the sync-root index for the event) that is
//! returned alongside the path when it becomes ready.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Debounces events by path, carrying a payload per pending entry.
#[derive(Debug)]
pub struct Debouncer<T> {
    /// Pending entries: path -> (last event time, payload).
    pending: HashMap<PathBuf, (Instant, T)>,
    /// How long a path must stay quiet before it is ready.
    duration: Duration,
}

impl<T> Debouncer<T> {
    /// Create a debouncer with the given duration in milliseconds.
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            pending: HashMap::new(),
            duration: Duration::from_millis(debounce_ms),
        }
    }

    /// Record an event, resetting the path's timer and replacing its
    /// payload.
    pub fn record(&mut self, path: PathBuf, payload: T) {
        self.pending.insert(path, (Instant::now(), payload));
    }

    /// Drop a pending path (e.g. the file was deleted before it settled).
    pub fn remove(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Take every entry that has been quiet for the debounce duration.
    pub fn take_ready(&mut self) -> Vec<(PathBuf, T)> {
        let now = Instant::now();
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, (last, _))| now.duration_since(*last) >= self.duration)
            .map(|(path, _)| path.clone())
            .collect();

        due.into_iter()
            .filter_map(|path| {
                self.pending
                    .remove(&path)
                    .map(|(_, payload)| (path, payload))
            })
            .collect()
    }

    /// Check if there are any pending entries.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn entry_becomes_ready_after_quiet_period() {
        let mut debouncer = Debouncer::new(50);

        debouncer.record(PathBuf::from("/ext/file.md"), 0usize);
        assert!(debouncer.take_ready().is_empty());
        assert!(debouncer.has_pending());

        sleep(Duration::from_millis(60));

        let ready = debouncer.take_ready();
        assert_eq!(ready, vec![(PathBuf::from("/ext/file.md"), 0)]);
        assert!(!debouncer.has_pending());
    }

    #[test]
    fn new_event_resets_the_timer() {
        let mut debouncer = Debouncer::new(50);

        debouncer.record(PathBuf::from("/ext/file.md"), 0usize);
        sleep(Duration::from_millis(30));
        debouncer.record(PathBuf::from("/ext/file.md"), 1usize);
        sleep(Duration::from_millis(30));

        // 60ms since the first event, only 30ms since the last.
        assert!(debouncer.take_ready().is_empty());

        sleep(Duration::from_millis(30));
        let ready = debouncer.take_ready();
        // The later payload replaced the earlier one.
        assert_eq!(ready, vec![(PathBuf::from("/ext/file.md"), 1)]);
    }

    #[test]
    fn paths_settle_independently() {
        let mut debouncer = Debouncer::new(50);

        debouncer.record(PathBuf::from("/ext/a.md"), 0usize);
        sleep(Duration::from_millis(30));
        debouncer.record(PathBuf::from("/ext/b.md"), 1usize);
        sleep(Duration::from_millis(25));

        let ready = debouncer.take_ready();
        assert_eq!(ready, vec![(PathBuf::from("/ext/a.md"), 0)]);
        assert!(debouncer.has_pending());

        sleep(Duration::from_millis(30));
        let ready = debouncer.take_ready();
        assert_eq!(ready, vec![(PathBuf::from("/ext/b.md"), 1)]);
    }

    #[test]
    fn removed_paths_never_become_ready() {
        let mut debouncer = Debouncer::new(50);

        debouncer.record(PathBuf::from("/ext/file.md"), 0usize);
        debouncer.remove(Path::new("/ext/file.md"));
        assert!(!debouncer.has_pending());

        sleep(Duration::from_millis(60));
        assert!(debouncer.take_ready().is_empty());
    }
}
