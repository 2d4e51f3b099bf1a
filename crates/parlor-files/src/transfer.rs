//! Shared pieces of the two transfer directions.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Which way the bytes flow, from the local user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// Status callbacks from a running transfer. Called from the transfer's
/// own task; implementations update a UI and must not block.
pub trait FileTransferListener: Send + Sync {
    /// Registered and waiting for the other side to act.
    fn status_waiting(&self);

    /// Waiting for the data connection to open.
    fn status_connecting(&self);

    /// Bytes are flowing.
    fn status_transferring(&self);

    fn status_completed(&self);

    fn status_failed(&self);

    /// Progress changed; read the counters for the new numbers.
    fn transfer_update(&self);
}

/// Chunks between forced progress callbacks when the percentage has not
/// moved.
pub(crate) const UPDATE_CHUNK_INTERVAL: u64 = 250;

/// Progress counters published by a running transfer.
///
/// Plain atomics so readers on other tasks never see torn values and the
/// transfer loop never takes a lock per chunk.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    transferred: AtomicU64,
    percent: AtomicU32,
}

impl Progress {
    pub(crate) fn transferred(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }

    pub(crate) fn percent(&self) -> u32 {
        self.percent.load(Ordering::Relaxed)
    }

    /// Add a chunk and return whether the percentage moved.
    pub(crate) fn add(&self, bytes: u64, total_size: u64) -> bool {
        let transferred = self.transferred.fetch_add(bytes, Ordering::Relaxed) + bytes;

        let percent = if total_size == 0 {
            100
        } else {
            (transferred * 100 / total_size) as u32
        };

        self.percent.swap(percent, Ordering::Relaxed) != percent
    }

    pub(crate) fn reset(&self) {
        self.transferred.store(0, Ordering::Relaxed);
        self.percent.store(0, Ordering::Relaxed);
    }
}

/// Swappable listener slot shared by both transfer directions.
#[derive(Default)]
pub(crate) struct ListenerSlot {
    listener: RwLock<Option<Arc<dyn FileTransferListener>>>,
}

impl ListenerSlot {
    pub(crate) fn set(&self, listener: Arc<dyn FileTransferListener>) {
        *self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub(crate) fn with<F: Fn(&dyn FileTransferListener)>(&self, f: F) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        if let Some(listener) = listener {
            f(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent_tracks_transferred() {
        let progress = Progress::default();

        assert!(progress.add(512, 2048));
        assert_eq!(progress.transferred(), 512);
        assert_eq!(progress.percent(), 25);

        assert!(progress.add(1536, 2048));
        assert_eq!(progress.percent(), 100);
    }

    #[test]
    fn test_progress_reports_unchanged_percent() {
        let progress = Progress::default();

        assert!(progress.add(10_000, 1_000_000));
        // Far too small to move a whole percent.
        assert!(!progress.add(1, 1_000_000));
    }

    #[test]
    fn test_zero_size_transfer_is_complete_at_once() {
        let progress = Progress::default();

        progress.add(0, 0);
        assert_eq!(progress.percent(), 100);
    }
}
