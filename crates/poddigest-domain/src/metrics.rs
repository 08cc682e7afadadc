//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a worker tick).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters — no allocations, no locking.
pub struct Metrics {
    episodes_transcribed: AtomicU64,
    clips_selected: AtomicU64,
    digests_completed: AtomicU64,
    digests_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            episodes_transcribed: AtomicU64::new(0),
            clips_selected: AtomicU64::new(0),
            digests_completed: AtomicU64::new(0),
            digests_failed: AtomicU64::new(0),
        }
    }

    /// Increment the episodes-transcribed counter by one.
    pub fn inc_episodes_transcribed(&self) {
        self.episodes_transcribed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "episodes_transcribed", "counter incremented");
    }

    /// Increment the clips-selected counter by `count`.
    pub fn add_clips_selected(&self, count: u64) {
        self.clips_selected.fetch_add(count, Ordering::Relaxed);
        tracing::trace!(metric = "clips_selected", "counter incremented");
    }

    /// Increment the digests-completed counter by one.
    pub fn inc_digests_completed(&self) {
        self.digests_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "digests_completed", "counter incremented");
    }

    /// Increment the digests-failed counter by one.
    pub fn inc_digests_failed(&self) {
        self.digests_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "digests_failed", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a digest run, daemon tick,
    /// etc.) rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            episodes_transcribed = self.episodes_transcribed(),
            clips_selected = self.clips_selected(),
            digests_completed = self.digests_completed(),
            digests_failed = self.digests_failed(),
        );
    }

    /// Read the current episodes-transcribed count.
    pub fn episodes_transcribed(&self) -> u64 {
        self.episodes_transcribed.load(Ordering::Relaxed)
    }

    /// Read the current clips-selected count.
    pub fn clips_selected(&self) -> u64 {
        self.clips_selected.load(Ordering::Relaxed)
    }

    /// Read the current digests-completed count.
    pub fn digests_completed(&self) -> u64 {
        self.digests_completed.load(Ordering::Relaxed)
    }

    /// Read the current digests-failed count.
    pub fn digests_failed(&self) -> u64 {
        self.digests_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.episodes_transcribed.store(0, Ordering::Relaxed);
        self.clips_selected.store(0, Ordering::Relaxed);
        self.digests_completed.store(0, Ordering::Relaxed);
        self.digests_failed.store(0, Ordering::Relaxed);
    }
}
