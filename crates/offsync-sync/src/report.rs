//! Result of one bucket synchronization.

use offsync_core::BatchOutcome;

/// What a completed `sync_bucket` did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub bucket: String,
    /// Cached objects changed by the pull.
    pub pulled: usize,
    /// Per-item push outcomes, in submission order.
    pub outcomes: Vec<BatchOutcome>,
}

impl SyncReport {
    /// Push items the remote did not accept as submitted.
    ///
    /// Version conflicts appear here even though the resolver has already
    /// reconciled them locally.
    pub fn failures(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    /// Number of push items accepted.
    pub fn pushed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    /// Whether every pushed item was accepted.
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}
