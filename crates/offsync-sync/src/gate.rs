//! Coordination between synchronization and local CRUD.
//!
//! The gate is asymmetric. CRUD never waits: it enters immediately or fails
//! immediately while a sync holds the gate. A sync never queues behind
//! another sync, but once it holds the gate it waits for in-flight CRUD to
//! drain before proceeding.
//!
//! The gate is an ordinary value. Share one `Arc<ConcurrencyGate>` between
//! the components that must exclude each other; independent instances do
//! not interact.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Single-sync, many-CRUD admission gate.
#[derive(Debug, Default)]
pub struct ConcurrencyGate {
    syncing: AtomicBool,
    crud_count: AtomicUsize,
    /// Signalled when `crud_count` drops to zero.
    drained: Notify,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a CRUD section. Returns `false` without waiting if a sync
    /// holds the gate.
    pub fn try_start_crud(&self) -> bool {
        if self.syncing.load(Ordering::SeqCst) {
            return false;
        }

        self.crud_count.fetch_add(1, Ordering::SeqCst);

        // A sync may have taken the gate between the check and the
        // increment. Back out so it is not left waiting on us.
        if self.syncing.load(Ordering::SeqCst) {
            self.end_crud();
            return false;
        }

        true
    }

    /// Leave a CRUD section entered with [`try_start_crud`](Self::try_start_crud).
    pub fn end_crud(&self) {
        match self
            .crud_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(1) => self.drained.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::warn!("end_crud called with no CRUD in flight"),
        }
    }

    /// Take the gate for a synchronization pass.
    ///
    /// Returns `false` immediately if another sync holds or is acquiring the
    /// gate. Otherwise blocks new CRUD at once, then waits (without
    /// spinning) until in-flight CRUD has drained.
    pub async fn try_start_sync(&self) -> bool {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        // Dropping this future mid-drain must not leave the gate held.
        let acquiring = ReleaseOnDrop(self);

        loop {
            // Create the notification future before checking the count so a
            // drain between the check and the await is not missed.
            let notified = self.drained.notified();
            if self.crud_count.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }

        std::mem::forget(acquiring);
        true
    }

    /// Release the gate taken by [`try_start_sync`](Self::try_start_sync).
    ///
    /// Wakes nothing: CRUD callers re-check on their next attempt.
    pub fn end_sync(&self) {
        self.syncing.store(false, Ordering::SeqCst);
    }

    /// Enter a CRUD section for the lifetime of the returned guard.
    pub fn crud_guard(&self) -> Option<CrudGuard<'_>> {
        self.try_start_crud().then_some(CrudGuard { gate: self })
    }

    /// Take the gate for the lifetime of the returned guard.
    pub async fn sync_guard(&self) -> Option<SyncGuard<'_>> {
        if self.try_start_sync().await {
            Some(SyncGuard { gate: self })
        } else {
            None
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// CRUD sections currently in flight.
    pub fn crud_count(&self) -> usize {
        self.crud_count.load(Ordering::SeqCst)
    }
}

struct ReleaseOnDrop<'a>(&'a ConcurrencyGate);

impl Drop for ReleaseOnDrop<'_> {
    fn drop(&mut self) {
        self.0.end_sync();
    }
}

/// An admitted CRUD section. Dropping it calls `end_crud`.
#[must_use = "the CRUD section ends when the guard is dropped"]
#[derive(Debug)]
pub struct CrudGuard<'a> {
    gate: &'a ConcurrencyGate,
}

impl Drop for CrudGuard<'_> {
    fn drop(&mut self) {
        self.gate.end_crud();
    }
}

/// A held sync gate. Dropping it calls `end_sync`.
#[must_use = "the gate is released when the guard is dropped"]
#[derive(Debug)]
pub struct SyncGuard<'a> {
    gate: &'a ConcurrencyGate,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.gate.end_sync();
    }
}
