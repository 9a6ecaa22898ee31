//! tally-worker
//!
//! The reconciliation worker: claims batches of NEW orders, polls the accrual
//! authority for each, and settles (credit or invalidate) or requeues them.
//! Settlement writes go through the store's guarded primitives, so a crashed
//! or slow worker pass can never double-credit — at worst an order is
//! reclaimed after its lease and polled again.
//!
//! [`Reconciler::run_batch`] is one deterministic pass and what the tests
//! drive; [`Reconciler::spawn`] wraps it in the interval loop the daemon
//! runs.

pub mod reconciler;

use std::time::Duration;

pub use reconciler::{Reconciler, ReconcilerHandle};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// Orders claimed per pass.
    pub batch_size: i64,
    /// Fixed delay between passes.
    pub poll_interval: Duration,
    /// How long a claim may sit in PROCESSING before the sweep requeues it.
    /// Must comfortably exceed the worst-case pass duration.
    pub claim_lease: chrono::Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(2),
            claim_lease: chrono::Duration::seconds(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch report
// ---------------------------------------------------------------------------

/// What one pass did. Only observability — nothing branches on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Stale claims requeued by the sweep.
    pub swept: usize,
    /// Orders claimed this pass.
    pub claimed: usize,
    /// Orders settled PROCESSED with a credit written.
    pub credited: usize,
    /// Orders settled INVALID.
    pub invalidated: usize,
    /// Claimed orders returned to NEW for a later pass.
    pub requeued: usize,
}

impl BatchReport {
    pub fn is_idle(&self) -> bool {
        *self == BatchReport::default()
    }
}
