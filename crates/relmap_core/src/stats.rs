//! Engine statistics.
//!
//! Counters for runs and executed commands, shared by every transaction that
//! holds the same [`EngineStats`] handle.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut tx = Transaction::new(store, schema, heap);
//! tx.persist(&user);
//! tx.run()?;
//!
//! let stats = tx.stats().snapshot();
//! println!("Inserts: {}", stats.inserts);
//! println!("Deferred updates: {}", stats.split_updates);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine statistics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct EngineStats {
    // Run counters
    /// Runs started.
    runs_started: AtomicU64,
    /// Runs whose commands all succeeded.
    runs_committed: AtomicU64,
    /// Runs aborted by an error.
    runs_failed: AtomicU64,

    // Command counters
    /// Commands produced by the sequencer.
    commands_planned: AtomicU64,
    /// Executed inserts.
    inserts: AtomicU64,
    /// Executed updates (including deferred ones).
    updates: AtomicU64,
    /// Executed deletes.
    deletes: AtomicU64,
    /// Deferred updates created by cycle splitting.
    split_updates: AtomicU64,
}

impl EngineStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_run_start(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_run_commit(&self) {
        self.runs_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_run_failure(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_planned(&self, commands: usize, splits: usize) {
        self.commands_planned
            .fetch_add(commands as u64, Ordering::Relaxed);
        self.split_updates.fetch_add(splits as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of runs started.
    pub fn runs_started(&self) -> u64 {
        self.runs_started.load(Ordering::Relaxed)
    }

    /// Returns the number of runs committed.
    pub fn runs_committed(&self) -> u64 {
        self.runs_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of failed runs.
    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    /// Returns the number of executed inserts.
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Returns the number of executed updates.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Returns the number of executed deletes.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            runs_started: self.runs_started(),
            runs_committed: self.runs_committed(),
            runs_failed: self.runs_failed(),
            commands_planned: self.commands_planned.load(Ordering::Relaxed),
            inserts: self.inserts(),
            updates: self.updates(),
            deletes: self.deletes(),
            split_updates: self.split_updates.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of engine statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Runs started.
    pub runs_started: u64,
    /// Runs committed.
    pub runs_committed: u64,
    /// Runs failed.
    pub runs_failed: u64,
    /// Commands produced by the sequencer.
    pub commands_planned: u64,
    /// Executed inserts.
    pub inserts: u64,
    /// Executed updates.
    pub updates: u64,
    /// Executed deletes.
    pub deletes: u64,
    /// Deferred updates created by cycle splitting.
    pub split_updates: u64,
}
