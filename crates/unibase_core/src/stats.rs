//! Database statistics.
//!
//! Counters are atomic and can be read while operations are in progress.
//!
//! ```rust,ignore
//! let stats = db.stats();
//! println!("creates: {}", stats.creates);
//! println!("listener failures: {}", stats.listener_failures);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters kept by the database façade.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    reads: AtomicU64,
    counts: AtomicU64,
    conflicts: AtomicU64,
    errors: AtomicU64,
    exports: AtomicU64,
    imports: AtomicU64,
}

impl DatabaseStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_create(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_update(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_count(&self) {
        self.counts.fetch_add(1, Ordering::Relaxed);
    }

    /// A create rejected by a uniqueness constraint.
    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_export(&self) {
        self.exports.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_import(&self) {
        self.imports.fetch_add(1, Ordering::Relaxed);
    }

    /// Total successful creates.
    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    /// Total successful updates.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Total successful deletes.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Total point reads and fetches.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Total cursor counts executed.
    pub fn counts(&self) -> u64 {
        self.counts.load(Ordering::Relaxed)
    }

    /// Total creates rejected as duplicates.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Total errors surfaced at the façade boundary.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Total completed exports.
    pub fn exports(&self) -> u64 {
        self.exports.load(Ordering::Relaxed)
    }

    /// Total completed imports.
    pub fn imports(&self) -> u64 {
        self.imports.load(Ordering::Relaxed)
    }
}

/// Counters kept by a storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCounters {
    /// Physical DDL / index statements executed.
    pub ddl_executions: u64,
    /// Count cache hits.
    pub cache_hits: u64,
    /// Count cache misses.
    pub cache_misses: u64,
}

/// A point-in-time snapshot of database statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Total successful creates.
    pub creates: u64,
    /// Total successful updates.
    pub updates: u64,
    /// Total successful deletes.
    pub deletes: u64,
    /// Total point reads and fetches.
    pub reads: u64,
    /// Total cursor counts executed.
    pub counts: u64,
    /// Total creates rejected as duplicates.
    pub conflicts: u64,
    /// Total errors surfaced at the façade boundary.
    pub errors: u64,
    /// Total completed exports.
    pub exports: u64,
    /// Total completed imports.
    pub imports: u64,
    /// Events delivered to at least the dispatch step.
    pub events_published: u64,
    /// Listener invocations that failed or panicked.
    pub listener_failures: u64,
    /// Backend counters.
    pub backend: BackendCounters,
}

impl DatabaseStats {
    /// Returns a snapshot of the façade counters; event and backend counters
    /// are filled in by the caller.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            creates: self.creates(),
            updates: self.updates(),
            deletes: self.deletes(),
            reads: self.reads(),
            counts: self.counts(),
            conflicts: self.conflicts(),
            errors: self.errors(),
            exports: self.exports(),
            imports: self.imports(),
            ..StatsSnapshot::default()
        }
    }
}
