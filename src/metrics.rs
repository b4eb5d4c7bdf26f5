// Run metrics module
//
// Counts collector recomputations and job outcomes for one invocation

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Per-invocation counters
///
/// Uses atomic operations so dispatcher workers can record job outcomes
/// without locks. The cache tests read the recomputation counters to prove
/// that an unchanged package database and rule tree cause no rework.
#[derive(Debug)]
pub struct Metrics {
    /// Number of times the ignore rule tree was compiled
    pub pattern_compilations: AtomicU64,

    /// Number of times the package database was collected
    pub package_collections: AtomicU64,

    /// Number of system tree walks
    pub system_walks: AtomicU64,

    /// Cache files loaded successfully
    pub cache_loads: AtomicU64,

    /// Cache files written
    pub cache_stores: AtomicU64,

    /// Jobs that ran to completion (subprocess or function)
    pub jobs_run: AtomicU64,

    /// Jobs that captured a failure
    pub jobs_failed: AtomicU64,

    /// Total time spent inside jobs in milliseconds
    pub total_job_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            pattern_compilations: AtomicU64::new(0),
            package_collections: AtomicU64::new(0),
            system_walks: AtomicU64::new(0),
            cache_loads: AtomicU64::new(0),
            cache_stores: AtomicU64::new(0),
            jobs_run: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_job_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_pattern_compilation(&self) {
        self.pattern_compilations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_package_collection(&self) {
        self.package_collections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_system_walk(&self) {
        self.system_walks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_load(&self) {
        self.cache_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_store(&self) {
        self.cache_stores.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished job and how long it took
    pub fn record_job(&self, duration: Duration, failed: bool) {
        self.jobs_run.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_job_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Collector recomputations (patterns + packages) so far
    pub fn recomputations(&self) -> u64 {
        self.pattern_compilations.load(Ordering::Relaxed)
            + self.package_collections.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::debug!(
            "Run took {:.2}s: {} pattern compilations, {} package collections, {} system walks",
            self.uptime().as_secs_f64(),
            self.pattern_compilations.load(Ordering::Relaxed),
            self.package_collections.load(Ordering::Relaxed),
            self.system_walks.load(Ordering::Relaxed)
        );
        tracing::debug!(
            "Cache: {} loads, {} stores; jobs: {} run, {} failed, {:.2}s total",
            self.cache_loads.load(Ordering::Relaxed),
            self.cache_stores.load(Ordering::Relaxed),
            self.jobs_run.load(Ordering::Relaxed),
            self.jobs_failed.load(Ordering::Relaxed),
            self.total_job_time_ms.load(Ordering::Relaxed) as f64 / 1000.0
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
