// Per-log processing counters
//
// Counts processed certificates per (operator, normalized URL) plus process
// totals split by entry kind. Readers get copies; the maps are never locked
// across I/O.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// Map of operator name to a map of log URLs to processed-entry counts.
pub type CtCounts = HashMap<String, HashMap<String, u64>>;

#[derive(Debug, Default)]
pub struct LogCounts {
    counts: RwLock<CtCounts>,
    regular: AtomicU64,
    precerts: AtomicU64,
}

impl LogCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a zero-valued counter exists for the log so its metric is
    /// exposed before the first entry arrives.
    pub fn init(&self, operator: &str, url: &str) {
        self.counts
            .write()
            .expect("log counts lock poisoned")
            .entry(operator.to_string())
            .or_default()
            .entry(url.to_string())
            .or_insert(0);
    }

    pub fn inc(&self, operator: &str, url: &str) {
        *self
            .counts
            .write()
            .expect("log counts lock poisoned")
            .entry(operator.to_string())
            .or_default()
            .entry(url.to_string())
            .or_insert(0) += 1;
    }

    pub fn get(&self, operator: &str, url: &str) -> u64 {
        self.counts
            .read()
            .expect("log counts lock poisoned")
            .get(operator)
            .and_then(|urls| urls.get(url))
            .copied()
            .unwrap_or(0)
    }

    /// Copy of the full counter map.
    pub fn snapshot(&self) -> CtCounts {
        self.counts
            .read()
            .expect("log counts lock poisoned")
            .clone()
    }

    pub fn inc_regular(&self) {
        self.regular.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_precert(&self) {
        self.precerts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed_regular(&self) -> u64 {
        self.regular.load(Ordering::Relaxed)
    }

    pub fn processed_precerts(&self) -> u64 {
        self.precerts.load(Ordering::Relaxed)
    }
}
