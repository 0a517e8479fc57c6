use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::config::HistogramSpec;

// ─── Histogram ───────────────────────────────────────────────────

/// Fixed-bucket frequency table over a duration range.
///
/// `n_buckets` equal-width buckets cover `[min, max)`; samples outside
/// the range land in dedicated underflow/overflow counters. Bucket
/// boundaries are fixed at creation.
///
/// Counts are relaxed atomics: exactly one writer (the render thread,
/// via the recorder) increments them, while snapshot readers copy the
/// array without stopping the writer. Within one writer the per-bucket
/// totals are exact; a snapshot taken mid-burst may trail by the
/// samples still in flight, which the session freeze protocol drains
/// before any serialization read.
pub struct Histogram {
    min_ns: u64,
    max_ns: u64,
    buckets: Vec<AtomicU64>,
    underflow: AtomicU64,
    overflow: AtomicU64,
}

impl Histogram {
    /// Builds a histogram from a spec that already passed
    /// [`Settings::validate`](crate::Settings::validate). Degenerate
    /// specs are clamped rather than panicking, keeping every path
    /// reachable from the render thread panic-free.
    pub fn new(spec: &HistogramSpec) -> Self {
        let min_ns = spec.min.as_nanos() as u64;
        let max_ns = (spec.max.as_nanos() as u64).max(min_ns + 1);
        let n = spec.n_buckets.max(1);
        Self {
            min_ns,
            max_ns,
            buckets: (0..n).map(|_| AtomicU64::new(0)).collect(),
            underflow: AtomicU64::new(0),
            overflow: AtomicU64::new(0),
        }
    }

    /// Counts one sample. `bounds[i] <= d < bounds[i+1]` picks bucket
    /// `i`; anything outside `[min, max)` increments underflow or
    /// overflow instead. Never allocates, never blocks, never panics.
    pub fn add(&self, d: Duration) {
        let ns = d.as_nanos() as u64;
        if ns < self.min_ns {
            self.underflow.fetch_add(1, Ordering::Relaxed);
        } else if ns >= self.max_ns {
            self.overflow.fetch_add(1, Ordering::Relaxed);
        } else {
            // (ns - min) / span scaled to bucket count; the in-range
            // check above guarantees idx < n_buckets.
            let span = self.max_ns - self.min_ns;
            let idx =
                ((ns - self.min_ns) as u128 * self.buckets.len() as u128 / span as u128) as usize;
            self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Immutable copy of the current counts. Costs one pass over the
    /// fixed-size bucket array; the writer is never blocked.
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            min_ns: self.min_ns,
            max_ns: self.max_ns,
            counts: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            underflow: self.underflow.load(Ordering::Relaxed),
            overflow: self.overflow.load(Ordering::Relaxed),
        }
    }

    /// Total samples recorded, including underflow/overflow.
    pub fn total_count(&self) -> u64 {
        let in_range: u64 = self
            .buckets
            .iter()
            .map(|b| b.load(Ordering::Relaxed))
            .sum();
        in_range
            + self.underflow.load(Ordering::Relaxed)
            + self.overflow.load(Ordering::Relaxed)
    }
}

// ─── Snapshot ────────────────────────────────────────────────────

/// Frozen copy of a histogram's counts, as serialized into reports.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub min_ns: u64,
    pub max_ns: u64,
    pub counts: Vec<u64>,
    pub underflow: u64,
    pub overflow: u64,
}

impl HistogramSnapshot {
    /// `(lower_bound_ns, upper_bound_ns, count)` per bucket, in order.
    pub fn bucket_ranges(&self) -> impl Iterator<Item = (u64, u64, u64)> + '_ {
        let span = self.max_ns - self.min_ns;
        let n = self.counts.len() as u64;
        self.counts.iter().enumerate().map(move |(i, &count)| {
            let lower = self.min_ns + span * i as u64 / n;
            let upper = self.min_ns + span * (i as u64 + 1) / n;
            (lower, upper, count)
        })
    }

    /// Total samples, including underflow/overflow.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum::<u64>() + self.underflow + self.overflow
    }
}
