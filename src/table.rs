use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::histogram::{Histogram, HistogramSnapshot};
use crate::keys::CompositeKey;

// ─── Instrumentation key table ───────────────────────────────────

/// Maps composite keys to their histograms, creating entries lazily up
/// to a hard capacity. Annotations and fidelity params are application
/// controlled, so the key space is open-ended; once the table is full,
/// samples for unseen keys are dropped and counted rather than letting
/// a buggy annotation generator exhaust memory.
///
/// The mutex covers only map lookup/insert. Histograms are handed out
/// as `Arc`s and mutated outside the lock, so the critical section is
/// a hash probe plus, on first occurrence of a key, one histogram
/// allocation.
pub struct KeyTable {
    capacity: usize,
    map: Mutex<HashMap<CompositeKey, Arc<Histogram>>>,
    dropped: AtomicU64,
}

impl KeyTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: Mutex::new(HashMap::with_capacity(capacity.min(64))),
            dropped: AtomicU64::new(0),
        }
    }

    /// Histogram for `key`, created on first use via `make`. Returns
    /// `None` — and counts a dropped sample — when the key is unseen
    /// and the table is at capacity.
    pub fn resolve(
        &self,
        key: &CompositeKey,
        make: impl FnOnce() -> Histogram,
    ) -> Option<Arc<Histogram>> {
        let mut map = self.map.lock();
        if let Some(h) = map.get(key) {
            return Some(h.clone());
        }
        if map.len() >= self.capacity {
            drop(map);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let h = Arc::new(make());
        map.insert(key.clone(), h.clone());
        Some(h)
    }

    /// Distinct composite keys currently tracked.
    pub fn occupancy(&self) -> usize {
        self.map.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples rejected because the table was full.
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copies out every (key, snapshot) pair for serialization.
    pub fn entries(&self) -> Vec<(CompositeKey, HistogramSnapshot)> {
        self.map
            .lock()
            .iter()
            .map(|(k, h)| (k.clone(), h.snapshot()))
            .collect()
    }

    /// Sum of sample counts across all histograms.
    pub fn total_count(&self) -> u64 {
        self.map.lock().values().map(|h| h.total_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::HistogramSpec;
    use crate::keys::{Annotation, FidelityParams, InstrumentationKey};

    fn key(n: u8) -> CompositeKey {
        CompositeKey {
            ikey: InstrumentationKey(0),
            annotation: Annotation::from_bytes(vec![n]),
            fidelity: FidelityParams::empty(),
        }
    }

    fn make() -> Histogram {
        Histogram::new(&HistogramSpec::default())
    }

    #[test]
    fn same_key_resolves_to_same_histogram() {
        let table = KeyTable::new(8);
        let a = table.resolve(&key(1), make).unwrap();
        a.add(Duration::from_millis(5));
        let b = table.resolve(&key(1), make).unwrap();
        assert_eq!(b.total_count(), 1);
        assert_eq!(table.occupancy(), 1);
    }

    #[test]
    fn capacity_limit_rejects_new_keys_and_counts_drops() {
        let table = KeyTable::new(2);
        assert!(table.resolve(&key(1), make).is_some());
        assert!(table.resolve(&key(2), make).is_some());

        // Third distinct key is refused, again and again.
        assert!(table.resolve(&key(3), make).is_none());
        assert!(table.resolve(&key(3), make).is_none());
        assert_eq!(table.occupancy(), 2);
        assert_eq!(table.dropped_samples(), 2);

        // Known keys still resolve at capacity.
        assert!(table.resolve(&key(1), make).is_some());
        assert_eq!(table.dropped_samples(), 2);
    }

    #[test]
    fn entries_snapshot_every_key() {
        let table = KeyTable::new(8);
        table
            .resolve(&key(1), make)
            .unwrap()
            .add(Duration::from_millis(1));
        table
            .resolve(&key(2), make)
            .unwrap()
            .add(Duration::from_millis(2));

        let entries = table.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().map(|(_, s)| s.total()).sum::<u64>(), 2);
        assert_eq!(table.total_count(), 2);
    }
}
