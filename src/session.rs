use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::config::Settings;
use crate::context::DeviceContext;
use crate::histogram::Histogram;
use crate::keys::{Annotation, CompositeKey, FidelityParams, InstrumentationKey};
use crate::report::{ReportEntry, SessionReport};
use crate::table::KeyTable;

// ─── Record outcome ──────────────────────────────────────────────

/// What happened to one sample. Only the recorder sees this; nothing
/// here reaches the render loop as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordOutcome {
    Recorded,
    /// Key table at capacity; sample counted as dropped.
    Dropped,
    /// The session was frozen mid-call. The sample was NOT counted;
    /// the caller must retry against the replacement session.
    Frozen,
}

// ─── Session ─────────────────────────────────────────────────────

/// One aggregation window: a key table plus the ambient context that
/// was true when the window opened. Mutated only through
/// [`record_into`](Session::record_into) while active; immutable from
/// the moment [`freeze`](Session::freeze) returns.
pub struct Session {
    started_at: DateTime<Utc>,
    started_mono: Instant,
    ended_at: Mutex<Option<DateTime<Utc>>>,
    device: DeviceContext,
    table: KeyTable,
    settings: Arc<Settings>,
    frozen: AtomicBool,
    /// Writers currently inside `record_into`. `freeze` drains this to
    /// zero before the session may be read without synchronization.
    writers: AtomicUsize,
}

impl Session {
    pub(crate) fn new(settings: Arc<Settings>, device: DeviceContext) -> Self {
        Self {
            started_at: Utc::now(),
            started_mono: Instant::now(),
            ended_at: Mutex::new(None),
            device,
            table: KeyTable::new(settings.table_capacity),
            settings,
            frozen: AtomicBool::new(false),
            writers: AtomicUsize::new(0),
        }
    }

    /// Resolves the composite key and counts the sample.
    ///
    /// The writer-count increment must be visible before the frozen
    /// check, and `freeze` publishes the flag before reading the
    /// count, so a writer either sees `frozen` and backs out or is
    /// seen by the drain loop. SeqCst on both sides keeps that pairing
    /// simple.
    pub(crate) fn record_into(
        &self,
        ikey: InstrumentationKey,
        annotation: &Annotation,
        fidelity: &FidelityParams,
        duration: Duration,
    ) -> RecordOutcome {
        self.writers.fetch_add(1, Ordering::SeqCst);
        if self.frozen.load(Ordering::SeqCst) {
            self.writers.fetch_sub(1, Ordering::SeqCst);
            return RecordOutcome::Frozen;
        }

        let key = CompositeKey {
            ikey,
            annotation: annotation.clone(),
            fidelity: fidelity.clone(),
        };
        let outcome = match self
            .table
            .resolve(&key, || Histogram::new(self.settings.spec_for(ikey)))
        {
            Some(histogram) => {
                histogram.add(duration);
                RecordOutcome::Recorded
            }
            None => RecordOutcome::Dropped,
        };

        self.writers.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    /// Marks the session read-only, stamps the end time, and waits out
    /// any writer already inside `record_into`. Those writers hold the
    /// lock-free fast path for nanoseconds, so the wait is bounded by
    /// a few scheduler yields in the worst case.
    pub(crate) fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
        *self.ended_at.lock() = Some(Utc::now());
        while self.writers.load(Ordering::SeqCst) != 0 {
            std::thread::yield_now();
        }
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Time since this session became active.
    pub fn age(&self) -> Duration {
        self.started_mono.elapsed()
    }

    pub(crate) fn table(&self) -> &KeyTable {
        &self.table
    }

    /// Immutable view for the serializer. Meaningful only after
    /// `freeze`; the rotator never calls it earlier.
    pub(crate) fn report(&self) -> SessionReport {
        debug_assert!(self.is_frozen());
        let ended_at = self.ended_at.lock().unwrap_or_else(Utc::now);
        SessionReport {
            started_at: self.started_at,
            ended_at,
            device: self.device.clone(),
            histograms: self
                .table
                .entries()
                .into_iter()
                .map(|(key, histogram)| ReportEntry {
                    key: key.ikey,
                    annotation: key.annotation,
                    fidelity: key.fidelity,
                    histogram,
                })
                .collect(),
            dropped_samples: self.table.dropped_samples(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DeviceContext;

    fn session() -> Session {
        Session::new(Arc::new(Settings::default()), DeviceContext::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn records_delegate_to_the_table() {
        let s = session();
        let ann = Annotation::from_bytes(vec![1u8]);
        let fid = FidelityParams::empty();
        for _ in 0..5 {
            let outcome = s.record_into(InstrumentationKey(0), &ann, &fid, ms(8));
            assert_eq!(outcome, RecordOutcome::Recorded);
        }
        assert_eq!(s.table().total_count(), 5);
        assert_eq!(s.table().occupancy(), 1);
    }

    #[test]
    fn frozen_session_rejects_writes_without_mutating() {
        let s = session();
        let ann = Annotation::empty();
        let fid = FidelityParams::empty();
        s.record_into(InstrumentationKey(0), &ann, &fid, ms(8));
        s.freeze();

        let outcome = s.record_into(InstrumentationKey(0), &ann, &fid, ms(8));
        assert_eq!(outcome, RecordOutcome::Frozen);
        assert_eq!(s.table().total_count(), 1);
    }

    #[test]
    fn report_carries_every_histogram_and_the_drop_count() {
        let settings = Settings {
            table_capacity: 1,
            ..Settings::default()
        };
        let s = Session::new(Arc::new(settings), DeviceContext::default());
        let fid = FidelityParams::empty();
        s.record_into(
            InstrumentationKey(0),
            &Annotation::from_bytes(vec![1u8]),
            &fid,
            ms(8),
        );
        s.record_into(
            InstrumentationKey(0),
            &Annotation::from_bytes(vec![2u8]),
            &fid,
            ms(8),
        );
        s.freeze();

        let report = s.report();
        assert_eq!(report.histograms.len(), 1);
        assert_eq!(report.dropped_samples, 1);
        assert!(report.ended_at >= report.started_at);
    }
}
