use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::keys::{Annotation, FidelityParams, InstrumentationKey};
use crate::session::{RecordOutcome, Session};

// ─── Recorder ────────────────────────────────────────────────────

/// The hot-path API. Lives on the render thread's call path at frame
/// cadence, so every method here obeys three rules: no blocking I/O,
/// no allocation after a composite key's first occurrence, and no
/// error propagation — every failure mode is a counter, readable
/// through the diagnostics accessor.
pub struct Recorder {
    /// The active session, swapped atomically by the rotator.
    current: Arc<ArcSwap<Session>>,

    /// Interned "current annotation", applied to `frame_tick` /
    /// `record_frame_time` calls that do not pass one explicitly.
    annotation: ArcSwap<Annotation>,

    /// Fidelity params in effect; replaced (with a rotation) when the
    /// configuration changes.
    fidelity: ArcSwap<FidelityParams>,

    /// Previous tick instant per instrumentation key.
    last_ticks: Mutex<HashMap<InstrumentationKey, Instant>>,

    paused: AtomicBool,

    // Saturating hot-path failure counters.
    dropped_total: AtomicU64,
    paused_discards: AtomicU64,

    sanity_ceiling: Duration,
}

impl Recorder {
    pub(crate) fn new(current: Arc<ArcSwap<Session>>, sanity_ceiling: Duration) -> Self {
        Self {
            current,
            annotation: ArcSwap::from_pointee(Annotation::empty()),
            fidelity: ArcSwap::from_pointee(FidelityParams::empty()),
            last_ticks: Mutex::new(HashMap::new()),
            paused: AtomicBool::new(false),
            dropped_total: AtomicU64::new(0),
            paused_discards: AtomicU64::new(0),
            sanity_ceiling,
        }
    }

    /// Counts one duration sample against the active session.
    ///
    /// Absurd durations clamp to the sanity ceiling and land in the
    /// overflow bucket; rejecting them would cost a branch-and-report
    /// path the render thread cannot afford. A call racing a rotation
    /// is retried against the replacement session, so each sample
    /// lands in exactly one session.
    pub fn record(
        &self,
        ikey: InstrumentationKey,
        annotation: &Annotation,
        fidelity: &FidelityParams,
        duration: Duration,
    ) {
        if self.paused.load(Ordering::Relaxed) {
            self.paused_discards.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let duration = duration.min(self.sanity_ceiling);

        loop {
            let session = self.current.load();
            match session.record_into(ikey, annotation, fidelity, duration) {
                RecordOutcome::Recorded => return,
                RecordOutcome::Dropped => {
                    self.dropped_total.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                // The rotator publishes the replacement session before
                // freezing the old one, so one reload finds a live
                // session; the loop is bounded by concurrent rotations.
                RecordOutcome::Frozen => continue,
            }
        }
    }

    /// `record` using the interned current annotation and fidelity.
    pub fn record_frame_time(&self, ikey: InstrumentationKey, duration: Duration) {
        let annotation = self.annotation.load();
        let fidelity = self.fidelity.load();
        self.record(ikey, &annotation, &fidelity, duration);
    }

    /// Marks a frame boundary for `ikey` and records the interval
    /// since the previous boundary. The first tick per key only arms
    /// the clock; nothing is recorded.
    pub fn frame_tick(&self, ikey: InstrumentationKey) {
        let now = Instant::now();
        let previous = self.last_ticks.lock().insert(ikey, now);
        if let Some(prev) = previous {
            self.record_frame_time(ikey, now.duration_since(prev));
        }
    }

    /// Records an externally measured frame delta for `ikey` without
    /// touching the tick clock.
    pub fn frame_delta(&self, ikey: InstrumentationKey, duration: Duration) {
        self.record_frame_time(ikey, duration);
    }

    // ─── Current annotation / fidelity ──────────────────────────

    /// Interns the annotation applied to subsequent ticks. Callers
    /// serialize their app state once per state change, not per frame.
    pub fn set_annotation(&self, annotation: Annotation) {
        self.annotation.store(Arc::new(annotation));
    }

    pub fn current_annotation(&self) -> Annotation {
        Annotation::clone(&self.annotation.load())
    }

    pub(crate) fn set_fidelity(&self, fidelity: FidelityParams) {
        self.fidelity.store(Arc::new(fidelity));
        // Tick intervals spanning a fidelity change would mix
        // configurations, so re-arm the clocks.
        self.last_ticks.lock().clear();
    }

    pub fn current_fidelity(&self) -> FidelityParams {
        FidelityParams::clone(&self.fidelity.load())
    }

    // ─── Pause / resume ─────────────────────────────────────────

    /// Stops counting samples (menus, cutscenes, backgrounding).
    /// Discards while paused are tallied separately in diagnostics.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        // Stale tick clocks would record the pause as a frame interval.
        self.last_ticks.lock().clear();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    // ─── Counters for the diagnostics accessor ──────────────────

    pub(crate) fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    pub(crate) fn paused_discards(&self) -> u64 {
        self.paused_discards.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::context::DeviceContext;

    fn recorder_with_settings(settings: Settings) -> Recorder {
        let settings = Arc::new(settings);
        let session = Session::new(settings.clone(), DeviceContext::default());
        let current = Arc::new(ArcSwap::from_pointee(session));
        Recorder::new(current, settings.sanity_ceiling)
    }

    fn recorder() -> Recorder {
        recorder_with_settings(Settings::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn absurd_durations_clamp_into_overflow() {
        let r = recorder();
        r.record_frame_time(InstrumentationKey(0), Duration::from_secs(3600));

        let session = r.current.load();
        let entries = session.table().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.overflow, 1);
        assert_eq!(entries[0].1.counts.iter().sum::<u64>(), 0);
    }

    #[test]
    fn wide_override_buckets_slow_samples_correctly() {
        let key = InstrumentationKey(9);
        let mut settings = Settings {
            sanity_ceiling: Duration::from_secs(30),
            ..Settings::default()
        };
        settings.histogram_overrides.insert(
            key,
            crate::config::HistogramSpec::new(Duration::ZERO, Duration::from_secs(30), 3),
        );
        assert!(settings.validate().is_ok());

        // 25 s is a valid sample for a 30 s loading-time histogram: it
        // must land in the last in-range bucket, not overflow.
        let r = recorder_with_settings(settings);
        r.record_frame_time(key, Duration::from_secs(25));

        let session = r.current.load();
        let entries = session.table().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.counts, vec![0, 0, 1]);
        assert_eq!(entries[0].1.overflow, 0);
    }

    #[test]
    fn paused_recorder_discards_and_counts() {
        let r = recorder();
        r.pause();
        r.record_frame_time(InstrumentationKey(0), ms(8));
        r.record_frame_time(InstrumentationKey(0), ms(9));
        assert_eq!(r.paused_discards(), 2);
        assert_eq!(r.current.load().table().total_count(), 0);

        r.resume();
        r.record_frame_time(InstrumentationKey(0), ms(8));
        assert_eq!(r.current.load().table().total_count(), 1);
        assert_eq!(r.paused_discards(), 2);
    }

    #[test]
    fn first_frame_tick_only_arms_the_clock() {
        let r = recorder();
        let key = InstrumentationKey(7);
        r.frame_tick(key);
        assert_eq!(r.current.load().table().total_count(), 0);
        r.frame_tick(key);
        assert_eq!(r.current.load().table().total_count(), 1);
    }

    #[test]
    fn capacity_exhaustion_counts_dropped_samples() {
        let r = recorder_with_settings(Settings {
            table_capacity: 1,
            ..Settings::default()
        });
        let fid = FidelityParams::empty();
        r.record(
            InstrumentationKey(0),
            &Annotation::from_bytes(vec![1u8]),
            &fid,
            ms(8),
        );
        r.record(
            InstrumentationKey(0),
            &Annotation::from_bytes(vec![2u8]),
            &fid,
            ms(8),
        );
        assert_eq!(r.dropped_total(), 1);
        assert_eq!(r.current.load().table().total_count(), 1);
    }

    #[test]
    fn annotation_changes_split_histograms() {
        let r = recorder();
        let key = InstrumentationKey(0);
        r.set_annotation(Annotation::from_bytes(&b"loading"[..]));
        r.record_frame_time(key, ms(8));
        r.set_annotation(Annotation::from_bytes(&b"playing"[..]));
        r.record_frame_time(key, ms(8));

        assert_eq!(r.current.load().table().occupancy(), 2);
    }
}
