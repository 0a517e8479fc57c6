use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::context::DeviceContextProvider;
use crate::report::Serializer;
use crate::session::Session;
use crate::uploader::Uploader;

// ─── Session rotator ─────────────────────────────────────────────

/// Owns session lifecycle: periodically (or on demand) retires the
/// active session, publishes a fresh one for the recorder, and pushes
/// the frozen window through serializer → uploader.
///
/// Frozen sessions that fail to serialize are retained and retried on
/// the next cycle, but only up to `retention_limit`: beyond that the
/// oldest window is dropped. Losing data beats exhausting memory when
/// the backend is down for a long stretch; the drop is counted and
/// visible in diagnostics.
pub struct SessionRotator {
    current: Arc<ArcSwap<Session>>,
    settings: Arc<Settings>,
    provider: Arc<dyn DeviceContextProvider>,
    serializer: Arc<dyn Serializer>,
    uploader: Arc<dyn Uploader>,

    /// Frozen-but-unsent sessions, oldest first.
    pending: Mutex<VecDeque<Arc<Session>>>,

    /// Serializes hand-off drains. Rotations can overlap — the driver
    /// ticks while a caller thread flushes — and two drains walking
    /// `pending` together would upload the front session twice and
    /// then pop a session the second drain never serialized.
    drain_lock: Mutex<()>,

    /// Wakes the driver for an off-schedule rotation.
    flush_signal: Notify,
    running: AtomicBool,

    rotations: AtomicU64,
    sessions_dropped: AtomicU64,
    serialize_failures: AtomicU64,
}

impl SessionRotator {
    pub(crate) fn new(
        current: Arc<ArcSwap<Session>>,
        settings: Arc<Settings>,
        provider: Arc<dyn DeviceContextProvider>,
        serializer: Arc<dyn Serializer>,
        uploader: Arc<dyn Uploader>,
    ) -> Self {
        Self {
            current,
            settings,
            provider,
            serializer,
            uploader,
            pending: Mutex::new(VecDeque::new()),
            drain_lock: Mutex::new(()),
            flush_signal: Notify::new(),
            running: AtomicBool::new(false),
            rotations: AtomicU64::new(0),
            sessions_dropped: AtomicU64::new(0),
            serialize_failures: AtomicU64::new(0),
        }
    }

    /// Retires the active session and attempts hand-off of everything
    /// pending.
    ///
    /// Ordering is the part that matters: the fresh session is
    /// published *before* the old one is frozen, so a record racing
    /// this call either lands in the old session (it got in before
    /// the freeze) or is bounced by the frozen flag and retried by the
    /// recorder against the fresh one. Exactly one session counts it.
    pub fn rotate(&self) {
        let fresh = Arc::new(Session::new(
            self.settings.clone(),
            self.provider.snapshot(),
        ));
        let old = self.current.swap(fresh);
        old.freeze();
        self.rotations.fetch_add(1, Ordering::Relaxed);

        // Windows with no samples and no drops carry no information.
        if old.table().occupancy() == 0 && old.table().dropped_samples() == 0 {
            debug!("discarding empty session");
        } else {
            let mut pending = self.pending.lock();
            pending.push_back(old);
            while pending.len() > self.settings.retention_limit {
                pending.pop_front();
                self.sessions_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("retention limit exceeded, dropped oldest unsent session");
            }
        }

        self.drain_pending();
    }

    /// Serializes and hands off pending sessions, oldest first,
    /// stopping at the first failure so order is preserved for the
    /// next attempt. At most one drain runs at a time; a rotation
    /// landing mid-drain blocks here until the drain in progress has
    /// popped everything it handed off.
    fn drain_pending(&self) {
        let _drain = self.drain_lock.lock();
        loop {
            let Some(session) = self.pending.lock().front().cloned() else {
                return;
            };
            let report = session.report();
            let payload = match self.serializer.serialize(&report) {
                Ok(payload) => payload,
                Err(err) => {
                    self.serialize_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(%err, "serialization failed, session retained for retry");
                    return;
                }
            };
            match self.uploader.submit(payload) {
                Ok(()) => {
                    // Hand-off complete; the uploader owns it now.
                    self.pending.lock().pop_front();
                    debug!(
                        samples = report.total_count(),
                        histograms = report.histograms.len(),
                        "session handed off"
                    );
                }
                Err(err) => {
                    warn!(%err, "uploader unavailable, session retained for retry");
                    return;
                }
            }
        }
    }

    /// Asks the driver to rotate now (fidelity change, backgrounding,
    /// explicit flush).
    pub fn request_flush(&self) {
        self.flush_signal.notify_one();
    }

    // ─── Background driver ──────────────────────────────────────

    /// Periodic rotation loop; runs until [`stop`](Self::stop).
    pub(crate) async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = tokio::time::interval(self.settings.rotation_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a fresh interval completes immediately.
        ticker.tick().await;

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = ticker.tick() => self.rotate(),
                _ = self.flush_signal.notified() => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    self.rotate();
                    ticker.reset();
                }
            }
        }
        debug!("rotation driver stopped");
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.flush_signal.notify_one();
    }

    // ─── Counters for the diagnostics accessor ──────────────────

    pub(crate) fn pending_sessions(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn sessions_dropped(&self) -> u64 {
        self.sessions_dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn serialize_failures(&self) -> u64 {
        self.serialize_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }
}
