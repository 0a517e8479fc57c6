//! Performance-telemetry aggregation core for real-time render loops.
//!
//! The render thread calls [`Recorder`] at frame cadence; samples are
//! bucketed into fixed-range histograms keyed by (instrumentation key,
//! annotation, fidelity params). A background driver periodically
//! rotates the aggregation window, atomically swapping in a fresh
//! session, and pushes the frozen window through a
//! [`Serializer`] to an [`Uploader`]. Recording never blocks, never
//! allocates after a key's first occurrence, and never reports errors
//! into the render loop: every failure mode is a counter, readable via
//! [`Telemetry::diagnostics`].

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tracing::debug;

pub mod config;
pub mod context;
pub mod histogram;
pub mod keys;
pub mod recorder;
pub mod report;
pub mod rotator;
mod session;
mod table;
pub mod uploader;

pub use config::{ConfigError, HistogramSpec, Settings};
pub use context::{DeviceContext, DeviceContextProvider, NullContextProvider, ThermalState};
pub use histogram::{Histogram, HistogramSnapshot};
pub use keys::{Annotation, CompositeKey, FidelityParams, InstrumentationKey};
pub use recorder::Recorder;
pub use report::{JsonSerializer, ReportEntry, SerializeError, Serializer, SessionReport};
pub use rotator::SessionRotator;
pub use uploader::{ChannelUploader, HandoffError, Uploader};

use session::Session;

// ─── Facade ──────────────────────────────────────────────────────

/// Wires the recorder, the session rotator, and their shared "current
/// session" reference together, and owns the background driver task.
pub struct Telemetry {
    settings: Arc<Settings>,
    current: Arc<ArcSwap<Session>>,
    recorder: Arc<Recorder>,
    rotator: Arc<SessionRotator>,

    /// Handle to the spawned driver so shutdown can await it.
    driver: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Telemetry {
    /// Validates `settings` and builds the core with an empty active
    /// session. Nothing runs in the background until [`start`](Self::start).
    pub fn new(
        settings: Settings,
        provider: Arc<dyn DeviceContextProvider>,
        serializer: Arc<dyn Serializer>,
        uploader: Arc<dyn Uploader>,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let settings = Arc::new(settings);

        let first = Session::new(settings.clone(), provider.snapshot());
        let current = Arc::new(ArcSwap::from_pointee(first));

        let recorder = Arc::new(Recorder::new(current.clone(), settings.sanity_ceiling));
        let rotator = Arc::new(SessionRotator::new(
            current.clone(),
            settings.clone(),
            provider,
            serializer,
            uploader,
        ));

        Ok(Self {
            settings,
            current,
            recorder,
            rotator,
            driver: tokio::sync::Mutex::new(None),
        })
    }

    /// The hot-path handle the render loop records through. Clone the
    /// `Arc` once at startup and keep it on the render thread.
    pub fn recorder(&self) -> Arc<Recorder> {
        self.recorder.clone()
    }

    /// Spawns the periodic rotation driver. Requires a tokio runtime.
    pub async fn start(&self) {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            return;
        }
        let rotator = self.rotator.clone();
        *driver = Some(tokio::spawn(rotator.run()));
        debug!(period = ?self.settings.rotation_period, "telemetry driver started");
    }

    /// Rotates now, off-schedule (app backgrounding, explicit flush).
    /// The rotation runs on the driver task; this call does not block.
    pub fn flush(&self) {
        self.rotator.request_flush();
    }

    /// Rotates synchronously on the calling thread. Intended for
    /// callers that need the hand-off completed before proceeding.
    pub fn flush_blocking(&self) {
        self.rotator.rotate();
    }

    /// The active configuration changed: publish the new params for
    /// subsequent samples and rotate, so histograms recorded under
    /// different configurations never share a session window.
    pub fn on_fidelity_params_changed(&self, params: FidelityParams) {
        self.recorder.set_fidelity(params);
        self.rotator.rotate();
    }

    /// Read-only health snapshot. Safe to poll from any thread.
    pub fn diagnostics(&self) -> Diagnostics {
        let session = self.current.load();
        Diagnostics {
            dropped_samples: self.recorder.dropped_total(),
            paused_discards: self.recorder.paused_discards(),
            table_occupancy: session.table().occupancy(),
            table_capacity: session.table().capacity(),
            session_age: session.age(),
            rotations: self.rotator.rotations(),
            pending_sessions: self.rotator.pending_sessions(),
            sessions_dropped: self.rotator.sessions_dropped(),
            serialize_failures: self.rotator.serialize_failures(),
        }
    }

    /// Stops the driver and attempts one final rotate + hand-off so
    /// the last aggregation window is not lost. Bounded by
    /// [`Settings::shutdown_timeout`]; past that, the in-flight window
    /// is discarded.
    pub async fn shutdown(&self) {
        self.rotator.stop();
        if let Some(handle) = self.driver.lock().await.take() {
            let _ = tokio::time::timeout(self.settings.shutdown_timeout, handle).await;
        }

        let rotator = self.rotator.clone();
        let final_flush = tokio::task::spawn_blocking(move || rotator.rotate());
        if tokio::time::timeout(self.settings.shutdown_timeout, final_flush)
            .await
            .is_err()
        {
            debug!("final flush timed out, last window discarded");
        }
    }
}

// ─── Diagnostics ─────────────────────────────────────────────────

/// Point-in-time health counters. All hot-path failures surface here
/// and nowhere else.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    /// Samples rejected because the composite-key table was full.
    pub dropped_samples: u64,
    /// Samples discarded while frame-time logging was paused.
    pub paused_discards: u64,
    /// Distinct composite keys in the active session.
    pub table_occupancy: usize,
    pub table_capacity: usize,
    /// How long the active session has been accepting samples.
    pub session_age: Duration,
    /// Completed rotations since startup.
    pub rotations: u64,
    /// Frozen windows awaiting serialization/hand-off.
    pub pending_sessions: usize,
    /// Unsent windows dropped by the retention limit.
    pub sessions_dropped: u64,
    pub serialize_failures: u64,
}
