use serde::Serialize;

// ─── Thermal state ───────────────────────────────────────────────

/// Device thermal status as reported by the platform at session start.
/// The core records it verbatim; interpretation is the backend's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    #[default]
    Unspecified,
    None,
    Light,
    Moderate,
    Severe,
    Critical,
    Emergency,
    Shutdown,
}

// ─── Device context ──────────────────────────────────────────────

/// Snapshot of ambient device state taken once per session, at session
/// creation. Passed in as a value so sessions stay self-contained and
/// testable without a live device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceContext {
    pub thermal: ThermalState,
    /// Battery charge in percent, if the platform exposes it.
    pub battery_pct: Option<u8>,
    pub charging: bool,
    pub power_save: bool,
}

/// Boundary trait for the platform's thermal/battery probes. Called
/// once per rotation, off the render thread, so implementations may
/// read sysfs or call platform APIs freely.
pub trait DeviceContextProvider: Send + Sync {
    fn snapshot(&self) -> DeviceContext;
}

/// Provider used when no device probes are wired in (tests, desktop).
pub struct NullContextProvider;

impl DeviceContextProvider for NullContextProvider {
    fn snapshot(&self) -> DeviceContext {
        DeviceContext::default()
    }
}
