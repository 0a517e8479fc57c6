use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::context::DeviceContext;
use crate::histogram::HistogramSnapshot;
use crate::keys::{Annotation, FidelityParams, InstrumentationKey};

// ─── Session report ──────────────────────────────────────────────

/// Immutable view of one frozen session, handed to the serializer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub device: DeviceContext,
    pub histograms: Vec<ReportEntry>,
    /// Samples rejected by the key-table capacity limit during this window.
    pub dropped_samples: u64,
}

/// One (composite key, histogram) pair within a report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub key: InstrumentationKey,
    pub annotation: Annotation,
    pub fidelity: FidelityParams,
    pub histogram: HistogramSnapshot,
}

impl SessionReport {
    /// Total samples across all histograms, including under/overflow.
    pub fn total_count(&self) -> u64 {
        self.histograms.iter().map(|e| e.histogram.total()).sum()
    }
}

// ─── Serializer boundary ─────────────────────────────────────────

#[derive(Debug, Error)]
#[error("session serialization failed: {0}")]
pub struct SerializeError(pub String);

/// Converts a frozen session into an opaque wire payload. The wire
/// format itself is the backend's contract, not the core's; the core
/// only requires that failure is reported so the session can be
/// retained and retried under the rotation retention policy.
pub trait Serializer: Send + Sync {
    fn serialize(&self, report: &SessionReport) -> Result<Vec<u8>, SerializeError>;
}

/// Default serializer: the report as JSON. Good enough for local
/// backends and for tests; protobuf backends plug in their own.
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, report: &SessionReport) -> Result<Vec<u8>, SerializeError> {
        serde_json::to_vec(report).map_err(|e| SerializeError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_report() -> SessionReport {
        SessionReport {
            started_at: Utc::now(),
            ended_at: Utc::now(),
            device: DeviceContext::default(),
            histograms: Vec::new(),
            dropped_samples: 0,
        }
    }

    #[test]
    fn json_serializer_produces_parseable_output() {
        let payload = JsonSerializer.serialize(&empty_report()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert!(value.get("histograms").unwrap().as_array().unwrap().is_empty());
        assert_eq!(value.get("dropped_samples").unwrap().as_u64(), Some(0));
    }
}
