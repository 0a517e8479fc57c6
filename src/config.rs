use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::keys::InstrumentationKey;

// ─── Defaults ────────────────────────────────────────────────────

/// Default histogram range: 0–50 ms covers 20–240 Hz frame intervals.
const DEFAULT_HIST_MIN: Duration = Duration::ZERO;
const DEFAULT_HIST_MAX: Duration = Duration::from_millis(50);
const DEFAULT_HIST_BUCKETS: usize = 100;

/// Distinct composite keys one session will track before dropping.
const DEFAULT_TABLE_CAPACITY: usize = 256;

const DEFAULT_ROTATION_PERIOD: Duration = Duration::from_secs(30);

/// Frozen-but-unsent sessions kept when serialization keeps failing.
const DEFAULT_RETENTION_LIMIT: usize = 4;

/// Durations above this are treated as garbage and clamped into the
/// overflow bucket. 10 s is well beyond any plausible frame interval.
const DEFAULT_SANITY_CEILING: Duration = Duration::from_secs(10);

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ─── Histogram spec ──────────────────────────────────────────────

/// Bucket layout for one histogram: `n_buckets` equal-width buckets
/// covering `[min, max)`, with dedicated underflow/overflow counters
/// outside that range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramSpec {
    pub min: Duration,
    pub max: Duration,
    pub n_buckets: usize,
}

impl Default for HistogramSpec {
    fn default() -> Self {
        Self {
            min: DEFAULT_HIST_MIN,
            max: DEFAULT_HIST_MAX,
            n_buckets: DEFAULT_HIST_BUCKETS,
        }
    }
}

impl HistogramSpec {
    pub fn new(min: Duration, max: Duration, n_buckets: usize) -> Self {
        Self { min, max, n_buckets }
    }

    fn validate(&self, key: Option<InstrumentationKey>) -> Result<(), ConfigError> {
        if self.n_buckets == 0 {
            return Err(ConfigError::ZeroBuckets { key });
        }
        if self.min >= self.max {
            return Err(ConfigError::InvertedBounds {
                key,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

// ─── Settings ────────────────────────────────────────────────────

/// Full configuration for the aggregation core. Validated once at
/// construction; after that, every component assumes it is well formed.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bucket layout used for any instrumentation key without an override.
    pub default_histogram: HistogramSpec,

    /// Per-instrumentation-key bucket layouts (e.g. a wider range for
    /// loading-time keys than for frame-time keys).
    pub histogram_overrides: HashMap<InstrumentationKey, HistogramSpec>,

    /// Hard cap on distinct composite keys per session. Once reached,
    /// samples for new keys are dropped and counted, never queued.
    pub table_capacity: usize,

    /// How often the background driver rotates the active session.
    pub rotation_period: Duration,

    /// How many frozen-but-unsent sessions to keep before dropping the
    /// oldest. Bounds memory when the serializer keeps failing.
    pub retention_limit: usize,

    /// Durations above this are clamped into the overflow bucket.
    /// Must be at least every histogram's `max`, so a clamped value
    /// still lands in overflow instead of an interior bucket.
    pub sanity_ceiling: Duration,

    /// Bound on the final flush attempted at shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_histogram: HistogramSpec::default(),
            histogram_overrides: HashMap::new(),
            table_capacity: DEFAULT_TABLE_CAPACITY,
            rotation_period: DEFAULT_ROTATION_PERIOD,
            retention_limit: DEFAULT_RETENTION_LIMIT,
            sanity_ceiling: DEFAULT_SANITY_CEILING,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.default_histogram.validate(None)?;
        self.check_ceiling(None, &self.default_histogram)?;
        for (key, spec) in &self.histogram_overrides {
            spec.validate(Some(*key))?;
            self.check_ceiling(Some(*key), spec)?;
        }
        if self.table_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.rotation_period.is_zero() {
            return Err(ConfigError::ZeroRotationPeriod);
        }
        if self.retention_limit == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ZeroShutdownTimeout);
        }
        Ok(())
    }

    /// A ceiling below a histogram's `max` would clamp a valid slow
    /// sample into an interior bucket instead of overflow.
    fn check_ceiling(
        &self,
        key: Option<InstrumentationKey>,
        spec: &HistogramSpec,
    ) -> Result<(), ConfigError> {
        if self.sanity_ceiling < spec.max {
            return Err(ConfigError::CeilingBelowHistogramMax {
                key,
                ceiling: self.sanity_ceiling,
                max: spec.max,
            });
        }
        Ok(())
    }

    /// Bucket layout for a given instrumentation key.
    pub(crate) fn spec_for(&self, key: InstrumentationKey) -> &HistogramSpec {
        self.histogram_overrides
            .get(&key)
            .unwrap_or(&self.default_histogram)
    }
}

// ─── Errors ──────────────────────────────────────────────────────

/// A malformed configuration. Fatal at construction time — the core
/// refuses to start rather than run with a broken bucket layout.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("histogram spec for {key:?} has zero buckets")]
    ZeroBuckets { key: Option<InstrumentationKey> },

    #[error("histogram spec for {key:?} has inverted bounds: min {min:?} >= max {max:?}")]
    InvertedBounds {
        key: Option<InstrumentationKey>,
        min: Duration,
        max: Duration,
    },

    #[error("composite key table capacity must be non-zero")]
    ZeroCapacity,

    #[error("rotation period must be non-zero")]
    ZeroRotationPeriod,

    #[error("retention limit must be at least 1")]
    ZeroRetention,

    #[error("sanity ceiling {ceiling:?} is below the histogram max {max:?} for {key:?}")]
    CeilingBelowHistogramMax {
        key: Option<InstrumentationKey>,
        ceiling: Duration,
        max: Duration,
    },

    #[error("shutdown timeout must be non-zero")]
    ZeroShutdownTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        assert_eq!(Settings::default().validate(), Ok(()));
    }

    #[test]
    fn zero_buckets_rejected() {
        let mut settings = Settings::default();
        settings.default_histogram.n_buckets = 0;
        assert_eq!(
            settings.validate(),
            Err(ConfigError::ZeroBuckets { key: None })
        );
    }

    #[test]
    fn inverted_bounds_rejected_in_override() {
        let mut settings = Settings::default();
        settings.histogram_overrides.insert(
            InstrumentationKey(3),
            HistogramSpec::new(Duration::from_millis(10), Duration::from_millis(10), 8),
        );
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvertedBounds {
                key: Some(InstrumentationKey(3)),
                ..
            })
        ));
    }

    #[test]
    fn zero_capacity_rejected() {
        let settings = Settings {
            table_capacity: 0,
            ..Settings::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::ZeroCapacity));
    }

    #[test]
    fn ceiling_below_override_max_rejected() {
        let mut settings = Settings::default();
        settings.histogram_overrides.insert(
            InstrumentationKey(4),
            HistogramSpec::new(Duration::ZERO, Duration::from_secs(30), 10),
        );
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::CeilingBelowHistogramMax {
                key: Some(InstrumentationKey(4)),
                ..
            })
        ));

        // Raising the ceiling to cover the widest histogram fixes it.
        settings.sanity_ceiling = Duration::from_secs(30);
        assert_eq!(settings.validate(), Ok(()));
    }

    #[test]
    fn zero_shutdown_timeout_rejected() {
        let settings = Settings {
            shutdown_timeout: Duration::ZERO,
            ..Settings::default()
        };
        assert_eq!(settings.validate(), Err(ConfigError::ZeroShutdownTimeout));
    }

    #[test]
    fn override_lookup_falls_back_to_default() {
        let mut settings = Settings::default();
        let wide = HistogramSpec::new(Duration::ZERO, Duration::from_secs(30), 20);
        settings
            .histogram_overrides
            .insert(InstrumentationKey(9), wide.clone());

        assert_eq!(settings.spec_for(InstrumentationKey(9)), &wide);
        assert_eq!(
            settings.spec_for(InstrumentationKey(1)),
            &settings.default_histogram
        );
    }
}
