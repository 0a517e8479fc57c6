use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, Serializer};

// ─── Instrumentation key ─────────────────────────────────────────

/// Identifies *what* is being timed — e.g. "frame time on the GPU
/// thread" or "texture upload". Applications define their own values;
/// the core treats them as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrumentationKey(pub u16);

impl Serialize for InstrumentationKey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u16(self.0)
    }
}

impl fmt::Display for InstrumentationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ikey:{}", self.0)
    }
}

// ─── Serialized-bytes values ─────────────────────────────────────

/// Application-state tag attached to a sample (e.g. "loading level 3").
/// The core never interprets the bytes: two annotations are the same
/// annotation iff their serialized representations are byte-equal.
///
/// Internally ref-counted — cloning one is a pointer copy, so pushing
/// the same annotation through the hot path every frame never allocates.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Annotation(Arc<[u8]>);

impl Annotation {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    /// The "no annotation set" value.
    pub fn empty() -> Self {
        Self(Arc::from(&[][..]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Annotation({} bytes)", self.0.len())
    }
}

impl Serialize for Annotation {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(&self.0)
    }
}

/// Serialized description of the quality configuration active when a
/// sample was taken (render resolution, shadow quality, ...). Same
/// byte-equality and cheap-clone semantics as [`Annotation`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FidelityParams(Arc<[u8]>);

impl FidelityParams {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self(bytes.into())
    }

    pub fn empty() -> Self {
        Self(Arc::from(&[][..]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for FidelityParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FidelityParams({} bytes)", self.0.len())
    }
}

impl Serialize for FidelityParams {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(&self.0)
    }
}

// ─── Composite key ───────────────────────────────────────────────

/// The actual bucketing key: one histogram exists per distinct
/// (instrumentation key, annotation, fidelity params) triple within a
/// session. All three components are cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    pub ikey: InstrumentationKey,
    pub annotation: Annotation,
    pub fidelity: FidelityParams,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotations_equal_by_bytes() {
        let a = Annotation::from_bytes(vec![1u8, 2, 3]);
        let b = Annotation::from_bytes(&[1u8, 2, 3][..]);
        let c = Annotation::from_bytes(vec![1u8, 2, 4]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn composite_keys_distinguish_all_components() {
        let base = CompositeKey {
            ikey: InstrumentationKey(1),
            annotation: Annotation::from_bytes(vec![7u8]),
            fidelity: FidelityParams::empty(),
        };
        let other_ikey = CompositeKey {
            ikey: InstrumentationKey(2),
            ..base.clone()
        };
        let other_fidelity = CompositeKey {
            fidelity: FidelityParams::from_bytes(vec![9u8]),
            ..base.clone()
        };
        assert_ne!(base, other_ikey);
        assert_ne!(base, other_fidelity);
        assert_eq!(base, base.clone());
    }
}
