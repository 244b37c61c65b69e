//! Decoded animation representations and the tagged union the rest of the
//! pipeline operates on.
//!
//! Exactly one variant is ever "the current animation"; swapping variants is
//! atomic from a consumer's point of view because the store publishes a new
//! `Arc<Animation>` only after the old one is fully torn down.

pub mod binary;
pub mod sequence;
pub mod vector;

use crate::foundation::core::VideoSize;

/// One decoded animation, in whichever representation the resolver produced.
#[derive(Debug)]
pub enum Animation {
    /// Declarative vector scene plus a named bitmap atlas.
    Vector(vector::VectorBundle),
    /// Compact binary container: raster frames, fps, optional audio tracks.
    Binary(binary::BinaryEntity),
    /// Raw frame sequence with per-frame delays.
    Sequence(sequence::FrameSequence),
}

impl Animation {
    pub fn kind(&self) -> CachedKind {
        match self {
            Animation::Vector(_) => CachedKind::Vector,
            Animation::Binary(_) => CachedKind::Binary,
            Animation::Sequence(_) => CachedKind::Sequence,
        }
    }

    pub fn size(&self) -> VideoSize {
        match self {
            Animation::Vector(v) => v.scene.size,
            Animation::Binary(b) => b.size,
            Animation::Sequence(s) => s.size(),
        }
    }

    pub fn frame_count(&self) -> u64 {
        match self {
            Animation::Vector(v) => v.scene.frame_count(),
            Animation::Binary(b) => u64::from(b.frame_count),
            Animation::Sequence(s) => s.frames.len() as u64,
        }
    }

    /// Nominal playback rate in frames per second.
    pub fn fps(&self) -> f64 {
        match self {
            Animation::Vector(v) => v.scene.fps,
            Animation::Binary(b) => b.fps.as_f64(),
            Animation::Sequence(s) => s.nominal_fps(),
        }
    }

    /// Total playable duration in seconds. Zero for degenerate inputs rather
    /// than a division by zero.
    pub fn duration_secs(&self) -> f64 {
        match self {
            Animation::Vector(v) => v.scene.duration_secs(),
            Animation::Binary(b) => b.duration_secs(),
            Animation::Sequence(s) => s.total_duration,
        }
    }
}

/// Persisted discriminant telling the store which decoder to re-invoke
/// against the cached payload on startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum CachedKind {
    None = 0,
    Vector = 1,
    Binary = 2,
    Sequence = 3,
}

impl CachedKind {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => CachedKind::Vector,
            2 => CachedKind::Binary,
            3 => CachedKind::Sequence,
            _ => CachedKind::None,
        }
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_kind_raw_roundtrip() {
        for kind in [
            CachedKind::None,
            CachedKind::Vector,
            CachedKind::Binary,
            CachedKind::Sequence,
        ] {
            assert_eq!(CachedKind::from_raw(kind.as_raw()), kind);
        }
        // Unknown values degrade to None instead of panicking.
        assert_eq!(CachedKind::from_raw(42), CachedKind::None);
    }
}
