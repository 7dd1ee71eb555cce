//! Vertex data packing utilities
//!
//! Fixed-point conversions used by mesh vertex tables:
//! - f32 → i16 positions with a per-table scale
//! - f32 → snorm8 normals
//! - f32 → unorm8 colors and bone weights
//! - bone slots (stored index = joint slot × 3)

use crate::error::{FormatError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Stored bone index is the joint slot multiplied by this
pub const BONE_INDEX_STRIDE: u16 = 3;

/// Joint slots a stored bone index can address (0..=85)
pub const MAX_BONE_SLOTS: usize = u8::MAX as usize / BONE_INDEX_STRIDE as usize + 1;

/// Bone influences per vertex
pub const MAX_INFLUENCES: usize = 4;

/// Largest magnitude of a quantized position
pub const POSITION_RANGE: f32 = 32767.0;

// ============================================================================
// Basic Conversion Functions
// ============================================================================

/// Convert f32 to unsigned normalized 8-bit integer (unorm8)
///
/// Maps f32 range [0.0, 1.0] to u8 range [0, 255], rounding to nearest.
#[inline]
pub fn f32_to_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Convert f32 to signed normalized 8-bit integer (snorm8)
///
/// Maps f32 range [-1.0, 1.0] to i8 range [-127, 127].
#[inline]
pub fn f32_to_snorm8(value: f32) -> i8 {
    (value.clamp(-1.0, 1.0) * 127.0).round() as i8
}

/// Scale that maps `max_abs` onto the full i16 range
///
/// Returns 1.0 for an empty or degenerate range.
pub fn position_scale(max_abs: f32) -> f32 {
    if max_abs > 0.0 && max_abs.is_finite() {
        POSITION_RANGE / max_abs
    } else {
        1.0
    }
}

/// Quantize a position component with a scale from [`position_scale`]
#[inline]
pub fn quantize_position(value: f32, scale: f32) -> i16 {
    (value * scale)
        .round()
        .clamp(-POSITION_RANGE, POSITION_RANGE) as i16
}

// ============================================================================
// Bone Slot Packing
// ============================================================================

/// Four bone slots as stored in a vertex table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedBones {
    pub indices: [u8; 4],
    pub weights: [u8; 4],
}

/// Pack up to four (joint slot, weight) influences
///
/// The heaviest four are kept when more are given; unused slots are zero.
/// A slot past [`MAX_BONE_SLOTS`] does not fit the stored index.
pub fn pack_bone_slots(influences: &[(u16, f32)]) -> Result<PackedBones> {
    let mut sorted: Vec<(u16, f32)> = influences.to_vec();
    if sorted.len() > MAX_INFLUENCES {
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
        sorted.truncate(MAX_INFLUENCES);
    }

    let mut packed = PackedBones::default();
    for (slot, (joint, weight)) in sorted.into_iter().enumerate() {
        packed.indices[slot] = u8::try_from(joint as usize * BONE_INDEX_STRIDE as usize)
            .map_err(|_| FormatError::IndexOutOfRange {
                what: "bone slot",
                index: joint as usize,
                len: MAX_BONE_SLOTS,
            })?;
        packed.weights[slot] = f32_to_unorm8(weight);
    }
    Ok(packed)
}

/// Unpack bone slots into (joint slot, weight) pairs
pub fn unpack_bone_slots(packed: &PackedBones) -> [(u16, f32); 4] {
    std::array::from_fn(|slot| {
        (
            packed.indices[slot] as u16 / BONE_INDEX_STRIDE,
            packed.weights[slot] as f32 / 255.0,
        )
    })
}
