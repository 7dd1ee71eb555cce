//! Keyframe table header structure and operations

use crate::formats::serialization::impl_binary_serializable;

/// Keyframe table magic ("VCTM" little-endian)
pub const VCTM_MAGIC: u32 = u32::from_le_bytes(*b"VCTM");

/// Keyframe table header (32 bytes)
///
/// Enum fields are kept as raw bytes here; [`super::KeyframeTable`] validates
/// them when parsing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyframeTableHeader {
    pub magic: u32,
    /// Number of keys (N)
    pub entry_count: u32,
    /// Offset of the value block
    pub coord_start: u32,
    /// Offset of the time-code block
    pub entries_start: u32,
    /// Interpolation mode ordinal
    pub interpolation: u8,
    /// High nibble: component count, low nibble: value encoding ordinal
    pub component_flags: u8,
    /// High nibble: time scale ordinal, low nibble: time encoding ordinal
    pub time_flags: u8,
    /// Loop-range flags
    pub flags: u8,
    /// Bytes per value entry
    pub coord_size: u16,
    /// Bytes per time entry
    pub entry_size: u16,
    pub reserved: [f32; 2],
}

impl KeyframeTableHeader {
    pub const SIZE: usize = 0x20;

    pub fn component_count(&self) -> u8 {
        self.component_flags >> 4
    }

    pub fn value_encoding_ordinal(&self) -> u8 {
        self.component_flags & 0x0F
    }

    pub fn time_scale_ordinal(&self) -> u8 {
        self.time_flags >> 4
    }

    pub fn time_encoding_ordinal(&self) -> u8 {
        self.time_flags & 0x0F
    }

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.entry_count.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.coord_start.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.entries_start.to_le_bytes());
        bytes[16] = self.interpolation;
        bytes[17] = self.component_flags;
        bytes[18] = self.time_flags;
        bytes[19] = self.flags;
        bytes[20..22].copy_from_slice(&self.coord_size.to_le_bytes());
        bytes[22..24].copy_from_slice(&self.entry_size.to_le_bytes());
        bytes[24..28].copy_from_slice(&self.reserved[0].to_le_bytes());
        bytes[28..32].copy_from_slice(&self.reserved[1].to_le_bytes());
        bytes
    }

    /// Read header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let f32_at = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self {
            magic: u32_at(0),
            entry_count: u32_at(4),
            coord_start: u32_at(8),
            entries_start: u32_at(12),
            interpolation: bytes[16],
            component_flags: bytes[17],
            time_flags: bytes[18],
            flags: bytes[19],
            coord_size: u16::from_le_bytes([bytes[20], bytes[21]]),
            entry_size: u16::from_le_bytes([bytes[22], bytes[23]]),
            reserved: [f32_at(24), f32_at(28)],
        })
    }

    /// Bytes taken by the time-code block
    pub fn times_size(&self) -> usize {
        self.entry_count as usize * self.entry_size as usize
    }

    /// Bytes taken by the value block
    pub fn values_size(&self) -> usize {
        self.entry_count as usize * self.coord_size as usize
    }
}

impl_binary_serializable!(KeyframeTableHeader, "VCTM");
