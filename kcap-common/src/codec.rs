//! Scalar value encodings shared by keyframe and vertex tables
//!
//! Every multi-byte value is little-endian. Integer encodings are widened to
//! `f32` without any fixed-point scaling; callers apply their own scale.

// ============================================================================
// Value Encodings
// ============================================================================

/// Numeric encoding of a single stored component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueEncoding {
    Float32,
    Float16,
    Int16,
    Int8,
    Uint16,
    Uint8,
}

impl ValueEncoding {
    /// All encodings in ordinal order
    pub const ALL: [ValueEncoding; 6] = [
        Self::Float32,
        Self::Float16,
        Self::Int16,
        Self::Int8,
        Self::Uint16,
        Self::Uint8,
    ];

    /// Parse an on-disk ordinal
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    /// On-disk ordinal
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Bytes occupied by one value
    pub const fn byte_width(self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float16 | Self::Int16 | Self::Uint16 => 2,
            Self::Int8 | Self::Uint8 => 1,
        }
    }

    /// Largest integer magnitude the encoding can hold, `None` for floats
    pub const fn integer_range(self) -> Option<f32> {
        match self {
            Self::Int16 => Some(i16::MAX as f32),
            Self::Int8 => Some(i8::MAX as f32),
            Self::Uint16 => Some(u16::MAX as f32),
            Self::Uint8 => Some(u8::MAX as f32),
            Self::Float32 | Self::Float16 => None,
        }
    }
}

/// Decode one value from the front of `bytes`
///
/// `bytes` must hold at least [`ValueEncoding::byte_width`] bytes.
pub fn decode_value(bytes: &[u8], encoding: ValueEncoding) -> f32 {
    debug_assert!(
        bytes.len() >= encoding.byte_width(),
        "{:?} needs {} bytes, got {}",
        encoding,
        encoding.byte_width(),
        bytes.len()
    );
    match encoding {
        ValueEncoding::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        ValueEncoding::Float16 => f16_bits_to_f32(u16::from_le_bytes([bytes[0], bytes[1]])),
        ValueEncoding::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32,
        ValueEncoding::Int8 => bytes[0] as i8 as f32,
        ValueEncoding::Uint16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f32,
        ValueEncoding::Uint8 => bytes[0] as f32,
    }
}

/// Append the encoded form of `value` to `out`
///
/// Integer encodings round to nearest and saturate at the type bounds.
pub fn encode_value(value: f32, encoding: ValueEncoding, out: &mut Vec<u8>) {
    match encoding {
        ValueEncoding::Float32 => out.extend_from_slice(&value.to_le_bytes()),
        ValueEncoding::Float16 => out.extend_from_slice(&f32_to_f16_bits(value).to_le_bytes()),
        ValueEncoding::Int16 => out.extend_from_slice(&(value.round() as i16).to_le_bytes()),
        ValueEncoding::Int8 => out.push(value.round() as i8 as u8),
        ValueEncoding::Uint16 => out.extend_from_slice(&(value.round() as u16).to_le_bytes()),
        ValueEncoding::Uint8 => out.push(value.round() as u8),
    }
}

// ============================================================================
// Half-Float Conversion
// ============================================================================

/// Expand IEEE-754 half bits to `f32`
///
/// Zero and subnormal halves keep their mantissa but get a zero exponent,
/// so subnormals decode to values far below the half range.
pub fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = ((bits & 0x8000) as u32) << 16;
    let exponent = ((bits >> 10) & 0x1F) as u32;
    let mantissa = ((bits & 0x03FF) as u32) << 13;

    let out = match exponent {
        0 => sign | mantissa,
        0x1F => sign | 0x7F80_0000 | mantissa,
        _ => sign | ((exponent + 127 - 15) << 23) | mantissa,
    };
    f32::from_bits(out)
}

/// Compress `f32` to IEEE-754 half bits
///
/// The mantissa is truncated. Values below the smallest normal half flush to
/// signed zero, values above the largest half saturate to signed infinity.
pub fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;

    if value.is_nan() {
        return sign | 0x7E00;
    }

    let exponent = ((bits >> 23) & 0xFF) as i32 - (127 - 15);
    let mantissa = ((bits & 0x007F_FFFF) >> 13) as u16;

    if exponent <= 0 {
        sign
    } else if exponent >= 0x1F {
        sign | 0x7C00
    } else {
        sign | ((exponent as u16) << 10) | mantissa
    }
}

/// Round `value` up to the next multiple of 4
#[inline]
pub const fn align4(value: usize) -> usize {
    (value + 3) & !3
}

/// Round `value` up to the next multiple of 16
#[inline]
pub const fn align16(value: usize) -> usize {
    (value + 15) & !15
}
