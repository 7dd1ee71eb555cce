//! Enumerations and authoring key types for keyframe tables

use crate::codec::ValueEncoding;

/// Interpolation tag stored with a keyframe table
///
/// Only the linear and spherical variants are produced by this crate; the
/// others are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpolationMode {
    Unknown0,
    Unknown1,
    Unknown2,
    Unknown3,
    Linear1D,
    Linear2D,
    Linear3D,
    Linear4D,
    SphericalLinear,
    None,
    UnknownA,
    UnknownB,
}

impl InterpolationMode {
    const ALL: [InterpolationMode; 12] = [
        Self::Unknown0,
        Self::Unknown1,
        Self::Unknown2,
        Self::Unknown3,
        Self::Linear1D,
        Self::Linear2D,
        Self::Linear3D,
        Self::Linear4D,
        Self::SphericalLinear,
        Self::None,
        Self::UnknownA,
        Self::UnknownB,
    ];

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Mode used when building a table with `components` values per key
    pub fn for_components(components: usize) -> Self {
        match components {
            3 => Self::Linear3D,
            4 => Self::SphericalLinear,
            _ => Self::Linear1D,
        }
    }
}

/// Multiplier applied to decoded time codes
///
/// `EveryNFrames` multiplies codes by N, `FpsN` divides them by N.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeScale {
    Every1Frames,
    Every5Frames,
    Every6Frames,
    Every10Frames,
    Every12Frames,
    Every15Frames,
    Every20Frames,
    Every30Frames,
    Fps1,
    Fps5,
    Fps6,
    Fps10,
    Fps12,
    Fps15,
    Fps20,
    Fps30,
}

impl TimeScale {
    const ALL: [TimeScale; 16] = [
        Self::Every1Frames,
        Self::Every5Frames,
        Self::Every6Frames,
        Self::Every10Frames,
        Self::Every12Frames,
        Self::Every15Frames,
        Self::Every20Frames,
        Self::Every30Frames,
        Self::Fps1,
        Self::Fps5,
        Self::Fps6,
        Self::Fps10,
        Self::Fps12,
        Self::Fps15,
        Self::Fps20,
        Self::Fps30,
    ];

    const STEPS: [f32; 8] = [1.0, 5.0, 6.0, 10.0, 12.0, 15.0, 20.0, 30.0];

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Numeric multiplier for decoded time codes
    pub fn factor(self) -> f32 {
        let ordinal = self.ordinal() as usize;
        if ordinal < 8 {
            Self::STEPS[ordinal]
        } else {
            1.0 / Self::STEPS[ordinal - 8]
        }
    }
}

/// Encoding of stored time codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeEncoding {
    Float32,
    /// No time data; every code decodes to zero
    None,
    Int16,
    Int8,
    Uint16,
    Uint8,
}

impl TimeEncoding {
    const ALL: [TimeEncoding; 6] = [
        Self::Float32,
        Self::None,
        Self::Int16,
        Self::Int8,
        Self::Uint16,
        Self::Uint8,
    ];

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Value encoding used to decode a time code, `None` for [`TimeEncoding::None`]
    pub const fn value_encoding(self) -> Option<ValueEncoding> {
        match self {
            Self::Float32 => Some(ValueEncoding::Float32),
            Self::None => None,
            Self::Int16 => Some(ValueEncoding::Int16),
            Self::Int8 => Some(ValueEncoding::Int8),
            Self::Uint16 => Some(ValueEncoding::Uint16),
            Self::Uint8 => Some(ValueEncoding::Uint8),
        }
    }

    /// Smallest unsigned encoding able to hold `max_code`
    pub fn for_max_code(max_code: f32) -> Self {
        if max_code <= u8::MAX as f32 {
            Self::Uint8
        } else if max_code <= u16::MAX as f32 {
            Self::Uint16
        } else {
            Self::Float32
        }
    }
}

/// Vector keyframe from an authoring tool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorKey {
    /// Time in authoring ticks
    pub time: f64,
    pub value: [f32; 3],
}

/// Quaternion keyframe from an authoring tool (`[x, y, z, w]`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuatKey {
    /// Time in authoring ticks
    pub time: f64,
    pub value: [f32; 4],
}
