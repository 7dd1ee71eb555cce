//! Joint transform tables (TDTM)
//!
//! A transform table is one animation clip: a list of bindings from
//! (target, transform kind) to a channel program, four clip markers, and the
//! clip's own channel program and keyframe table collections.
//!
//! # Layout
//! ```text
//! 0x00: KCAP header (entry_count = 2, type_count = 1)
//! 0x20: magic "TDTM"
//! 0x24: version u32 (2)
//! 0x28: entry_count u32
//! 0x2C: padding u32
//! 0x30: start, end, loop_start, loop_end f32
//! 0x40: entry_count × {mode u8, category u8, target u16, program u32}
//!       8-byte pad when entry_count is odd
//! header_size: pointer table {offset u32, size u32} × 2
//!       [0] channel program collection (KCAP of QSTM)
//!       [1] keyframe table collection (KCAP of VCTM)
//! ```

mod builder;
mod curve;


pub use builder::*;
pub use curve::*;

use std::io::Cursor;

use tracing::warn;

use super::channel::ChannelProgram;
use super::container::{
    read_collection, read_pointer_table, resolve, write_collection, KcapHeader, Pointer,
};
use super::io::{expect_magic, pad_to, read_u16, read_u32, read_u8, slice_at, write_u16, write_u32};
use super::keyframes::KeyframeTable;
use super::serialization::{impl_binary_serializable, read_header};
use crate::codec::align16;
use crate::error::{FormatError, Result};

/// Transform table magic ("TDTM" little-endian)
pub const TDTM_MAGIC: u32 = u32::from_le_bytes(*b"TDTM");

/// The only transform table version understood
pub const TDTM_VERSION: u32 = 2;

/// Nested tables referenced from the pointer table
const NESTED_TABLE_COUNT: usize = 2;

/// Size of one binding record
const BINDING_SIZE: usize = 8;

// ============================================================================
// Binding Types
// ============================================================================

/// Transform component driven by a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransformKind {
    Translation,
    Rotation,
    Scale,
    LocalScale,
}

impl TransformKind {
    pub const ALL: [TransformKind; 4] = [
        Self::Translation,
        Self::Rotation,
        Self::Scale,
        Self::LocalScale,
    ];

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Components per sample: 4 for rotation, 3 otherwise
    pub const fn component_count(self) -> usize {
        match self {
            Self::Rotation => 4,
            _ => 3,
        }
    }

    /// Value of an axis nothing has written
    pub const fn default_value(self) -> [f32; 4] {
        match self {
            Self::Translation => [0.0, 0.0, 0.0, 0.0],
            Self::Rotation => [0.0, 0.0, 0.0, 1.0],
            Self::Scale | Self::LocalScale => [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// What a binding animates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformCategory {
    Joint,
    Texture,
    Material,
    Other(u8),
}

impl TransformCategory {
    /// Category byte written for joint bindings
    pub const JOINT_BYTE: u8 = 0x10;

    pub fn from_byte(byte: u8) -> Self {
        match byte & 0xF0 {
            0x10 => Self::Joint,
            0x20 => Self::Texture,
            0x30 => Self::Material,
            _ => Self::Other(byte),
        }
    }
}

/// One (target, kind) → channel program assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformBinding {
    pub kind: TransformKind,
    /// Raw category byte; see [`TransformCategory::from_byte`]
    pub category: u8,
    /// Joint, texture or material index depending on the category
    pub target: u16,
    /// Index into the clip's channel programs
    pub program: u32,
}

impl TransformBinding {
    pub fn joint(target: u16, kind: TransformKind, program: u32) -> Self {
        Self {
            kind,
            category: TransformCategory::JOINT_BYTE,
            target,
            program,
        }
    }

    pub fn category(&self) -> TransformCategory {
        TransformCategory::from_byte(self.category)
    }
}

/// Clip-level time markers, in engine ticks
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClipMarkers {
    pub start: f32,
    pub end: f32,
    pub loop_start: f32,
    pub loop_end: f32,
}

impl ClipMarkers {
    /// Markers for a clip of `seconds`, looping over its whole length
    pub fn from_duration(seconds: f32) -> Self {
        let end = seconds * CLIP_TICKS_PER_SECOND;
        Self {
            start: 0.0,
            end,
            loop_start: 0.0,
            loop_end: end,
        }
    }

    /// Clip length in seconds
    pub fn duration(&self) -> f32 {
        (self.end - self.start) / CLIP_TICKS_PER_SECOND
    }
}

// ============================================================================
// Header
// ============================================================================

/// Transform table header (32 bytes, after the KCAP header)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformTableHeader {
    pub magic: u32,
    pub version: u32,
    pub entry_count: u32,
    pub padding: u32,
    pub markers: ClipMarkers,
}

impl TransformTableHeader {
    pub const SIZE: usize = 0x20;

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.version.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.entry_count.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.padding.to_le_bytes());
        let markers = [
            self.markers.start,
            self.markers.end,
            self.markers.loop_start,
            self.markers.loop_end,
        ];
        for (chunk, marker) in bytes[16..].chunks_exact_mut(4).zip(markers) {
            chunk.copy_from_slice(&marker.to_le_bytes());
        }
        bytes
    }

    /// Read header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];
        Some(Self {
            magic: u32::from_le_bytes(word(0)),
            version: u32::from_le_bytes(word(4)),
            entry_count: u32::from_le_bytes(word(8)),
            padding: u32::from_le_bytes(word(12)),
            markers: ClipMarkers {
                start: f32::from_le_bytes(word(16)),
                end: f32::from_le_bytes(word(20)),
                loop_start: f32::from_le_bytes(word(24)),
                loop_end: f32::from_le_bytes(word(28)),
            },
        })
    }

    /// Bytes from the header start to the end of the (padded) binding list
    pub fn body_size(&self) -> usize {
        align16(Self::SIZE + self.entry_count as usize * BINDING_SIZE)
    }
}

impl_binary_serializable!(TransformTableHeader, "TDTM");

// ============================================================================
// Transform Table
// ============================================================================

/// One animation clip
#[derive(Debug, Clone, Default)]
pub struct TransformTable {
    pub markers: ClipMarkers,
    pub bindings: Vec<TransformBinding>,
    pub programs: Vec<ChannelProgram>,
    pub tables: Vec<KeyframeTable>,
}

impl TransformTable {
    /// Parse a clip from its KCAP-wrapped binary form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let kcap = KcapHeader::parse(bytes)?;
        if kcap.entry_count as usize != NESTED_TABLE_COUNT {
            return Err(FormatError::PointerCount {
                table: "TDTM",
                expected: NESTED_TABLE_COUNT,
                found: kcap.entry_count as usize,
            });
        }

        let payload_start = kcap.type_payload_start as usize;
        let payload = slice_at(bytes, payload_start, TransformTableHeader::SIZE)?;
        let header: TransformTableHeader = read_header(payload)?;
        expect_magic("TDTM", TDTM_MAGIC, header.magic)?;
        if header.version != TDTM_VERSION {
            return Err(FormatError::UnsupportedVersion {
                table: "TDTM",
                expected: TDTM_VERSION,
                found: header.version,
            });
        }

        let records_start = payload_start + TransformTableHeader::SIZE;
        let records = slice_at(
            bytes,
            records_start,
            header.entry_count as usize * BINDING_SIZE,
        )?;
        let mut cursor = Cursor::new(records);
        let bindings = (0..header.entry_count)
            .map(|_| read_binding(&mut cursor))
            .collect::<Result<Vec<_>>>()?;

        let body_end = payload_start + header.body_size();
        if body_end != kcap.header_size as usize {
            warn!(
                "TDTM bindings end at {:#X} but the pointer table starts at {:#X}",
                body_end, kcap.header_size
            );
        }

        let pointers = read_pointer_table(bytes, kcap.header_size as usize, NESTED_TABLE_COUNT)?;
        let programs = read_collection(resolve(bytes, pointers[0])?)?
            .into_iter()
            .map(ChannelProgram::from_bytes)
            .collect::<Result<Vec<_>>>()?;
        let tables = read_collection(resolve(bytes, pointers[1])?)?
            .into_iter()
            .map(KeyframeTable::from_bytes)
            .collect::<Result<Vec<_>>>()?;

        let end = pointers
            .iter()
            .map(|p| (p.offset + p.size) as usize)
            .max()
            .unwrap_or(body_end);
        if end != kcap.size as usize {
            warn!(
                "TDTM spans {:#X} bytes but its header advertises {:#X}",
                end, kcap.size
            );
        }

        Ok(Self {
            markers: header.markers,
            bindings,
            programs,
            tables,
        })
    }

    /// Serialize to the KCAP-wrapped binary form
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = TransformTableHeader {
            magic: TDTM_MAGIC,
            version: TDTM_VERSION,
            entry_count: self.bindings.len() as u32,
            padding: 0,
            markers: self.markers,
        };

        let pointer_table = KcapHeader::SIZE + header.body_size();
        let programs = write_collection(
            &self
                .programs
                .iter()
                .map(ChannelProgram::to_bytes)
                .collect::<Vec<_>>(),
        );
        let tables = write_collection(
            &self
                .tables
                .iter()
                .map(KeyframeTable::to_bytes)
                .collect::<Vec<_>>(),
        );

        let programs_at = align16(pointer_table + NESTED_TABLE_COUNT * 8);
        let tables_at = align16(programs_at + programs.len());
        let total = tables_at + tables.len();

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(
            &KcapHeader::typed(
                NESTED_TABLE_COUNT as u32,
                pointer_table as u32,
                total as u32,
            )
            .to_bytes(),
        );
        out.extend_from_slice(&header.to_bytes());
        for binding in &self.bindings {
            out.push(binding.kind.ordinal());
            out.push(binding.category);
            write_u16(&mut out, binding.target);
            write_u32(&mut out, binding.program);
        }
        pad_to(&mut out, pointer_table);

        for pointer in [
            Pointer {
                offset: programs_at as u32,
                size: programs.len() as u32,
            },
            Pointer {
                offset: tables_at as u32,
                size: tables.len() as u32,
            },
        ] {
            write_u32(&mut out, pointer.offset);
            write_u32(&mut out, pointer.size);
        }
        pad_to(&mut out, programs_at);
        out.extend_from_slice(&programs);
        pad_to(&mut out, tables_at);
        out.extend_from_slice(&tables);
        out
    }
}

fn read_binding(cursor: &mut Cursor<&[u8]>) -> Result<TransformBinding> {
    let mode = read_u8(cursor)?;
    let kind = TransformKind::from_ordinal(mode).ok_or(FormatError::UnknownTag {
        field: "transform kind",
        value: mode as u32,
    })?;
    Ok(TransformBinding {
        kind,
        category: read_u8(cursor)?,
        target: read_u16(cursor)?,
        program: read_u32(cursor)?,
    })
}
