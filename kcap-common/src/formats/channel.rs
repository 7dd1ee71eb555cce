//! Channel programs (QSTM)
//!
//! A channel program is a short ordered list of operations that together
//! produce one animated channel: load constants, copy between axes, or pull
//! keys from a keyframe table.
//!
//! # Layout
//! ```text
//! 0x00: magic "QSTM"
//! 0x04: unknown u16 (2)
//! 0x06: entry_count u16
//! 0x08: records
//!
//! Constant:    kind u16 = 0, mode u8, axis u8, count u16, reserved u16, count × f32
//! Copy:        kind u16 = 1, mode u16, dest u8, source u8, size u16
//! KeyframeRef: kind u16 = 2, axis u16, table u32
//! ```

use std::io::Cursor;

use smallvec::SmallVec;
use tracing::warn;

use super::io::{expect_magic, read_f32, read_u16, read_u32, read_u8, write_f32, write_u16, write_u32};
use super::serialization::{cursor_after, impl_binary_serializable, read_header};
use crate::error::{FormatError, Result};

/// Channel program magic ("QSTM" little-endian)
pub const QSTM_MAGIC: u32 = u32::from_le_bytes(*b"QSTM");

/// Value written to the unknown header field
pub const QSTM_DEFAULT_UNKNOWN: u16 = 2;

/// Channel axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
    W,
    /// No specific axis; multi-value entries cover X, Y, Z (and W)
    All,
}

impl Axis {
    const ALL: [Axis; 5] = [Self::X, Self::Y, Self::Z, Self::W, Self::All];

    pub fn from_ordinal(ordinal: u32) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Component index for single axes
    pub const fn index(self) -> Option<usize> {
        match self {
            Self::All => None,
            axis => Some(axis as usize),
        }
    }
}

/// One channel program operation
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEntry {
    /// Load 1, 3 or 4 constant values
    Constant {
        mode: u8,
        axis: Axis,
        values: SmallVec<[f32; 4]>,
    },
    /// Copy one axis into another on every sample
    Copy {
        mode: u16,
        source: Axis,
        dest: Axis,
        size: u16,
    },
    /// Pull keys from a keyframe table of the owning clip
    KeyframeRef { axis: Axis, table: u32 },
}

impl ChannelEntry {
    const KIND_CONSTANT: u16 = 0;
    const KIND_COPY: u16 = 1;
    const KIND_KEYFRAME_REF: u16 = 2;

    /// Constant vector assigned to X, Y, Z
    pub fn constant_vec3(value: [f32; 3]) -> Self {
        Self::Constant {
            mode: 0,
            axis: Axis::All,
            values: SmallVec::from_slice(&value),
        }
    }

    /// Constant quaternion assigned to X, Y, Z, W
    ///
    /// Components are rounded to six decimals.
    pub fn constant_quat(value: [f32; 4]) -> Self {
        let rounded = value.map(|c| (c as f64 * 1e6).round() as f32 / 1e6);
        Self::Constant {
            mode: 0,
            axis: Axis::All,
            values: SmallVec::from_slice(&rounded),
        }
    }

    /// Constant scalar assigned to a single axis
    pub fn constant_axis(axis: Axis, value: f32) -> Self {
        Self::Constant {
            mode: 0,
            axis,
            values: SmallVec::from_slice(&[value]),
        }
    }

    /// Reference to keyframe table `table`, written to every component
    pub fn keyframes(table: u32) -> Self {
        Self::KeyframeRef {
            axis: Axis::All,
            table,
        }
    }

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let kind = read_u16(cursor)?;
        match kind {
            Self::KIND_CONSTANT => {
                let mode = read_u8(cursor)?;
                let axis = read_axis(read_u8(cursor)? as u32)?;
                let count = read_u16(cursor)?;
                let _reserved = read_u16(cursor)?;
                if !(1..=4).contains(&count) {
                    return Err(FormatError::UnknownTag {
                        field: "constant value count",
                        value: count as u32,
                    });
                }
                let values = (0..count)
                    .map(|_| read_f32(cursor))
                    .collect::<Result<SmallVec<_>>>()?;
                Ok(Self::Constant { mode, axis, values })
            }
            Self::KIND_COPY => {
                let mode = read_u16(cursor)?;
                let dest = read_axis(read_u8(cursor)? as u32)?;
                let source = read_axis(read_u8(cursor)? as u32)?;
                let size = read_u16(cursor)?;
                Ok(Self::Copy {
                    mode,
                    source,
                    dest,
                    size,
                })
            }
            Self::KIND_KEYFRAME_REF => {
                let axis = read_axis(read_u16(cursor)? as u32)?;
                let table = read_u32(cursor)?;
                Ok(Self::KeyframeRef { axis, table })
            }
            other => Err(FormatError::UnknownTag {
                field: "channel entry kind",
                value: other as u32,
            }),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Self::Constant { mode, axis, values } => {
                write_u16(out, Self::KIND_CONSTANT);
                out.push(*mode);
                out.push(axis.ordinal());
                write_u16(out, values.len() as u16);
                write_u16(out, 0);
                for value in values {
                    write_f32(out, *value);
                }
            }
            Self::Copy {
                mode,
                source,
                dest,
                size,
            } => {
                write_u16(out, Self::KIND_COPY);
                write_u16(out, *mode);
                out.push(dest.ordinal());
                out.push(source.ordinal());
                write_u16(out, *size);
            }
            Self::KeyframeRef { axis, table } => {
                write_u16(out, Self::KIND_KEYFRAME_REF);
                write_u16(out, axis.ordinal() as u16);
                write_u32(out, *table);
            }
        }
    }
}

fn read_axis(ordinal: u32) -> Result<Axis> {
    Axis::from_ordinal(ordinal).ok_or(FormatError::UnknownTag {
        field: "axis",
        value: ordinal,
    })
}

/// Channel program header (8 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelProgramHeader {
    pub magic: u32,
    pub unknown: u16,
    pub entry_count: u16,
}

impl ChannelProgramHeader {
    pub const SIZE: usize = 8;

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.unknown.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.entry_count.to_le_bytes());
        bytes
    }

    /// Read header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            unknown: u16::from_le_bytes([bytes[4], bytes[5]]),
            entry_count: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }
}

impl_binary_serializable!(ChannelProgramHeader, "QSTM");

/// Ordered list of channel operations
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelProgram {
    pub unknown: u16,
    pub entries: Vec<ChannelEntry>,
}

impl Default for ChannelProgram {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ChannelProgram {
    pub fn new(entries: Vec<ChannelEntry>) -> Self {
        Self {
            unknown: QSTM_DEFAULT_UNKNOWN,
            entries,
        }
    }

    /// Keyframe table indices referenced by this program
    pub fn keyframe_tables(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            ChannelEntry::KeyframeRef { table, .. } => Some(*table),
            _ => None,
        })
    }

    /// Serialize to the on-disk layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let header = ChannelProgramHeader {
            magic: QSTM_MAGIC,
            unknown: self.unknown,
            entry_count: self.entries.len() as u16,
        };
        let mut out = header.to_bytes().to_vec();
        for entry in &self.entries {
            entry.write(&mut out);
        }
        out
    }

    /// Parse a program from the start of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: ChannelProgramHeader = read_header(bytes)?;
        expect_magic("QSTM", QSTM_MAGIC, header.magic)?;

        let mut cursor = cursor_after::<ChannelProgramHeader>(bytes);
        let entries = (0..header.entry_count)
            .map(|_| ChannelEntry::read(&mut cursor))
            .collect::<Result<Vec<_>>>()?;

        let end = cursor.position() as usize;
        if end != bytes.len() {
            warn!(
                "QSTM spans {:#X} bytes but {:#X} were advertised",
                end,
                bytes.len()
            );
        }

        Ok(Self {
            unknown: header.unknown,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_program() -> ChannelProgram {
        ChannelProgram::new(vec![
            ChannelEntry::constant_vec3([1.0, 2.0, 3.0]),
            ChannelEntry::constant_axis(Axis::Y, -4.5),
            ChannelEntry::Copy {
                mode: 0,
                source: Axis::X,
                dest: Axis::Z,
                size: 4,
            },
            ChannelEntry::KeyframeRef {
                axis: Axis::W,
                table: 7,
            },
        ])
    }

    #[test]
    fn test_program_roundtrip() {
        let program = sample_program();
        let bytes = program.to_bytes();
        assert_eq!(&bytes[0..4], b"QSTM");
        assert_eq!(u16::from_le_bytes([bytes[4], bytes[5]]), 2);
        assert_eq!(u16::from_le_bytes([bytes[6], bytes[7]]), 4);

        let parsed = ChannelProgram::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, program);
    }

    #[test]
    fn test_record_sizes() {
        let mut out = Vec::new();
        ChannelEntry::constant_vec3([0.0; 3]).write(&mut out);
        assert_eq!(out.len(), 8 + 12);

        out.clear();
        ChannelEntry::keyframes(1).write(&mut out);
        assert_eq!(out.len(), 8);

        out.clear();
        ChannelEntry::Copy {
            mode: 0,
            source: Axis::X,
            dest: Axis::Y,
            size: 0,
        }
        .write(&mut out);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_constant_quat_rounds() {
        let entry = ChannelEntry::constant_quat([0.123_456_78, 0.0, 0.0, 0.992_35]);
        let ChannelEntry::Constant { values, axis, .. } = entry else {
            panic!("expected constant");
        };
        assert_eq!(axis, Axis::All);
        assert_eq!(values.len(), 4);
        assert!((values[0] - 0.123_457).abs() < 1e-7);
    }

    #[test]
    fn test_keyframe_tables() {
        let program = ChannelProgram::new(vec![
            ChannelEntry::keyframes(3),
            ChannelEntry::constant_axis(Axis::X, 0.0),
            ChannelEntry::keyframes(5),
        ]);
        assert_eq!(program.keyframe_tables().collect::<Vec<_>>(), vec![3, 5]);
    }

    #[test]
    fn test_unknown_kind() {
        let mut bytes = ChannelProgram::new(vec![ChannelEntry::keyframes(0)]).to_bytes();
        bytes[8] = 9;
        assert_eq!(
            ChannelProgram::from_bytes(&bytes).unwrap_err(),
            FormatError::UnknownTag {
                field: "channel entry kind",
                value: 9
            }
        );
    }

    #[test]
    fn test_bad_axis() {
        let mut bytes = ChannelProgram::new(vec![ChannelEntry::keyframes(0)]).to_bytes();
        bytes[10] = 5;
        assert!(matches!(
            ChannelProgram::from_bytes(&bytes),
            Err(FormatError::UnknownTag { field: "axis", .. })
        ));
    }

    #[test]
    fn test_truncated_entry() {
        let bytes = sample_program().to_bytes();
        assert!(matches!(
            ChannelProgram::from_bytes(&bytes[..bytes.len() - 2]),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_axis_index() {
        assert_eq!(Axis::X.index(), Some(0));
        assert_eq!(Axis::W.index(), Some(3));
        assert_eq!(Axis::All.index(), None);
        assert_eq!(Axis::from_ordinal(4), Some(Axis::All));
        assert_eq!(Axis::from_ordinal(5), None);
    }
}
