//! KCAP container framing
//!
//! Only the parts of the container needed to reach keyframe, channel,
//! transform and joint payloads are implemented: the common 0x20-byte header
//! and plain pointer-table collections.
//!
//! # Layout
//! ```text
//! 0x00: magic "KCAP"
//! 0x04: version u32 (1)
//! 0x08: size u32 (total bytes including header)
//! 0x0C: unknown u32
//! 0x10: entry_count u32
//! 0x14: type_count u32 (0 for plain collections)
//! 0x18: header_size u32 (offset of the pointer table)
//! 0x1C: type_payload_start u32
//! ```
//!
//! A plain collection follows the header with `entry_count` pointer pairs
//! `{offset u32, size u32}` relative to the collection start. Payloads are
//! aligned to 16 bytes.

use std::io::Cursor;

use tracing::warn;

use super::io::{expect_magic, pad_to, read_u32, slice_at, write_u32};
use super::serialization::{impl_binary_serializable, read_header};
use crate::codec::align16;
use crate::error::Result;

/// Container magic ("KCAP" little-endian)
pub const KCAP_MAGIC: u32 = u32::from_le_bytes(*b"KCAP");

/// Container version written by this crate
pub const KCAP_VERSION: u32 = 1;

/// KCAP container header (32 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KcapHeader {
    pub magic: u32,
    pub version: u32,
    /// Total bytes covered by the container
    pub size: u32,
    pub unknown: u32,
    /// Number of pointer table entries
    pub entry_count: u32,
    /// Number of typed payloads following the header (0 for plain collections)
    pub type_count: u32,
    /// Offset of the pointer table
    pub header_size: u32,
    /// Offset of the typed payload, 0 when absent
    pub type_payload_start: u32,
}

impl KcapHeader {
    pub const SIZE: usize = 0x20;

    /// Header for a plain collection of `entry_count` payloads
    pub fn collection(entry_count: u32, size: u32) -> Self {
        Self {
            magic: KCAP_MAGIC,
            version: KCAP_VERSION,
            size,
            unknown: 0,
            entry_count,
            type_count: 0,
            header_size: Self::SIZE as u32,
            type_payload_start: 0,
        }
    }

    /// Header for a typed payload that starts right after it
    ///
    /// The pointer table with `entry_count` entries sits at `header_size`.
    pub fn typed(entry_count: u32, header_size: u32, size: u32) -> Self {
        Self {
            magic: KCAP_MAGIC,
            version: KCAP_VERSION,
            size,
            unknown: 0,
            entry_count,
            type_count: 1,
            header_size,
            type_payload_start: Self::SIZE as u32,
        }
    }

    /// Write header to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let fields = [
            self.magic,
            self.version,
            self.size,
            self.unknown,
            self.entry_count,
            self.type_count,
            self.header_size,
            self.type_payload_start,
        ];
        let mut bytes = [0u8; Self::SIZE];
        for (chunk, field) in bytes.chunks_exact_mut(4).zip(fields) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }

    /// Read header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let field = |i: usize| {
            u32::from_le_bytes([bytes[i * 4], bytes[i * 4 + 1], bytes[i * 4 + 2], bytes[i * 4 + 3]])
        };
        Some(Self {
            magic: field(0),
            version: field(1),
            size: field(2),
            unknown: field(3),
            entry_count: field(4),
            type_count: field(5),
            header_size: field(6),
            type_payload_start: field(7),
        })
    }

    /// Read and validate a header
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header: Self = read_header(bytes)?;
        expect_magic("KCAP", KCAP_MAGIC, header.magic)?;
        if header.size as usize > bytes.len() {
            warn!(
                "KCAP advertises {:#X} bytes but only {:#X} are available",
                header.size,
                bytes.len()
            );
        }
        Ok(header)
    }
}

impl_binary_serializable!(KcapHeader, "KCAP");

/// Offset/size pair from a pointer table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer {
    pub offset: u32,
    pub size: u32,
}

/// Read `count` pointer pairs starting at `offset`
pub fn read_pointer_table(bytes: &[u8], offset: usize, count: usize) -> Result<Vec<Pointer>> {
    let table = slice_at(bytes, offset, count * 8)?;
    let mut cursor = Cursor::new(table);
    (0..count)
        .map(|_| {
            Ok(Pointer {
                offset: read_u32(&mut cursor)?,
                size: read_u32(&mut cursor)?,
            })
        })
        .collect()
}

/// Resolve a pointer to its payload bytes
pub fn resolve(bytes: &[u8], pointer: Pointer) -> Result<&[u8]> {
    slice_at(bytes, pointer.offset as usize, pointer.size as usize)
}

/// Split a plain collection into its payload slices
pub fn read_collection(bytes: &[u8]) -> Result<Vec<&[u8]>> {
    let header = KcapHeader::parse(bytes)?;
    let pointers = read_pointer_table(
        bytes,
        header.header_size as usize,
        header.entry_count as usize,
    )?;
    pointers
        .into_iter()
        .map(|pointer| resolve(bytes, pointer))
        .collect()
}

/// Build a plain collection around already-serialized payloads
pub fn write_collection(payloads: &[Vec<u8>]) -> Vec<u8> {
    let table_end = KcapHeader::SIZE + payloads.len() * 8;
    let mut pointers = Vec::with_capacity(payloads.len());
    let mut body = Vec::new();
    let mut cursor = align16(table_end);

    for payload in payloads {
        pointers.push(Pointer {
            offset: cursor as u32,
            size: payload.len() as u32,
        });
        pad_to(&mut body, cursor - align16(table_end));
        body.extend_from_slice(payload);
        cursor = align16(align16(table_end) + body.len());
    }

    let total = align16(table_end) + body.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&KcapHeader::collection(payloads.len() as u32, total as u32).to_bytes());
    for pointer in &pointers {
        write_u32(&mut out, pointer.offset);
        write_u32(&mut out, pointer.size);
    }
    pad_to(&mut out, align16(table_end));
    out.extend_from_slice(&body);
    out
}
