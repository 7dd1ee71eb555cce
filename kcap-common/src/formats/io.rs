//! Little-endian read/write helpers over byte buffers

use std::io::{Cursor, Read};

use crate::error::{FormatError, Result};

fn read_array<const N: usize>(cursor: &mut Cursor<&[u8]>) -> Result<[u8; N]> {
    let offset = cursor.position() as usize;
    let mut buf = [0u8; N];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| FormatError::Truncated {
            offset,
            needed: N,
            available: cursor.get_ref().len().saturating_sub(offset),
        })?;
    Ok(buf)
}

pub(crate) fn read_u8(cursor: &mut Cursor<&[u8]>) -> Result<u8> {
    Ok(read_array::<1>(cursor)?[0])
}

pub(crate) fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16> {
    Ok(u16::from_le_bytes(read_array(cursor)?))
}

pub(crate) fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(cursor)?))
}

pub(crate) fn read_i32(cursor: &mut Cursor<&[u8]>) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(cursor)?))
}

pub(crate) fn read_f32(cursor: &mut Cursor<&[u8]>) -> Result<f32> {
    Ok(f32::from_le_bytes(read_array(cursor)?))
}

/// Read `N` consecutive f32 values
pub(crate) fn read_f32_array<const N: usize>(cursor: &mut Cursor<&[u8]>) -> Result<[f32; N]> {
    let mut out = [0.0f32; N];
    for value in &mut out {
        *value = read_f32(cursor)?;
    }
    Ok(out)
}

/// Borrow `len` bytes starting at `offset`, failing if they run past the buffer
pub(crate) fn slice_at(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| bytes.get(offset..end))
        .ok_or(FormatError::Truncated {
            offset,
            needed: len,
            available: bytes.len().saturating_sub(offset),
        })
}

/// Check a leading magic value
pub(crate) fn expect_magic(table: &'static str, expected: u32, found: u32) -> Result<()> {
    if found != expected {
        return Err(FormatError::BadMagic {
            table,
            expected,
            found,
        });
    }
    Ok(())
}

pub(crate) fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_f32(out: &mut Vec<u8>, value: f32) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Zero-pad `out` up to `len` bytes
pub(crate) fn pad_to(out: &mut Vec<u8>, len: usize) {
    if out.len() < len {
        out.resize(len, 0);
    }
}
