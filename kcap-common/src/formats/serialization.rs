//! Binary serialization trait for fixed-size table headers.
//!
//! Every KCAP table header (container, keyframe table, channel program,
//! transform table) implements `BinarySerializable` so framing code can read
//! and write any of them generically. Each header keeps its own `to_bytes()`
//! returning a fixed-size array for direct use.

use std::io::Cursor;

use crate::error::{FormatError, Result};

/// Trait for binary-serializable format headers.
pub trait BinarySerializable: Sized {
    /// Size of the serialized header in bytes.
    const SIZE: usize;

    /// Human-readable table name used in errors and logs.
    const NAME: &'static str;

    /// Serialize to bytes.
    fn serialize(&self) -> Vec<u8>;

    /// Deserialize from bytes.
    ///
    /// Returns `None` if the byte slice is too short.
    fn deserialize(bytes: &[u8]) -> Option<Self>;
}

/// Read a header from the start of `bytes`, reporting truncation as an error
pub fn read_header<H: BinarySerializable>(bytes: &[u8]) -> Result<H> {
    H::deserialize(bytes).ok_or(FormatError::Truncated {
        offset: 0,
        needed: H::SIZE,
        available: bytes.len(),
    })
}

/// Cursor positioned just after a header of type `H`
pub(crate) fn cursor_after<H: BinarySerializable>(bytes: &[u8]) -> Cursor<&[u8]> {
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(H::SIZE as u64);
    cursor
}

macro_rules! impl_binary_serializable {
    ($ty:ty, $name:expr) => {
        impl $crate::formats::BinarySerializable for $ty {
            const SIZE: usize = <$ty>::SIZE;
            const NAME: &'static str = $name;

            fn serialize(&self) -> Vec<u8> {
                self.to_bytes().to_vec()
            }

            fn deserialize(bytes: &[u8]) -> Option<Self> {
                Self::from_bytes(bytes)
            }
        }
    };
}

pub(crate) use impl_binary_serializable;
