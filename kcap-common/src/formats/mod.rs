//! KCAP binary table formats
//!
//! Every table is little-endian. Fixed-size headers implement
//! [`BinarySerializable`]; variable-size tables expose `from_bytes` returning
//! a [`crate::FormatError`] and `to_bytes` producing the on-disk layout.

pub mod channel;
pub mod container;
mod io;
pub mod keyframes;
pub mod mesh;
mod serialization;
pub mod skeleton;
pub mod transform;

pub use channel::*;
pub use container::*;
pub use keyframes::*;
pub use mesh::*;
pub use serialization::{read_header, BinarySerializable};
pub use skeleton::*;
pub use transform::*;
