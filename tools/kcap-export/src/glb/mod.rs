//! GLB generation
//!
//! - [`BufferBuilder`]: packs the binary chunk with 4-byte alignment and
//!   creates a view and accessor per array
//! - [`GltfBuilder`]: collects nodes, meshes, skins and animations into a
//!   glTF root
//! - [`assemble_glb`]: frames the JSON and binary chunks

pub mod buffer;
pub mod document;
pub mod utils;

pub use buffer::{AccessorIndex, BufferBuilder};
pub use document::{AnimationChannel, GltfBuilder, PrimitiveAccessors};
pub use utils::{align_buffer, assemble_glb, compute_bounds};
