//! KCAP table formats and animation reconstruction
//!
//! This crate holds everything that works on KCAP payloads without touching
//! the filesystem or an interchange format:
//!
//! # Modules
//!
//! - [`codec`] - Scalar value encodings (float32, float16, integer widths)
//! - [`formats`] - Keyframe (VCTM), channel (QSTM), transform (TDTM),
//!   skeleton (TNOJ) and mesh tables, plus KCAP framing
//! - [`packing`] - Fixed-point vertex packing and bone slots
//! - [`error`] - Parse and reconstruction errors

pub mod codec;
pub mod error;
pub mod formats;
pub mod packing;

pub use error::{FormatError, Result};

// Re-export commonly used format items
pub use formats::{
    Axis,
    ChannelEntry,
    ChannelProgram,
    ClipMarkers,
    Curve,
    DrawCall,
    FaceTable,
    Joint,
    KcapHeader,
    KeyframeTable,
    MeshEntry,
    MeshPayload,
    QuatKey,
    SkeletonTable,
    StaticChannelPolicy,
    TransformBinding,
    TransformKind,
    TransformTable,
    TransformTableBuilder,
    VectorKey,
    VertexAttribute,
    VertexTable,
};

pub use codec::ValueEncoding;
pub use packing::{pack_bone_slots, unpack_bone_slots, PackedBones, MAX_BONE_SLOTS};
