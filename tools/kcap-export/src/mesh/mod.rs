//! Skinned mesh conversion (vertex tables <-> glTF geometry)

mod extract;
mod import;

pub use extract::SkinnedMeshExtractor;
pub use import::{DrawInput, MeshTableBuilder, RenderState};

/// Per-vertex influences as (joint, weight) pairs
pub type Influences = [(u16, f32); 4];

/// Skin of one extracted draw call
#[derive(Debug, Clone, PartialEq)]
pub struct SkinBinding {
    /// Skeleton joint per skin joint, in assignment slot order
    pub joints: Vec<u16>,
    /// Row-major inverse bind matrix per skin joint
    pub inverse_bind_matrices: Vec<[f32; 16]>,
    /// Influences per vertex; joints index into `joints`
    pub weights: Vec<Influences>,
}

/// Unpacked geometry of one draw call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Option<Vec<[f32; 3]>>,
    pub colors: Option<Vec<[f32; 4]>>,
    pub uv0: Option<Vec<[f32; 2]>>,
    pub uv1: Option<Vec<[f32; 2]>>,
    pub indices: Vec<u32>,
}

impl Geometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}
