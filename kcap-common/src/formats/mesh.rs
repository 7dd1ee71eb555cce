//! Mesh tables
//!
//! A mesh payload is an ordered entry list (joint assignments, materials,
//! textures, render state, draw calls) plus the vertex and face tables the
//! draw calls point at.
//!
//! Vertex tables are interleaved: every vertex occupies `stride` bytes and
//! each attribute sits at a fixed offset inside it, stored with one of the
//! [`ValueEncoding`]s. A decoded component is `raw × scale`.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::codec::{decode_value, encode_value, ValueEncoding};
use crate::packing::PackedBones;

// ============================================================================
// Vertex Attributes
// ============================================================================

/// Vertex attribute register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AttributeRegister {
    Position,
    Normal,
    Color,
    BoneIndex,
    BoneWeight,
    Uv0,
    Uv1,
}

/// Location and encoding of one attribute inside a vertex
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexAttribute {
    pub register: AttributeRegister,
    /// Byte offset inside the vertex
    pub offset: u16,
    /// Component count
    pub count: u8,
    pub encoding: ValueEncoding,
    /// Multiplier applied to raw values when decoding
    pub scale: f32,
}

impl VertexAttribute {
    pub fn new(
        register: AttributeRegister,
        offset: u16,
        count: u8,
        encoding: ValueEncoding,
        scale: f32,
    ) -> Self {
        Self {
            register,
            offset,
            count,
            encoding,
            scale,
        }
    }

    /// Bytes occupied inside a vertex
    pub fn byte_size(&self) -> usize {
        self.count as usize * self.encoding.byte_width()
    }

    fn end(&self) -> usize {
        self.offset as usize + self.byte_size()
    }
}

/// Decoded components of one attribute
pub type AttributeValues = SmallVec<[f32; 4]>;

/// Interleaved vertex buffer
#[derive(Debug, Clone, PartialEq)]
pub struct VertexTable {
    attributes: Vec<VertexAttribute>,
    stride: usize,
    data: Vec<u8>,
}

impl VertexTable {
    /// Empty table; the stride is the end of the furthest attribute
    pub fn new(attributes: Vec<VertexAttribute>) -> Self {
        let stride = attributes.iter().map(VertexAttribute::end).max().unwrap_or(0);
        Self {
            attributes,
            stride,
            data: Vec::new(),
        }
    }

    pub fn attributes(&self) -> &[VertexAttribute] {
        &self.attributes
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn attribute(&self, register: AttributeRegister) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.register == register)
    }

    pub fn has(&self, register: AttributeRegister) -> bool {
        self.attribute(register).is_some()
    }

    pub fn vertex_count(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride
        }
    }

    /// Raw (unscaled) components of an attribute
    pub fn read_raw(&self, vertex: usize, register: AttributeRegister) -> Option<AttributeValues> {
        let attribute = self.attribute(register)?;
        let start = vertex * self.stride + attribute.offset as usize;
        let bytes = self.data.get(start..start + attribute.byte_size())?;
        Some(
            bytes
                .chunks_exact(attribute.encoding.byte_width())
                .map(|chunk| decode_value(chunk, attribute.encoding))
                .collect(),
        )
    }

    /// Decoded components of an attribute (`raw × scale`)
    pub fn read(&self, vertex: usize, register: AttributeRegister) -> Option<AttributeValues> {
        let scale = self.attribute(register)?.scale;
        let mut values = self.read_raw(vertex, register)?;
        values.iter_mut().for_each(|v| *v *= scale);
        Some(values)
    }

    /// Bone slots of a vertex, when the table carries them
    pub fn bone_slots(&self, vertex: usize) -> Option<PackedBones> {
        let indices = self.read_raw(vertex, AttributeRegister::BoneIndex)?;
        let weights = self.read_raw(vertex, AttributeRegister::BoneWeight)?;
        let mut packed = PackedBones::default();
        for slot in 0..4 {
            packed.indices[slot] = indices.get(slot).copied().unwrap_or(0.0) as u8;
            packed.weights[slot] = weights.get(slot).copied().unwrap_or(0.0) as u8;
        }
        Some(packed)
    }

    /// Append one vertex from raw (already quantized) values
    ///
    /// Attributes without values are zero-filled.
    pub fn push_vertex(&mut self, values: &[(AttributeRegister, &[f32])]) {
        let base = self.data.len();
        self.data.resize(base + self.stride, 0);

        let mut encoded = Vec::with_capacity(16);
        for attribute in &self.attributes {
            let Some((_, components)) = values.iter().find(|(r, _)| *r == attribute.register)
            else {
                continue;
            };
            encoded.clear();
            for i in 0..attribute.count as usize {
                let value = components.get(i).copied().unwrap_or(0.0);
                encode_value(value, attribute.encoding, &mut encoded);
            }
            let start = base + attribute.offset as usize;
            self.data[start..start + encoded.len()].copy_from_slice(&encoded);
        }
    }
}

/// Triangle list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaceTable {
    pub triangles: Vec<[u32; 3]>,
}

impl FaceTable {
    pub fn new(triangles: Vec<[u32; 3]>) -> Self {
        Self { triangles }
    }

    /// Flattened index list
    pub fn indices(&self) -> Vec<u32> {
        self.triangles.iter().flatten().copied().collect()
    }
}

// ============================================================================
// Mesh Entries
// ============================================================================

/// Assignment slot → skeleton joint
pub type JointAssignment = BTreeMap<u16, u16>;

/// One mesh payload entry
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEntry {
    /// Changed joint slots, merged over the running assignment
    JointAssignment(JointAssignment),
    Material(u16),
    /// Texture slot → texture index
    Texture(BTreeMap<u16, u16>),
    RenderState { blend: bool, mask: bool },
    Draw { vertex_table: u16, face_table: u16 },
}

/// Ordered mesh entries plus the tables they reference
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshPayload {
    pub entries: Vec<MeshEntry>,
    pub vertex_tables: Vec<VertexTable>,
    pub face_tables: Vec<FaceTable>,
}

/// Resolved state of one draw call
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub vertex_table: u16,
    pub face_table: u16,
    pub assignment: JointAssignment,
    pub material: Option<u16>,
    pub textures: BTreeMap<u16, u16>,
}

#[derive(Debug, Default)]
struct EntryState {
    assignment: JointAssignment,
    material: Option<u16>,
    textures: BTreeMap<u16, u16>,
    draws: Vec<DrawCall>,
}

impl MeshPayload {
    /// Draw calls with the assignment, material and textures in effect
    pub fn draw_calls(&self) -> Vec<DrawCall> {
        self.entries
            .iter()
            .fold(EntryState::default(), |mut state, entry| {
                match entry {
                    MeshEntry::JointAssignment(changes) => state.assignment.extend(changes),
                    MeshEntry::Material(material) => state.material = Some(*material),
                    MeshEntry::Texture(textures) => state.textures.extend(textures),
                    MeshEntry::RenderState { .. } => {}
                    MeshEntry::Draw {
                        vertex_table,
                        face_table,
                    } => state.draws.push(DrawCall {
                        vertex_table: *vertex_table,
                        face_table: *face_table,
                        assignment: state.assignment.clone(),
                        material: state.material,
                        textures: state.textures.clone(),
                    }),
                }
                state
            })
            .draws
    }

    /// Number of joint assignment entries
    pub fn assignment_changes(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, MeshEntry::JointAssignment(_)))
            .count()
    }
}
