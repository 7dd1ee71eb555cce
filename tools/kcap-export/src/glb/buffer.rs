//! Binary buffer packing with automatic alignment and accessor creation

use super::utils::{align_buffer, compute_bounds};
use gltf_json as json;
use gltf_json::accessor::{ComponentType, GenericComponentType, Type};
use gltf_json::validation::Checked::Valid;

/// Accessor index returned by buffer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessorIndex(pub u32);

impl AccessorIndex {
    pub fn as_json_index(&self) -> json::Index<json::Accessor> {
        json::Index::new(self.0)
    }
}

/// How one packed array is described to glTF
struct AccessorLayout {
    component_type: ComponentType,
    type_: Type,
    target: Option<json::buffer::Target>,
    bounds: Option<(Vec<f32>, Vec<f32>)>,
}

/// Builder for the single binary buffer of a GLB
#[derive(Default)]
pub struct BufferBuilder {
    buffer: Vec<u8>,
    views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accessor_count(&self) -> u32 {
        self.accessors.len() as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn views(&self) -> &[json::buffer::View] {
        &self.views
    }

    pub fn accessors(&self) -> &[json::Accessor] {
        &self.accessors
    }

    /// Pack Vec3 positions with bounds
    pub fn pack_positions(&mut self, positions: &[[f32; 3]]) -> AccessorIndex {
        self.pack(
            positions,
            AccessorLayout {
                component_type: ComponentType::F32,
                type_: Type::Vec3,
                target: Some(json::buffer::Target::ArrayBuffer),
                bounds: Some(compute_bounds(positions)),
            },
        )
    }

    /// Pack Vec3 vertex data (normals)
    pub fn pack_vec3(&mut self, data: &[[f32; 3]]) -> AccessorIndex {
        self.pack(data, vertex_layout(ComponentType::F32, Type::Vec3))
    }

    /// Pack Vec2 vertex data (UVs)
    pub fn pack_vec2(&mut self, data: &[[f32; 2]]) -> AccessorIndex {
        self.pack(data, vertex_layout(ComponentType::F32, Type::Vec2))
    }

    /// Pack Vec4 vertex data (colors, weights)
    pub fn pack_vec4(&mut self, data: &[[f32; 4]]) -> AccessorIndex {
        self.pack(data, vertex_layout(ComponentType::F32, Type::Vec4))
    }

    /// Pack skin joint indices (Vec4<u16>)
    pub fn pack_joints(&mut self, joints: &[[u16; 4]]) -> AccessorIndex {
        self.pack(joints, vertex_layout(ComponentType::U16, Type::Vec4))
    }

    /// Pack u32 triangle indices
    pub fn pack_indices(&mut self, indices: &[u32]) -> AccessorIndex {
        self.pack(
            indices,
            AccessorLayout {
                component_type: ComponentType::U32,
                type_: Type::Scalar,
                target: Some(json::buffer::Target::ElementArrayBuffer),
                bounds: None,
            },
        )
    }

    /// Pack column-major Mat4 data (inverse bind matrices)
    pub fn pack_mat4(&mut self, matrices: &[[f32; 16]]) -> AccessorIndex {
        self.pack(matrices, animation_layout(Type::Mat4, None))
    }

    /// Pack keyframe times with bounds
    pub fn pack_scalars_with_bounds(&mut self, scalars: &[f32]) -> AccessorIndex {
        let singles: Vec<[f32; 1]> = scalars.iter().map(|&s| [s]).collect();
        self.pack(
            scalars,
            animation_layout(Type::Scalar, Some(compute_bounds(&singles))),
        )
    }

    /// Pack keyframe Vec3 outputs (translations, scales) with bounds
    pub fn pack_vec3_with_bounds(&mut self, data: &[[f32; 3]]) -> AccessorIndex {
        self.pack(data, animation_layout(Type::Vec3, Some(compute_bounds(data))))
    }

    /// Pack keyframe Vec4 outputs (rotations) with bounds
    pub fn pack_vec4_with_bounds(&mut self, data: &[[f32; 4]]) -> AccessorIndex {
        self.pack(data, animation_layout(Type::Vec4, Some(compute_bounds(data))))
    }

    fn pack<T: bytemuck::Pod>(&mut self, data: &[T], layout: AccessorLayout) -> AccessorIndex {
        let offset = self.buffer.len();
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.buffer.extend_from_slice(bytes);

        self.views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: bytes.len().into(),
            byte_offset: Some((offset as u64).into()),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: layout.target.map(Valid),
        });

        let to_json = |values: Vec<f32>| {
            json::Value::Array(values.into_iter().map(json::Value::from).collect())
        };
        let (min, max) = match layout.bounds {
            Some((min, max)) if !min.is_empty() => (Some(to_json(min)), Some(to_json(max))),
            _ => (None, None),
        };

        let accessor_idx = self.accessors.len() as u32;
        self.accessors.push(json::Accessor {
            buffer_view: Some(json::Index::new(self.views.len() as u32 - 1)),
            byte_offset: Some(0u64.into()),
            count: data.len().into(),
            component_type: Valid(GenericComponentType(layout.component_type)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(layout.type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
        });

        align_buffer(&mut self.buffer);
        AccessorIndex(accessor_idx)
    }
}

fn vertex_layout(component_type: ComponentType, type_: Type) -> AccessorLayout {
    AccessorLayout {
        component_type,
        type_,
        target: Some(json::buffer::Target::ArrayBuffer),
        bounds: None,
    }
}

fn animation_layout(type_: Type, bounds: Option<(Vec<f32>, Vec<f32>)>) -> AccessorLayout {
    AccessorLayout {
        component_type: ComponentType::F32,
        type_,
        target: None,
        bounds,
    }
}
