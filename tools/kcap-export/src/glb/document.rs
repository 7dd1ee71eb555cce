//! glTF document construction

use super::buffer::AccessorIndex;
use gltf_json as json;
use gltf_json::validation::Checked::Valid;
use std::collections::BTreeMap;

/// Accessors of one skinned primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveAccessors {
    pub positions: AccessorIndex,
    pub normals: Option<AccessorIndex>,
    pub colors: Option<AccessorIndex>,
    pub uv0: Option<AccessorIndex>,
    pub uv1: Option<AccessorIndex>,
    pub joints: Option<AccessorIndex>,
    pub weights: Option<AccessorIndex>,
    pub indices: Option<AccessorIndex>,
}

/// One sampler/channel pair of an animation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationChannel {
    pub node: u32,
    pub property: json::animation::Property,
    pub times: AccessorIndex,
    pub values: AccessorIndex,
}

/// Builder for complete glTF documents
#[derive(Default)]
pub struct GltfBuilder {
    nodes: Vec<json::Node>,
    meshes: Vec<json::Mesh>,
    materials: Vec<json::Material>,
    skins: Vec<json::Skin>,
    animations: Vec<json::Animation>,
    scenes: Vec<json::Scene>,
    buffer_byte_length: u64,
}

impl GltfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set buffer byte length (required before building)
    pub fn buffer_byte_length(mut self, length: u64) -> Self {
        self.buffer_byte_length = length;
        self
    }

    pub fn add_node(mut self, node: json::Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn add_nodes(mut self, nodes: Vec<json::Node>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Add placeholder materials until `count` exist
    pub fn ensure_materials(mut self, count: usize) -> Self {
        while self.materials.len() < count {
            let name = format!("material_{}", self.materials.len());
            self.materials.push(json::Material {
                name: Some(name),
                ..Default::default()
            });
        }
        self
    }

    /// Add a mesh with a single triangle primitive
    pub fn add_mesh(
        mut self,
        name: &str,
        accessors: &PrimitiveAccessors,
        material: Option<u32>,
    ) -> Self {
        use json::mesh::Semantic;

        let mut attributes = BTreeMap::new();
        attributes.insert(
            Valid(Semantic::Positions),
            accessors.positions.as_json_index(),
        );

        let optional = [
            (Semantic::Normals, accessors.normals),
            (Semantic::Colors(0), accessors.colors),
            (Semantic::TexCoords(0), accessors.uv0),
            (Semantic::TexCoords(1), accessors.uv1),
            (Semantic::Joints(0), accessors.joints),
            (Semantic::Weights(0), accessors.weights),
        ];
        for (semantic, accessor) in optional {
            if let Some(accessor) = accessor {
                attributes.insert(Valid(semantic), accessor.as_json_index());
            }
        }

        let primitive = json::mesh::Primitive {
            attributes,
            extensions: Default::default(),
            extras: Default::default(),
            indices: accessors.indices.map(|i| i.as_json_index()),
            material: material.map(json::Index::new),
            mode: Valid(json::mesh::Mode::Triangles),
            targets: None,
        };

        self.meshes.push(json::Mesh {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some(name.to_string()),
            primitives: vec![primitive],
            weights: None,
        });
        self
    }

    /// Index of the last added mesh
    pub fn last_mesh_index(&self) -> Option<json::Index<json::Mesh>> {
        if self.meshes.is_empty() {
            None
        } else {
            Some(json::Index::new(self.meshes.len() as u32 - 1))
        }
    }

    /// Add a skin
    pub fn add_skin(
        mut self,
        name: &str,
        skeleton_root: Option<u32>,
        joints: &[u32],
        inverse_bind_matrices: AccessorIndex,
    ) -> Self {
        self.skins.push(json::Skin {
            extensions: Default::default(),
            extras: Default::default(),
            inverse_bind_matrices: Some(inverse_bind_matrices.as_json_index()),
            joints: joints.iter().map(|j| json::Index::new(*j)).collect(),
            name: Some(name.to_string()),
            skeleton: skeleton_root.map(json::Index::new),
        });
        self
    }

    /// Index of the last added skin
    pub fn last_skin_index(&self) -> Option<json::Index<json::Skin>> {
        if self.skins.is_empty() {
            None
        } else {
            Some(json::Index::new(self.skins.len() as u32 - 1))
        }
    }

    /// Add an animation with one LINEAR sampler per channel
    pub fn add_animation(mut self, name: &str, channels: &[AnimationChannel]) -> Self {
        let mut samplers = Vec::with_capacity(channels.len());
        let mut targets = Vec::with_capacity(channels.len());

        for channel in channels {
            samplers.push(json::animation::Sampler {
                input: channel.times.as_json_index(),
                interpolation: Valid(json::animation::Interpolation::Linear),
                output: channel.values.as_json_index(),
                extensions: Default::default(),
                extras: Default::default(),
            });
            targets.push(json::animation::Channel {
                sampler: json::Index::new(samplers.len() as u32 - 1),
                target: json::animation::Target {
                    node: json::Index::new(channel.node),
                    path: Valid(channel.property),
                    extensions: Default::default(),
                    extras: Default::default(),
                },
                extensions: Default::default(),
                extras: Default::default(),
            });
        }

        self.animations.push(json::Animation {
            channels: targets,
            extensions: Default::default(),
            extras: Default::default(),
            name: Some(name.to_string()),
            samplers,
        });
        self
    }

    pub fn add_scene(mut self, name: &str, root_nodes: &[u32]) -> Self {
        self.scenes.push(json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some(name.to_string()),
            nodes: root_nodes.iter().map(|n| json::Index::new(*n)).collect(),
        });
        self
    }

    /// Build the final glTF root from the buffer's views and accessors
    pub fn build(
        self,
        buffer_views: &[json::buffer::View],
        accessors: &[json::Accessor],
        generator: &str,
    ) -> json::Root {
        let buffers = vec![json::Buffer {
            byte_length: self.buffer_byte_length.into(),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: None,
        }];

        json::Root {
            accessors: accessors.to_vec(),
            animations: self.animations,
            asset: json::Asset {
                copyright: None,
                extensions: Default::default(),
                extras: Default::default(),
                generator: Some(generator.to_string()),
                min_version: None,
                version: "2.0".to_string(),
            },
            buffers,
            buffer_views: buffer_views.to_vec(),
            cameras: Vec::new(),
            extensions: Default::default(),
            extensions_required: Vec::new(),
            extensions_used: Vec::new(),
            extras: Default::default(),
            images: Vec::new(),
            materials: self.materials,
            meshes: self.meshes,
            nodes: self.nodes,
            samplers: Vec::new(),
            scene: if self.scenes.is_empty() {
                None
            } else {
                Some(json::Index::new(0))
            },
            scenes: self.scenes,
            skins: self.skins,
            textures: Vec::new(),
        }
    }
}
