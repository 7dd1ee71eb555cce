//! Imported scene model and the glTF front end
//!
//! Import staging only sees [`ImportedScene`]; the glTF reader below is one
//! way of producing it.

use anyhow::{bail, Context, Result};
use glam::{Mat4, Quat, Vec3};
use gltf::animation::util::ReadOutputs;
use gltf::animation::Interpolation;
use kcap_common::{QuatKey, VectorKey};
use std::path::Path;
use tracing::{debug, info};

use crate::mesh::{Geometry, RenderState};

/// Scene node with its rest transform
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub name: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub translation: [f32; 3],
    /// Quaternion xyzw
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
}

impl SceneNode {
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::from_array(self.scale),
            Quat::from_array(self.rotation),
            Vec3::from_array(self.translation),
        )
    }
}

/// One triangle primitive
#[derive(Debug, Clone, PartialEq)]
pub struct ScenePrimitive {
    pub name: String,
    pub geometry: Geometry,
    /// Influences per vertex as (node, weight)
    pub influences: Option<Vec<[(usize, f32); 4]>>,
    pub material: Option<usize>,
    /// Base color texture of the material
    pub texture: Option<usize>,
    pub render_state: RenderState,
}

/// Keyframes of one node in one animation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeChannels {
    pub node: usize,
    pub translations: Vec<VectorKey>,
    pub rotations: Vec<QuatKey>,
    pub scales: Vec<VectorKey>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneAnimation {
    pub name: String,
    /// Length in seconds
    pub duration: f32,
    /// Unit of the key times
    pub ticks_per_second: f64,
    pub channels: Vec<NodeChannels>,
}

/// Everything import staging needs from a source scene
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedScene {
    pub nodes: Vec<SceneNode>,
    pub primitives: Vec<ScenePrimitive>,
    /// Joint nodes per skin
    pub skins: Vec<Vec<usize>>,
    pub animations: Vec<SceneAnimation>,
}

impl ImportedScene {
    /// Nodes in depth-first order, roots in index order
    pub fn depth_first(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(i, _)| i)
            .rev()
            .collect();
        while let Some(index) = stack.pop() {
            order.push(index);
            stack.extend(self.nodes[index].children.iter().rev());
        }
        order
    }

    /// Ancestors of `node`, nearest first
    pub fn ancestors(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.nodes[node].parent, move |&p| self.nodes[p].parent)
    }

    /// Transform of `node` relative to the scene root
    pub fn global_matrix(&self, node: usize) -> Mat4 {
        self.ancestors(node)
            .fold(self.nodes[node].local_matrix(), |acc, parent| {
                self.nodes[parent].local_matrix() * acc
            })
    }

    /// Product of the scales of the ancestors of `node`
    pub fn accumulated_scale(&self, node: usize) -> [f32; 3] {
        self.ancestors(node).fold([1.0; 3], |acc, parent| {
            let scale = self.nodes[parent].scale;
            [acc[0] * scale[0], acc[1] * scale[1], acc[2] * scale[2]]
        })
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }
}

// ============================================================================
// glTF Front End
// ============================================================================

/// Load a glTF/GLB file
pub fn load_gltf(path: &Path) -> Result<ImportedScene> {
    let (document, buffers, _images) =
        gltf::import(path).with_context(|| format!("Failed to load glTF: {:?}", path))?;
    let scene = from_gltf(&document, &buffers)?;
    info!(
        "Loaded {:?}: {} nodes, {} primitives, {} animations",
        path,
        scene.nodes.len(),
        scene.primitives.len(),
        scene.animations.len()
    );
    Ok(scene)
}

/// Load glTF/GLB data already in memory
pub fn load_gltf_slice(bytes: &[u8]) -> Result<ImportedScene> {
    let (document, buffers, _images) =
        gltf::import_slice(bytes).context("Failed to parse glTF data")?;
    from_gltf(&document, &buffers)
}

/// Convert a parsed glTF document
pub fn from_gltf(document: &gltf::Document, buffers: &[gltf::buffer::Data]) -> Result<ImportedScene> {
    let mut nodes: Vec<SceneNode> = document
        .nodes()
        .map(|node| {
            let (translation, rotation, scale) = node.transform().decomposed();
            SceneNode {
                name: node
                    .name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("node_{}", node.index())),
                parent: None,
                children: node.children().map(|c| c.index()).collect(),
                translation,
                rotation,
                scale,
            }
        })
        .collect();

    for index in 0..nodes.len() {
        for child in nodes[index].children.clone() {
            if nodes[child].parent.is_some() {
                bail!("Node {} has more than one parent", child);
            }
            nodes[child].parent = Some(index);
        }
    }

    let skins: Vec<Vec<usize>> = document
        .skins()
        .map(|skin| skin.joints().map(|j| j.index()).collect())
        .collect();

    let mut primitives = Vec::new();
    for node in document.nodes() {
        let Some(mesh) = node.mesh() else {
            continue;
        };
        let skin_joints = node.skin().map(|s| &skins[s.index()]);
        let mesh_name = mesh
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("mesh_{}", mesh.index()));

        for primitive in mesh.primitives() {
            let name = format!("{}.{}", mesh_name, primitive.index());
            primitives.push(
                read_primitive(&primitive, buffers, skin_joints, name.clone())
                    .with_context(|| format!("Failed to read primitive {}", name))?,
            );
        }
    }

    let animations = document
        .animations()
        .map(|animation| read_animation(&animation, buffers))
        .collect::<Result<Vec<_>>>()?;

    Ok(ImportedScene {
        nodes,
        primitives,
        skins,
        animations,
    })
}

fn read_primitive(
    primitive: &gltf::Primitive,
    buffers: &[gltf::buffer::Data],
    skin_joints: Option<&Vec<usize>>,
    name: String,
) -> Result<ScenePrimitive> {
    if primitive.mode() != gltf::mesh::Mode::Triangles {
        bail!("Only triangle lists are supported, found {:?}", primitive.mode());
    }

    let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));

    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .context("No positions in primitive")?
        .collect();
    let normals = reader.read_normals().map(|iter| iter.collect());
    let colors = reader
        .read_colors(0)
        .map(|iter| iter.into_rgba_f32().collect());
    let uv0 = reader.read_tex_coords(0).map(|iter| iter.into_f32().collect());
    let uv1 = reader.read_tex_coords(1).map(|iter| iter.into_f32().collect());
    let indices: Vec<u32> = match reader.read_indices() {
        Some(iter) => iter.into_u32().collect(),
        None => (0..positions.len() as u32).collect(),
    };

    let joints: Option<Vec<[u16; 4]>> = reader.read_joints(0).map(|iter| iter.into_u16().collect());
    let weights: Option<Vec<[f32; 4]>> =
        reader.read_weights(0).map(|iter| iter.into_f32().collect());

    let influences = match (joints, weights, skin_joints) {
        (Some(joints), Some(weights), Some(skin_joints)) => {
            let mut influences = Vec::with_capacity(joints.len());
            for (vertex, (joint_set, weight_set)) in joints.iter().zip(&weights).enumerate() {
                let mut resolved = [(0usize, 0.0f32); 4];
                for (slot, (&joint, &weight)) in joint_set.iter().zip(weight_set).enumerate() {
                    let Some(&node) = skin_joints.get(joint as usize) else {
                        bail!(
                            "Vertex {} references skin joint {} but the skin has {}",
                            vertex,
                            joint,
                            skin_joints.len()
                        );
                    };
                    resolved[slot] = (node, weight);
                }
                influences.push(resolved);
            }
            Some(influences)
        }
        (Some(_), Some(_), None) => {
            debug!("Primitive {} has skin attributes but no skin, ignoring them", name);
            None
        }
        _ => None,
    };

    let material = primitive.material();
    let alpha_mode = material.alpha_mode();
    let texture = material
        .pbr_metallic_roughness()
        .base_color_texture()
        .map(|info| info.texture().index());

    Ok(ScenePrimitive {
        name,
        geometry: Geometry {
            positions,
            normals,
            colors,
            uv0,
            uv1,
            indices,
        },
        influences,
        material: material.index(),
        texture,
        render_state: RenderState {
            blend: alpha_mode == gltf::material::AlphaMode::Blend,
            mask: alpha_mode == gltf::material::AlphaMode::Mask,
        },
    })
}

fn read_animation(
    animation: &gltf::Animation,
    buffers: &[gltf::buffer::Data],
) -> Result<SceneAnimation> {
    let name = animation
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("anim_{}", animation.index()));

    let mut channels: Vec<NodeChannels> = Vec::new();
    let mut duration = 0.0f32;

    for channel in animation.channels() {
        let node = channel.target().node().index();
        let reader = channel.reader(|buffer| Some(&buffers[buffer.index()]));

        let times: Vec<f32> = reader
            .read_inputs()
            .with_context(|| format!("Animation '{}' has a channel without inputs", name))?
            .collect();
        duration = times.iter().copied().fold(duration, f32::max);

        // Cubic spline outputs are (in tangent, value, out tangent) triples
        let (skip, step) = match channel.sampler().interpolation() {
            Interpolation::CubicSpline => (1, 3),
            _ => (0, 1),
        };

        let Some(outputs) = reader.read_outputs() else {
            bail!("Animation '{}' has a channel without outputs", name);
        };

        let position = match channels.iter().position(|c| c.node == node) {
            Some(position) => position,
            None => {
                channels.push(NodeChannels {
                    node,
                    ..Default::default()
                });
                channels.len() - 1
            }
        };
        let entry = &mut channels[position];

        let vector_keys = |values: Vec<[f32; 3]>| -> Vec<VectorKey> {
            times
                .iter()
                .zip(values.into_iter().skip(skip).step_by(step))
                .map(|(&time, value)| VectorKey {
                    time: time as f64,
                    value,
                })
                .collect()
        };

        match outputs {
            ReadOutputs::Translations(iter) => entry.translations = vector_keys(iter.collect()),
            ReadOutputs::Scales(iter) => entry.scales = vector_keys(iter.collect()),
            ReadOutputs::Rotations(rotations) => {
                entry.rotations = times
                    .iter()
                    .zip(rotations.into_f32().skip(skip).step_by(step))
                    .map(|(&time, value)| QuatKey {
                        time: time as f64,
                        value,
                    })
                    .collect();
            }
            ReadOutputs::MorphTargetWeights(_) => {
                debug!("Skipping morph target weights in animation '{}'", name);
            }
        }
    }

    Ok(SceneAnimation {
        name,
        duration,
        ticks_per_second: 1.0,
        channels,
    })
}
