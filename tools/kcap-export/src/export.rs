//! Export: skeleton, clips and mesh tables → glTF/GLB
//!
//! Joints become the first nodes of the document (node index = joint
//! index), followed by one node per draw call. Each clip becomes one
//! animation with a LINEAR sampler per kept curve.

use anyhow::{bail, Context, Result};
use gltf_json as json;
use gltf_json::animation::Property;
use hashbrown::{HashMap, HashSet};
use kcap_common::formats::skeleton::from_row_major;
use kcap_common::{Curve, MeshPayload, SkeletonTable, TransformKind, TransformTable};
use tracing::{debug, info, warn};

use crate::config::ExportConfig;
use crate::glb::{
    assemble_glb, AccessorIndex, AnimationChannel, BufferBuilder, GltfBuilder, PrimitiveAccessors,
};
use crate::mesh::{Geometry, SkinBinding, SkinnedMeshExtractor};

/// Generator string written into the glTF asset
pub const GENERATOR: &str = concat!("kcap-export ", env!("CARGO_PKG_VERSION"));

/// One clip and the slot it was loaded for
#[derive(Debug, Clone)]
pub struct ClipInput<'a> {
    pub slot: usize,
    pub table: &'a TransformTable,
}

/// Build the glTF document and its binary buffer
pub fn build_gltf(
    skeleton: &SkeletonTable,
    clips: &[ClipInput],
    meshes: &[MeshPayload],
    config: &ExportConfig,
) -> Result<(json::Root, Vec<u8>)> {
    skeleton
        .validate()
        .context("Skeleton is not a valid hierarchy")?;

    let mut buffer = BufferBuilder::new();
    let mut gltf = GltfBuilder::new().add_nodes(joint_nodes(skeleton));

    let mut roots: Vec<u32> = skeleton.roots().map(|r| r as u32).collect();
    // glTF names a skin's skeleton root only when all joints share one
    let skeleton_root = match roots.as_slice() {
        [root] => Some(*root),
        _ => None,
    };

    let extractor = SkinnedMeshExtractor::new(skeleton).with_uv_transforms(&config.uv_transforms);
    for (payload_index, payload) in meshes.iter().enumerate() {
        for (draw_index, call) in payload.draw_calls().iter().enumerate() {
            let name = format!("mesh_{}_{}", payload_index, draw_index);
            let (Some(vertices), Some(faces)) = (
                payload.vertex_tables.get(call.vertex_table as usize),
                payload.face_tables.get(call.face_table as usize),
            ) else {
                bail!(
                    "Draw call {} references vertex table {} and face table {}, which do not exist",
                    name,
                    call.vertex_table,
                    call.face_table
                );
            };

            let (skin, geometry) = extractor
                .extract(vertices, faces, &call.assignment)
                .with_context(|| format!("Failed to extract {}", name))?;
            let skin = skin.filter(|s| !s.joints.is_empty());

            let accessors = pack_geometry(&mut buffer, &geometry, skin.as_ref());
            if let Some(material) = call.material {
                gltf = gltf.ensure_materials(material as usize + 1);
            }
            gltf = gltf.add_mesh(&name, &accessors, call.material.map(u32::from));
            let mesh = gltf.last_mesh_index();

            let skin_index = match &skin {
                Some(skin) => {
                    let matrices: Vec<[f32; 16]> = skin
                        .inverse_bind_matrices
                        .iter()
                        .map(|m| from_row_major(m).to_cols_array())
                        .collect();
                    let ibm = buffer.pack_mat4(&matrices);
                    let joints: Vec<u32> = skin.joints.iter().map(|&j| u32::from(j)).collect();
                    gltf = gltf.add_skin(&name, skeleton_root, &joints, ibm);
                    gltf.last_skin_index()
                }
                None => None,
            };

            roots.push(gltf.node_count());
            gltf = gltf.add_node(json::Node {
                camera: None,
                children: None,
                extensions: Default::default(),
                extras: Default::default(),
                matrix: None,
                mesh,
                name: Some(name),
                rotation: None,
                scale: None,
                translation: None,
                skin: skin_index,
                weights: None,
            });
        }
    }

    for clip in clips {
        let name = config.clip_name(clip.slot);
        let curves = clip
            .table
            .reconstruct_curves(skeleton.len())
            .with_context(|| format!("Failed to reconstruct clip '{}'", name))?;
        let curves = select_curves(curves, config);
        if curves.is_empty() {
            warn!("Clip '{}' has no channels to export, skipping it", name);
            continue;
        }

        let channels: Vec<AnimationChannel> = curves
            .iter()
            .map(|curve| pack_curve(&mut buffer, curve))
            .collect();
        info!(
            "Clip '{}': {} channels, {:.3}s",
            name,
            channels.len(),
            clip.table.markers.duration()
        );
        gltf = gltf.add_animation(&name, &channels);
    }

    let root = gltf
        .add_scene("Scene", &roots)
        .buffer_byte_length(buffer.data().len() as u64)
        .build(buffer.views(), buffer.accessors(), GENERATOR);
    Ok((root, buffer.data().to_vec()))
}

/// Build the GLB bytes
pub fn export_glb(
    skeleton: &SkeletonTable,
    clips: &[ClipInput],
    meshes: &[MeshPayload],
    config: &ExportConfig,
) -> Result<Vec<u8>> {
    let (root, data) = build_gltf(skeleton, clips, meshes, config)?;
    assemble_glb(&root, &data)
}

/// Rest-pose joint nodes with parent links as children
fn joint_nodes(skeleton: &SkeletonTable) -> Vec<json::Node> {
    skeleton
        .joints
        .iter()
        .enumerate()
        .map(|(index, joint)| {
            let children: Vec<json::Index<json::Node>> = skeleton
                .children(index)
                .map(|c| json::Index::new(c as u32))
                .collect();
            json::Node {
                camera: None,
                children: if children.is_empty() {
                    None
                } else {
                    Some(children)
                },
                extensions: Default::default(),
                extras: Default::default(),
                matrix: None,
                mesh: None,
                name: Some(joint.name.clone()),
                rotation: Some(json::scene::UnitQuaternion(joint.rotation)),
                scale: Some(joint.rest_scale()),
                translation: Some(joint.translation),
                skin: None,
                weights: None,
            }
        })
        .collect()
}

fn pack_geometry(
    buffer: &mut BufferBuilder,
    geometry: &Geometry,
    skin: Option<&SkinBinding>,
) -> PrimitiveAccessors {
    let positions = buffer.pack_positions(&geometry.positions);
    let normals = geometry.normals.as_deref().map(|n| buffer.pack_vec3(n));
    let colors = geometry.colors.as_deref().map(|c| buffer.pack_vec4(c));
    let uv0 = geometry.uv0.as_deref().map(|uv| buffer.pack_vec2(uv));
    let uv1 = geometry.uv1.as_deref().map(|uv| buffer.pack_vec2(uv));

    let (joints, weights) = match skin {
        Some(skin) => {
            let joints: Vec<[u16; 4]> = skin
                .weights
                .iter()
                .map(|set| set.map(|(joint, _)| joint))
                .collect();
            let weights: Vec<[f32; 4]> = skin
                .weights
                .iter()
                .map(|set| set.map(|(_, weight)| weight))
                .collect();
            (
                Some(buffer.pack_joints(&joints)),
                Some(buffer.pack_vec4(&weights)),
            )
        }
        None => (None, None),
    };

    let indices = buffer.pack_indices(&geometry.indices);
    PrimitiveAccessors {
        positions,
        normals,
        colors,
        uv0,
        uv1,
        joints,
        weights,
        indices: Some(indices),
    }
}

/// glTF animation path of a transform kind
pub fn property_of(kind: TransformKind) -> Property {
    match kind {
        TransformKind::Translation => Property::Translation,
        TransformKind::Rotation => Property::Rotation,
        TransformKind::Scale | TransformKind::LocalScale => Property::Scale,
    }
}

/// Curves that end up as animation channels
///
/// Applies the static channel policy. A joint with both a scale and a local
/// scale curve keeps the local scale one. When two curves drive the same
/// path, the later one is kept.
pub fn select_curves(curves: Vec<Curve>, config: &ExportConfig) -> Vec<Curve> {
    let kept: Vec<Curve> = curves
        .into_iter()
        .filter(|curve| config.static_channels.keeps(curve, config.epsilon))
        .collect();

    let local_scaled: HashSet<u16> = kept
        .iter()
        .filter(|c| c.kind == TransformKind::LocalScale)
        .map(|c| c.target)
        .collect();

    let mut selected: Vec<Curve> = Vec::with_capacity(kept.len());
    let mut slot_of: HashMap<(u16, u8), usize> = HashMap::new();
    for curve in kept {
        if curve.kind == TransformKind::Scale && local_scaled.contains(&curve.target) {
            debug!(
                "Joint {} has a local scale curve, dropping its scale curve",
                curve.target
            );
            continue;
        }
        let key = (curve.target, property_key(curve.kind));
        match slot_of.get(&key) {
            Some(&index) => {
                warn!(
                    "Joint {} has more than one {:?} curve, keeping the last",
                    curve.target, curve.kind
                );
                selected[index] = curve;
            }
            None => {
                slot_of.insert(key, selected.len());
                selected.push(curve);
            }
        }
    }
    selected
}

fn property_key(kind: TransformKind) -> u8 {
    match property_of(kind) {
        Property::Translation => 0,
        Property::Rotation => 1,
        Property::Scale => 2,
        Property::MorphTargetWeights => 3,
    }
}

fn pack_curve(buffer: &mut BufferBuilder, curve: &Curve) -> AnimationChannel {
    let times: AccessorIndex = buffer.pack_scalars_with_bounds(&curve.times);
    let values = match curve.kind {
        TransformKind::Rotation => buffer.pack_vec4_with_bounds(&curve.values),
        _ => buffer.pack_vec3_with_bounds(&curve.vec3_values()),
    };
    AnimationChannel {
        node: u32::from(curve.target),
        property: property_of(curve.kind),
        times,
        values,
    }
}
