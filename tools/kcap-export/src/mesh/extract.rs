//! Vertex table → glTF geometry and skin

use anyhow::{bail, Context, Result};
use kcap_common::formats::{AttributeRegister, FaceTable, JointAssignment, VertexTable};
use kcap_common::{unpack_bone_slots, SkeletonTable};

use super::{Geometry, Influences, SkinBinding};
use crate::config::UvTransform;

/// Turns one draw call's tables into geometry and an optional skin
#[derive(Debug, Clone)]
pub struct SkinnedMeshExtractor<'a> {
    skeleton: &'a SkeletonTable,
    uv_transforms: Vec<UvTransform>,
}

impl<'a> SkinnedMeshExtractor<'a> {
    pub fn new(skeleton: &'a SkeletonTable) -> Self {
        Self {
            skeleton,
            uv_transforms: Vec::new(),
        }
    }

    /// UV transforms per texture slot; unlisted slots are identity
    pub fn with_uv_transforms(mut self, transforms: &[UvTransform]) -> Self {
        self.uv_transforms = transforms.to_vec();
        self
    }

    /// Extract geometry and skin
    ///
    /// `assignment` is the joint assignment in effect for the draw call.
    /// The skin is `None` when the vertex table carries no bone slots.
    pub fn extract(
        &self,
        vertices: &VertexTable,
        faces: &FaceTable,
        assignment: &JointAssignment,
    ) -> Result<(Option<SkinBinding>, Geometry)> {
        let count = vertices.vertex_count();
        let positions = read_all(vertices, count, AttributeRegister::Position, |v| {
            [at(v, 0, 0.0), at(v, 1, 0.0), at(v, 2, 0.0)]
        })
        .context("Vertex table has no position attribute")?;
        let normals = read_all(vertices, count, AttributeRegister::Normal, |v| {
            [at(v, 0, 0.0), at(v, 1, 0.0), at(v, 2, 0.0)]
        });
        let colors = read_all(vertices, count, AttributeRegister::Color, |v| {
            [at(v, 0, 0.0), at(v, 1, 0.0), at(v, 2, 0.0), at(v, 3, 1.0)]
        });
        let uv0 = self.read_uvs(vertices, count, AttributeRegister::Uv0, 0);
        let uv1 = self.read_uvs(vertices, count, AttributeRegister::Uv1, 1);

        let indices = faces.indices();
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= count) {
            bail!(
                "Face table references vertex {} but the vertex table has {}",
                index,
                count
            );
        }

        let skin = self.extract_skin(vertices, count, assignment)?;

        Ok((
            skin,
            Geometry {
                positions,
                normals,
                colors,
                uv0,
                uv1,
                indices,
            },
        ))
    }

    fn read_uvs(
        &self,
        vertices: &VertexTable,
        count: usize,
        register: AttributeRegister,
        slot: u16,
    ) -> Option<Vec<[f32; 2]>> {
        let transform = UvTransform::for_slot(&self.uv_transforms, slot);
        read_all(vertices, count, register, |v| {
            transform.apply([at(v, 0, 0.0), at(v, 1, 0.0)])
        })
    }

    fn extract_skin(
        &self,
        vertices: &VertexTable,
        count: usize,
        assignment: &JointAssignment,
    ) -> Result<Option<SkinBinding>> {
        if !vertices.has(AttributeRegister::BoneIndex) || !vertices.has(AttributeRegister::BoneWeight)
        {
            return Ok(None);
        }

        // Skin joints in slot order; several slots may share a joint
        let mut joints: Vec<u16> = Vec::new();
        let mut slot_to_skin = JointAssignment::new();
        for (&slot, &joint) in assignment {
            if joint as usize >= self.skeleton.len() {
                bail!(
                    "Joint slot {} is assigned joint {} but the skeleton has {} joints",
                    slot,
                    joint,
                    self.skeleton.len()
                );
            }
            let position = match joints.iter().position(|&j| j == joint) {
                Some(position) => position,
                None => {
                    joints.push(joint);
                    joints.len() - 1
                }
            };
            slot_to_skin.insert(slot, position as u16);
        }

        let mut weights: Vec<Influences> = Vec::with_capacity(count);
        for vertex in 0..count {
            let packed = vertices
                .bone_slots(vertex)
                .with_context(|| format!("Vertex {} has no bone slots", vertex))?;

            let mut influences: Influences = [(0, 0.0); 4];
            for (out, (slot, weight)) in influences.iter_mut().zip(unpack_bone_slots(&packed)) {
                if slot == 0 && weight <= 0.0 {
                    continue;
                }
                let Some(&skin_joint) = slot_to_skin.get(&slot) else {
                    bail!("Vertex {} uses unassigned joint slot {}", vertex, slot);
                };
                *out = (skin_joint, weight);
            }
            weights.push(influences);
        }

        let inverse_bind_matrices = joints
            .iter()
            .map(|&j| self.skeleton.joints[j as usize].inverse_bind)
            .collect();

        Ok(Some(SkinBinding {
            joints,
            inverse_bind_matrices,
            weights,
        }))
    }
}

fn read_all<T>(
    vertices: &VertexTable,
    count: usize,
    register: AttributeRegister,
    convert: impl Fn(&[f32]) -> T,
) -> Option<Vec<T>> {
    vertices.attribute(register)?;
    (0..count)
        .map(|vertex| vertices.read(vertex, register).map(|v| convert(&v)))
        .collect()
}

/// Component `index`, or `default` when the attribute is narrower
fn at(values: &[f32], index: usize, default: f32) -> f32 {
    values.get(index).copied().unwrap_or(default)
}
