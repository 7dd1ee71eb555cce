//! Imported geometry → mesh tables
//!
//! Each draw becomes a quantized vertex table, a face table and the entries
//! that set up its state. The joint assignment, material and render state
//! are threaded from draw to draw so that only changes are emitted.
//!
//! A draw weighted to more joints than one draw call can address is split
//! into several draws along triangle boundaries.

use anyhow::{bail, Context, Result};
use kcap_common::codec::ValueEncoding;
use kcap_common::formats::{
    AttributeRegister, FaceTable, JointAssignment, MeshEntry, MeshPayload, VertexAttribute,
    VertexTable,
};
use kcap_common::packing::{
    f32_to_snorm8, f32_to_unorm8, pack_bone_slots, position_scale, quantize_position,
    MAX_BONE_SLOTS,
};
use std::collections::BTreeMap;
use tracing::debug;

use super::{Geometry, Influences};

/// Blend and alpha mask switches of a draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderState {
    pub blend: bool,
    pub mask: bool,
}

/// One primitive to store
#[derive(Debug, Clone, Copy)]
pub struct DrawInput<'a> {
    pub geometry: &'a Geometry,
    /// Skeleton joint and weight per vertex, when skinned
    pub influences: Option<&'a [Influences]>,
    pub material: Option<u16>,
    /// Texture bound to slot 0 with the material
    pub texture: Option<u16>,
    pub render_state: RenderState,
}

/// Builds a [`MeshPayload`] from imported draws
#[derive(Debug, Clone)]
pub struct MeshTableBuilder {
    max_joints_per_draw: usize,
    scale: f32,
}

/// State carried from one draw to the next
#[derive(Debug, Default)]
struct PayloadState {
    payload: MeshPayload,
    assignment: JointAssignment,
    material: Option<u16>,
    render_state: Option<RenderState>,
}

impl MeshTableBuilder {
    pub fn new(max_joints_per_draw: usize) -> Self {
        Self {
            max_joints_per_draw,
            scale: 1.0,
        }
    }

    /// Multiply positions by `scale` before quantizing
    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn build(&self, draws: &[DrawInput]) -> Result<MeshPayload> {
        if !(1..=MAX_BONE_SLOTS).contains(&self.max_joints_per_draw) {
            bail!(
                "A draw call can address between 1 and {} joints, not {}",
                MAX_BONE_SLOTS,
                self.max_joints_per_draw
            );
        }

        let mut state = PayloadState::default();
        for (index, draw) in draws.iter().enumerate() {
            validate_geometry(index, draw.geometry, draw.influences)?;
            let parts = self.split(index, draw)?;
            if parts.is_empty() {
                state = self.add_draw(state, index, draw)?;
                continue;
            }

            debug!(
                "Draw {} exceeds {} joints, split into {} draws",
                index,
                self.max_joints_per_draw,
                parts.len()
            );
            for (geometry, influences) in &parts {
                let part = DrawInput {
                    geometry,
                    influences: Some(influences),
                    material: draw.material,
                    texture: draw.texture,
                    render_state: draw.render_state,
                };
                state = self.add_draw(state, index, &part)?;
            }
        }
        Ok(state.payload)
    }

    /// Pieces of a draw that each fit the joint limit
    ///
    /// Empty when the draw fits as it is. Triangles are taken in order and a
    /// new piece starts whenever the next triangle would overflow the limit.
    fn split(&self, index: usize, draw: &DrawInput) -> Result<Vec<(Geometry, Vec<Influences>)>> {
        let Some(influences) = draw.influences else {
            return Ok(Vec::new());
        };
        if weighted_joints(influences.iter()).len() <= self.max_joints_per_draw {
            return Ok(Vec::new());
        }

        let mut parts = Vec::new();
        let mut triangles: Vec<u32> = Vec::new();
        let mut joints: Vec<u16> = Vec::new();
        for triangle in draw.geometry.indices.chunks_exact(3) {
            let used = weighted_joints(triangle.iter().map(|&v| &influences[v as usize]));
            if used.len() > self.max_joints_per_draw {
                bail!(
                    "Draw {} has a triangle weighted to {} joints but a draw call holds at most {}",
                    index,
                    used.len(),
                    self.max_joints_per_draw
                );
            }

            let added = used.iter().filter(|&j| !joints.contains(j)).count();
            if joints.len() + added > self.max_joints_per_draw {
                parts.push(sub_draw(draw.geometry, influences, &triangles));
                triangles.clear();
                joints.clear();
            }
            for joint in used {
                if !joints.contains(&joint) {
                    joints.push(joint);
                }
            }
            triangles.extend_from_slice(triangle);
        }
        if !triangles.is_empty() {
            parts.push(sub_draw(draw.geometry, influences, &triangles));
        }
        Ok(parts)
    }

    fn add_draw(
        &self,
        mut state: PayloadState,
        index: usize,
        draw: &DrawInput,
    ) -> Result<PayloadState> {
        let geometry = draw.geometry;
        let slots = draw
            .influences
            .map(|influences| self.joint_slots(index, influences))
            .transpose()?;

        if let Some(slots) = &slots {
            let changes: JointAssignment = slots
                .iter()
                .enumerate()
                .map(|(slot, &joint)| (slot as u16, joint))
                .filter(|(slot, joint)| state.assignment.get(slot) != Some(joint))
                .collect();
            if !changes.is_empty() {
                state.assignment.extend(&changes);
                state.payload.entries.push(MeshEntry::JointAssignment(changes));
            }
        }

        if draw.material != state.material {
            if let Some(material) = draw.material {
                state.payload.entries.push(MeshEntry::Material(material));
                if let Some(texture) = draw.texture {
                    state
                        .payload
                        .entries
                        .push(MeshEntry::Texture(BTreeMap::from([(0, texture)])));
                }
            }
            state.material = draw.material;
        }

        if state.render_state != Some(draw.render_state) {
            state.payload.entries.push(MeshEntry::RenderState {
                blend: draw.render_state.blend,
                mask: draw.render_state.mask,
            });
            state.render_state = Some(draw.render_state);
        }

        let vertex_table = self
            .vertex_table(geometry, draw.influences, slots.as_deref())
            .with_context(|| format!("Failed to pack bone slots of draw {}", index))?;
        let face_table = FaceTable::new(
            geometry
                .indices
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect(),
        );

        debug!(
            "Draw {}: {} vertices, {} triangles, stride {}, {} joint slots",
            index,
            geometry.vertex_count(),
            face_table.triangles.len(),
            vertex_table.stride(),
            slots.as_ref().map_or(0, Vec::len)
        );

        let payload = &mut state.payload;
        payload.vertex_tables.push(vertex_table);
        payload.face_tables.push(face_table);
        payload.entries.push(MeshEntry::Draw {
            vertex_table: (payload.vertex_tables.len() - 1) as u16,
            face_table: (payload.face_tables.len() - 1) as u16,
        });
        Ok(state)
    }

    /// Distinct weighted joints in first-use order
    fn joint_slots(&self, index: usize, influences: &[Influences]) -> Result<Vec<u16>> {
        let slots = weighted_joints(influences.iter());
        if slots.len() > self.max_joints_per_draw {
            bail!(
                "Draw {} uses {} joints but a draw call holds at most {}",
                index,
                slots.len(),
                self.max_joints_per_draw
            );
        }
        Ok(slots)
    }

    fn vertex_table(
        &self,
        geometry: &Geometry,
        influences: Option<&[Influences]>,
        slots: Option<&[u16]>,
    ) -> Result<VertexTable> {
        let max_abs = geometry
            .positions
            .iter()
            .flatten()
            .fold(0.0f32, |acc, &c| acc.max((c * self.scale).abs()));
        let quantize = position_scale(max_abs);

        let mut layout = Vec::new();
        let mut offset = 0usize;
        let mut add = |register, count: u8, encoding: ValueEncoding, scale: f32| {
            let width = encoding.byte_width();
            offset = offset.div_ceil(width) * width;
            layout.push(VertexAttribute::new(
                register,
                offset as u16,
                count,
                encoding,
                scale,
            ));
            offset += count as usize * width;
        };

        add(AttributeRegister::Position, 3, ValueEncoding::Int16, 1.0 / quantize);
        if geometry.normals.is_some() {
            add(AttributeRegister::Normal, 3, ValueEncoding::Int8, 1.0 / 127.0);
        }
        if geometry.colors.is_some() {
            add(AttributeRegister::Color, 4, ValueEncoding::Uint8, 1.0 / 255.0);
        }
        if influences.is_some() {
            add(AttributeRegister::BoneIndex, 4, ValueEncoding::Uint8, 1.0);
            add(AttributeRegister::BoneWeight, 4, ValueEncoding::Uint8, 1.0 / 255.0);
        }
        if geometry.uv0.is_some() {
            add(AttributeRegister::Uv0, 2, ValueEncoding::Float32, 1.0);
        }
        if geometry.uv1.is_some() {
            add(AttributeRegister::Uv1, 2, ValueEncoding::Float32, 1.0);
        }

        let mut table = VertexTable::new(layout);
        for vertex in 0..geometry.vertex_count() {
            let position = geometry.positions[vertex]
                .map(|c| quantize_position(c * self.scale, quantize) as f32);
            let normal = geometry
                .normals
                .as_ref()
                .map(|n| n[vertex].map(|c| f32_to_snorm8(c) as f32));
            let color = geometry
                .colors
                .as_ref()
                .map(|c| c[vertex].map(|c| f32_to_unorm8(c) as f32));
            let bones = influences
                .zip(slots)
                .map(|(influences, slots)| -> Result<_> {
                    let weighted: Vec<(u16, f32)> = influences[vertex]
                        .iter()
                        .filter(|(_, weight)| *weight > 0.0)
                        .filter_map(|&(joint, weight)| {
                            let slot = slots.iter().position(|&s| s == joint)?;
                            Some((slot as u16, weight))
                        })
                        .collect();
                    let packed = pack_bone_slots(&weighted)?;
                    Ok((packed.indices.map(f32::from), packed.weights.map(f32::from)))
                })
                .transpose()?;

            let mut values: Vec<(AttributeRegister, &[f32])> =
                vec![(AttributeRegister::Position, position.as_slice())];
            if let Some(normal) = &normal {
                values.push((AttributeRegister::Normal, normal.as_slice()));
            }
            if let Some(color) = &color {
                values.push((AttributeRegister::Color, color.as_slice()));
            }
            if let Some((indices, weights)) = &bones {
                values.push((AttributeRegister::BoneIndex, indices.as_slice()));
                values.push((AttributeRegister::BoneWeight, weights.as_slice()));
            }
            if let Some(uv) = &geometry.uv0 {
                values.push((AttributeRegister::Uv0, uv[vertex].as_slice()));
            }
            if let Some(uv) = &geometry.uv1 {
                values.push((AttributeRegister::Uv1, uv[vertex].as_slice()));
            }
            table.push_vertex(&values);
        }
        Ok(table)
    }
}

/// Distinct joints with a positive weight, in first-use order
fn weighted_joints<'a>(sets: impl Iterator<Item = &'a Influences>) -> Vec<u16> {
    let mut joints: Vec<u16> = Vec::new();
    for &(joint, weight) in sets.flatten() {
        if weight > 0.0 && !joints.contains(&joint) {
            joints.push(joint);
        }
    }
    joints
}

/// Geometry and influences of the vertices used by `indices`, renumbered
fn sub_draw(
    geometry: &Geometry,
    influences: &[Influences],
    indices: &[u32],
) -> (Geometry, Vec<Influences>) {
    let mut remap: BTreeMap<u32, u32> = BTreeMap::new();
    let mut used: Vec<usize> = Vec::new();
    let indices: Vec<u32> = indices
        .iter()
        .map(|&old| {
            *remap.entry(old).or_insert_with(|| {
                used.push(old as usize);
                used.len() as u32 - 1
            })
        })
        .collect();

    fn pick<T: Copy>(values: &[T], used: &[usize]) -> Vec<T> {
        used.iter().map(|&v| values[v]).collect()
    }
    let part = Geometry {
        positions: pick(&geometry.positions, &used),
        normals: geometry.normals.as_deref().map(|n| pick(n, &used)),
        colors: geometry.colors.as_deref().map(|c| pick(c, &used)),
        uv0: geometry.uv0.as_deref().map(|uv| pick(uv, &used)),
        uv1: geometry.uv1.as_deref().map(|uv| pick(uv, &used)),
        indices,
    };
    (part, pick(influences, &used))
}

fn validate_geometry(
    index: usize,
    geometry: &Geometry,
    influences: Option<&[Influences]>,
) -> Result<()> {
    let count = geometry.vertex_count();
    let lengths = [
        ("normals", geometry.normals.as_ref().map(Vec::len)),
        ("colors", geometry.colors.as_ref().map(Vec::len)),
        ("uv0", geometry.uv0.as_ref().map(Vec::len)),
        ("uv1", geometry.uv1.as_ref().map(Vec::len)),
        ("influences", influences.map(<[Influences]>::len)),
    ];
    for (name, length) in lengths {
        if let Some(length) = length.filter(|&l| l != count) {
            bail!(
                "Draw {} has {} {} for {} positions",
                index,
                length,
                name,
                count
            );
        }
    }

    if geometry.indices.len() % 3 != 0 {
        bail!(
            "Draw {} has {} indices, which is not a triangle list",
            index,
            geometry.indices.len()
        );
    }
    if let Some(&vertex) = geometry.indices.iter().find(|&&i| i as usize >= count) {
        bail!(
            "Draw {} references vertex {} but has {} vertices",
            index,
            vertex,
            count
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::SkinnedMeshExtractor;
    use kcap_common::{Joint, SkeletonTable};

    fn triangle() -> Geometry {
        Geometry {
            positions: vec![[2.0, 0.0, 0.0], [-1.0, 0.5, 0.0], [0.0, 0.0, 1.0]],
            normals: Some(vec![[0.0, 0.0, 1.0]; 3]),
            colors: None,
            uv0: Some(vec![[0.0, 0.0], [1.0, 0.0], [0.5, 1.0]]),
            uv1: None,
            indices: vec![0, 1, 2],
        }
    }

    fn rigid(joint: u16) -> Vec<Influences> {
        vec![[(joint, 1.0), (0, 0.0), (0, 0.0), (0, 0.0)]; 3]
    }

    fn draw<'a>(geometry: &'a Geometry, influences: &'a [Influences]) -> DrawInput<'a> {
        DrawInput {
            geometry,
            influences: Some(influences),
            material: None,
            texture: None,
            render_state: RenderState::default(),
        }
    }

    #[test]
    fn test_assignment_emits_only_changes() {
        let geometry = triangle();
        let first = vec![[(5, 0.5), (7, 0.5), (0, 0.0), (0, 0.0)]; 3];
        let second = vec![[(5, 0.5), (9, 0.5), (0, 0.0), (0, 0.0)]; 3];

        let payload = MeshTableBuilder::new(16)
            .build(&[
                draw(&geometry, &first),
                draw(&geometry, &second),
                draw(&geometry, &second),
            ])
            .unwrap();

        let assignments: Vec<&JointAssignment> = payload
            .entries
            .iter()
            .filter_map(|e| match e {
                MeshEntry::JointAssignment(map) => Some(map),
                _ => None,
            })
            .collect();
        assert_eq!(assignments.len(), 2);
        assert_eq!(*assignments[0], JointAssignment::from([(0, 5), (1, 7)]));
        assert_eq!(*assignments[1], JointAssignment::from([(1, 9)]));

        let draws = payload.draw_calls();
        assert_eq!(draws.len(), 3);
        assert_eq!(draws[2].assignment, JointAssignment::from([(0, 5), (1, 9)]));
    }

    #[test]
    fn test_material_and_render_state_changes() {
        let geometry = triangle();
        let influences = rigid(0);
        let mut a = draw(&geometry, &influences);
        a.material = Some(2);
        a.texture = Some(4);
        let b = a;
        let mut c = a;
        c.material = Some(3);
        c.render_state = RenderState {
            blend: true,
            mask: false,
        };

        let payload = MeshTableBuilder::new(16).build(&[a, b, c]).unwrap();
        let materials: Vec<u16> = payload
            .entries
            .iter()
            .filter_map(|e| match e {
                MeshEntry::Material(m) => Some(*m),
                _ => None,
            })
            .collect();
        assert_eq!(materials, vec![2, 3]);

        let states = payload
            .entries
            .iter()
            .filter(|e| matches!(e, MeshEntry::RenderState { .. }))
            .count();
        assert_eq!(states, 2);
        assert!(payload
            .entries
            .contains(&MeshEntry::Texture(BTreeMap::from([(0, 4)]))));
        assert_eq!(payload.draw_calls()[2].material, Some(3));
    }

    #[test]
    fn test_positions_quantized_with_scale() {
        let geometry = triangle();
        let influences = rigid(0);
        let payload = MeshTableBuilder::new(16)
            .with_scale(0.5)
            .build(&[draw(&geometry, &influences)])
            .unwrap();

        let table = &payload.vertex_tables[0];
        let raw = table.read_raw(0, AttributeRegister::Position).unwrap();
        assert_eq!(raw[0], 32767.0);

        let position = table.read(1, AttributeRegister::Position).unwrap();
        assert!((position[0] + 0.5).abs() < 1e-4);
        assert!((position[1] - 0.25).abs() < 1e-4);

        let normal = table.read(0, AttributeRegister::Normal).unwrap();
        assert!((normal[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_extractor_reads_built_tables() {
        let geometry = triangle();
        let influences = vec![
            [(4, 0.75), (6, 0.25), (0, 0.0), (0, 0.0)],
            [(6, 1.0), (0, 0.0), (0, 0.0), (0, 0.0)],
            [(2, 1.0), (0, 0.0), (0, 0.0), (0, 0.0)],
        ];
        let payload = MeshTableBuilder::new(16)
            .build(&[draw(&geometry, &influences)])
            .unwrap();

        let mut joints = vec![Joint::new("J_root", None)];
        joints.extend((1..8).map(|i| Joint::new(format!("J_{}", i), Some(i - 1))));
        let skeleton = SkeletonTable::new(joints);

        let call = &payload.draw_calls()[0];
        let (skin, extracted) = SkinnedMeshExtractor::new(&skeleton)
            .extract(
                &payload.vertex_tables[call.vertex_table as usize],
                &payload.face_tables[call.face_table as usize],
                &call.assignment,
            )
            .unwrap();

        let skin = skin.unwrap();
        assert_eq!(skin.joints, vec![4, 6, 2]);
        assert_eq!(skin.weights[0][0].0, 0);
        assert!((skin.weights[0][0].1 - 0.75).abs() <= 0.5 / 255.0);
        assert_eq!(skin.weights[1][0], (1, 1.0));
        assert_eq!(skin.weights[2][0], (2, 1.0));
        assert_eq!(extracted.indices, geometry.indices);
        assert_eq!(extracted.uv0, geometry.uv0);
    }

    #[test]
    fn test_wide_draw_split_by_joint_limit() {
        // 20 triangles, each rigidly bound to its own joint
        let mut geometry = Geometry::default();
        let mut influences: Vec<Influences> = Vec::new();
        for joint in 0..20u16 {
            let y = joint as f32;
            geometry
                .positions
                .extend_from_slice(&[[0.0, y, 0.0], [1.0, y, 0.0], [0.0, y + 1.0, 0.0]]);
            influences.extend([[(joint, 1.0), (0, 0.0), (0, 0.0), (0, 0.0)]; 3]);
        }
        geometry.indices = (0..60).collect();

        let payload = MeshTableBuilder::new(16)
            .build(&[draw(&geometry, &influences)])
            .unwrap();

        let draws = payload.draw_calls();
        assert_eq!(draws.len(), 2);
        assert_eq!(payload.vertex_tables[0].vertex_count(), 48);
        assert_eq!(payload.vertex_tables[1].vertex_count(), 12);
        assert_eq!(payload.face_tables[1].triangles.len(), 4);
        assert!(draws.iter().all(|d| d.assignment.len() <= 16));

        // The second draw only re-assigns the slots it changes
        let assignments: Vec<&JointAssignment> = payload
            .entries
            .iter()
            .filter_map(|e| match e {
                MeshEntry::JointAssignment(map) => Some(map),
                _ => None,
            })
            .collect();
        assert_eq!(assignments.len(), 2);
        assert_eq!(
            *assignments[1],
            JointAssignment::from([(0, 16), (1, 17), (2, 18), (3, 19)])
        );

        let mut joints = vec![Joint::new("J_0", None)];
        joints.extend((1..20).map(|i| Joint::new(format!("J_{}", i), Some(i - 1))));
        let skeleton = SkeletonTable::new(joints);
        let call = &draws[1];
        let (skin, extracted) = SkinnedMeshExtractor::new(&skeleton)
            .extract(
                &payload.vertex_tables[call.vertex_table as usize],
                &payload.face_tables[call.face_table as usize],
                &call.assignment,
            )
            .unwrap();
        let skin = skin.unwrap();
        assert_eq!(&skin.joints[..4], &[16, 17, 18, 19]);
        assert_eq!(skin.weights[0][0], (0, 1.0));
        assert_eq!(skin.weights[11][0], (3, 1.0));
        assert!((extracted.positions[0][1] - 16.0).abs() < 1e-2);
        assert_eq!(extracted.indices, (0..12).collect::<Vec<u32>>());
    }

    #[test]
    fn test_joint_limit_past_bone_slots() {
        let geometry = triangle();
        let influences = rigid(0);
        let result = MeshTableBuilder::new(MAX_BONE_SLOTS + 1).build(&[draw(&geometry, &influences)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_too_many_joints() {
        let geometry = triangle();
        let influences = vec![[(1, 0.25), (2, 0.25), (3, 0.25), (4, 0.25)]; 3];
        let result = MeshTableBuilder::new(3).build(&[draw(&geometry, &influences)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mismatched_attribute_length() {
        let mut geometry = triangle();
        geometry.normals = Some(vec![[0.0, 0.0, 1.0]; 2]);
        let result = MeshTableBuilder::new(16).build(&[DrawInput {
            geometry: &geometry,
            influences: None,
            material: None,
            texture: None,
            render_state: RenderState::default(),
        }]);
        assert!(result.is_err());
    }
}
