//! Skeleton tables (TNOJ)
//!
//! A skeleton is a KCAP collection with one TNOJ payload per joint. Joints
//! reference their parent by index. Several joints may be parentless (for
//! example attachment points that hang off a non-joint node), and a parent
//! may come after its child as long as the links form no cycle.
//!
//! # Layout
//! ```text
//! 0x00: magic "TNOJ"
//! 0x04: parent i32 (-1 = root)
//! 0x08: unknown u32 × 2
//! 0x10: inverse bind matrix f32 × 16 (row-major)
//! 0x50: translation f32 × 4 (w unused)
//! 0x60: rotation f32 × 4 (quaternion xyzw)
//! 0x70: scale f32 × 4 (w unused)
//! 0x80: local scale f32 × 4 (w unused)
//! 0x90: name, NUL-terminated, padded to 4 bytes
//! ```

use std::io::Cursor;

use glam::{Mat4, Quat, Vec3};
use tracing::warn;

use super::container::{read_collection, write_collection};
use super::io::{expect_magic, pad_to, read_f32_array, read_i32, read_u32, write_f32, write_i32, write_u32};
use super::serialization::{impl_binary_serializable, read_header};
use crate::codec::align4;
use crate::error::{FormatError, Result};

/// Joint magic ("TNOJ" little-endian)
pub const TNOJ_MAGIC: u32 = u32::from_le_bytes(*b"TNOJ");

/// Determinant below which a bind matrix is treated as singular
pub const SINGULAR_DETERMINANT: f32 = 1e-8;

/// Row-major 4×4 identity
pub const IDENTITY_ROW_MAJOR: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

// ============================================================================
// Joint Record
// ============================================================================

/// Fixed part of a TNOJ payload (0x90 bytes), followed by the name
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointRecord {
    pub magic: u32,
    pub parent: i32,
    pub unknown: [u32; 2],
    pub inverse_bind: [f32; 16],
    pub translation: [f32; 4],
    pub rotation: [f32; 4],
    pub scale: [f32; 4],
    pub local_scale: [f32; 4],
}

impl JointRecord {
    pub const SIZE: usize = 0x90;

    /// Write record to bytes
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = Vec::with_capacity(Self::SIZE);
        write_u32(&mut out, self.magic);
        write_i32(&mut out, self.parent);
        write_u32(&mut out, self.unknown[0]);
        write_u32(&mut out, self.unknown[1]);
        for value in self
            .inverse_bind
            .iter()
            .chain(&self.translation)
            .chain(&self.rotation)
            .chain(&self.scale)
            .chain(&self.local_scale)
        {
            write_f32(&mut out, *value);
        }

        let mut bytes = [0u8; Self::SIZE];
        bytes.copy_from_slice(&out);
        bytes
    }

    /// Read record from bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let mut cursor = Cursor::new(bytes);
        Some(Self {
            magic: read_u32(&mut cursor).ok()?,
            parent: read_i32(&mut cursor).ok()?,
            unknown: [read_u32(&mut cursor).ok()?, read_u32(&mut cursor).ok()?],
            inverse_bind: read_f32_array(&mut cursor).ok()?,
            translation: read_f32_array(&mut cursor).ok()?,
            rotation: read_f32_array(&mut cursor).ok()?,
            scale: read_f32_array(&mut cursor).ok()?,
            local_scale: read_f32_array(&mut cursor).ok()?,
        })
    }
}

impl_binary_serializable!(JointRecord, "TNOJ");

// ============================================================================
// Joint
// ============================================================================

/// One skeleton joint
#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub name: String,
    pub parent: Option<u16>,
    pub translation: [f32; 3],
    /// Quaternion xyzw
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub local_scale: [f32; 3],
    /// Row-major inverse bind matrix
    pub inverse_bind: [f32; 16],
    pub unknown: [u32; 2],
}

impl Joint {
    /// Joint at the rest pose with an identity inverse bind
    pub fn new(name: impl Into<String>, parent: Option<u16>) -> Self {
        Self {
            name: name.into(),
            parent,
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
            local_scale: [1.0; 3],
            inverse_bind: IDENTITY_ROW_MAJOR,
            unknown: [0; 2],
        }
    }

    /// Combined rest scale (scale × local scale)
    pub fn rest_scale(&self) -> [f32; 3] {
        std::array::from_fn(|i| self.scale[i] * self.local_scale[i])
    }

    /// Local rest transform relative to the parent joint
    pub fn local_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::from_array(self.rest_scale()),
            Quat::from_array(self.rotation),
            Vec3::from_array(self.translation),
        )
    }

    /// Serialize to a TNOJ payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let widen = |v: [f32; 3], w: f32| [v[0], v[1], v[2], w];
        let record = JointRecord {
            magic: TNOJ_MAGIC,
            parent: self.parent.map_or(-1, i32::from),
            unknown: self.unknown,
            inverse_bind: self.inverse_bind,
            translation: widen(self.translation, 0.0),
            rotation: self.rotation,
            scale: widen(self.scale, 0.0),
            local_scale: widen(self.local_scale, 0.0),
        };

        let mut out = record.to_bytes().to_vec();
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        let padded = align4(out.len());
        pad_to(&mut out, padded);
        out
    }

    /// Parse a TNOJ payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let record: JointRecord = read_header(bytes)?;
        expect_magic("TNOJ", TNOJ_MAGIC, record.magic)?;

        let parent = match record.parent {
            -1 => None,
            index => Some(u16::try_from(index).map_err(|_| {
                FormatError::InvalidSkeleton(format!("parent index {} out of range", index))
            })?),
        };

        let name_bytes = &bytes[JointRecord::SIZE..];
        let name_end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(name_bytes.len());
        let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

        let narrow = |v: [f32; 4]| [v[0], v[1], v[2]];
        Ok(Self {
            name,
            parent,
            translation: narrow(record.translation),
            rotation: record.rotation,
            scale: narrow(record.scale),
            local_scale: narrow(record.local_scale),
            inverse_bind: record.inverse_bind,
            unknown: record.unknown,
        })
    }
}

// ============================================================================
// Skeleton Table
// ============================================================================

/// Ordered joint list with parent links
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkeletonTable {
    pub joints: Vec<Joint>,
}

impl SkeletonTable {
    pub fn new(joints: Vec<Joint>) -> Self {
        Self { joints }
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    /// Index of the joint called `name`
    pub fn find(&self, name: &str) -> Option<usize> {
        self.joints.iter().position(|j| j.name == name)
    }

    /// Indices of the direct children of `joint`
    pub fn children(&self, joint: usize) -> impl Iterator<Item = usize> + '_ {
        self.joints
            .iter()
            .enumerate()
            .filter(move |(_, j)| j.parent.map(usize::from) == Some(joint))
            .map(|(index, _)| index)
    }

    /// Indices of the parentless joints
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.joints
            .iter()
            .enumerate()
            .filter(|(_, j)| j.parent.is_none())
            .map(|(index, _)| index)
    }

    /// Check the hierarchy invariant
    ///
    /// Every parent is in range and not the joint itself, and following
    /// parent links from any joint reaches a root.
    pub fn validate(&self) -> Result<()> {
        for (index, joint) in self.joints.iter().enumerate() {
            match joint.parent.map(usize::from) {
                Some(parent) if parent == index => {
                    return Err(FormatError::InvalidSkeleton(format!(
                        "joint {} '{}' is its own parent",
                        index, joint.name
                    )));
                }
                Some(parent) if parent >= self.joints.len() => {
                    return Err(FormatError::InvalidSkeleton(format!(
                        "joint {} '{}' has parent {} but there are {} joints",
                        index,
                        joint.name,
                        parent,
                        self.joints.len()
                    )));
                }
                _ => {}
            }
        }

        self.topological_order().map(|_| ())
    }

    /// Joint indices ordered so that every parent precedes its children
    ///
    /// Fails when the parent links contain a cycle.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        topological_order(self.joints.len(), |i| self.joints[i].parent.map(usize::from))
            .map_err(|joint| {
                FormatError::InvalidSkeleton(format!(
                    "joint {} '{}' is part of a parent cycle",
                    joint, self.joints[joint].name
                ))
            })
    }

    /// Global rest transforms, composed parent then child
    pub fn global_bind_matrices(&self) -> Result<Vec<Mat4>> {
        self.validate()?;
        let locals: Vec<Mat4> = self.joints.iter().map(Joint::local_matrix).collect();
        compose_globals(&locals, |i| self.joints[i].parent.map(usize::from)).map_err(|joint| {
            FormatError::InvalidSkeleton(format!("joint {} is part of a parent cycle", joint))
        })
    }

    /// Parse a KCAP collection of TNOJ payloads
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let joints = read_collection(bytes)?
            .into_iter()
            .map(Joint::from_bytes)
            .collect::<Result<Vec<_>>>()?;
        let table = Self { joints };
        table.validate()?;
        Ok(table)
    }

    /// Serialize to a KCAP collection of TNOJ payloads
    pub fn to_bytes(&self) -> Vec<u8> {
        write_collection(&self.joints.iter().map(Joint::to_bytes).collect::<Vec<_>>())
    }
}

/// Order `count` nodes so that parents come first
///
/// Parents outside `0..count` are treated as absent. Returns a node on a
/// cycle when there is one.
pub fn topological_order(
    count: usize,
    parent_of: impl Fn(usize) -> Option<usize>,
) -> std::result::Result<Vec<usize>, usize> {
    let mut placed = vec![false; count];
    let mut order = Vec::with_capacity(count);
    let mut chain: Vec<usize> = Vec::new();

    for start in 0..count {
        let mut node = start;
        // Climb to the first placed ancestor or a root
        while !placed[node] {
            if chain.len() > count {
                return Err(start);
            }
            chain.push(node);
            match parent_of(node).filter(|&p| p < count) {
                Some(parent) => node = parent,
                None => break,
            }
        }
        while let Some(node) = chain.pop() {
            if !placed[node] {
                placed[node] = true;
                order.push(node);
            }
        }
    }
    Ok(order)
}

/// Compose local transforms into global ones
///
/// Parents are resolved before their children whatever their indices.
/// Returns a node on a cycle when there is one.
pub fn compose_globals(
    locals: &[Mat4],
    parent_of: impl Fn(usize) -> Option<usize>,
) -> std::result::Result<Vec<Mat4>, usize> {
    let order = topological_order(locals.len(), &parent_of)?;
    let mut globals = locals.to_vec();
    for index in order {
        if let Some(parent) = parent_of(index).filter(|&p| p < locals.len()) {
            globals[index] = globals[parent] * locals[index];
        }
    }
    Ok(globals)
}

// ============================================================================
// Matrix Conversion
// ============================================================================

/// Column-major matrix to row-major array
pub fn to_row_major(matrix: &Mat4) -> [f32; 16] {
    let mut out = [0.0f32; 16];
    for column in 0..4 {
        let col = matrix.col(column);
        for row in 0..4 {
            out[row * 4 + column] = col[row];
        }
    }
    out
}

/// Row-major array to column-major matrix
pub fn from_row_major(values: &[f32; 16]) -> Mat4 {
    let mut columns = [0.0f32; 16];
    for row in 0..4 {
        for column in 0..4 {
            columns[column * 4 + row] = values[row * 4 + column];
        }
    }
    Mat4::from_cols_array(&columns)
}

/// Row-major inverse bind matrix for a global bind transform
///
/// The translation of `global` is multiplied by `scale` before inverting.
/// A singular matrix yields the identity.
pub fn compute_inverse_bind(global: Mat4, scale: f32) -> [f32; 16] {
    let mut scaled = global;
    scaled.w_axis.x *= scale;
    scaled.w_axis.y *= scale;
    scaled.w_axis.z *= scale;

    let determinant = scaled.determinant();
    if determinant.abs() < SINGULAR_DETERMINANT {
        warn!(
            "Bind matrix is singular (det = {:e}), using identity inverse",
            determinant
        );
        return IDENTITY_ROW_MAJOR;
    }
    to_row_major(&scaled.inverse())
}

// ============================================================================
// Scale Estimation
// ============================================================================

/// One joint's data for import scale estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleSample {
    /// Translation of the matching joint in the reference skeleton
    pub reference_offset: [f32; 3],
    /// Translation of the joint in the imported scene
    pub local_translation: [f32; 3],
    /// Product of the scales of the joint's ancestors
    pub accumulated_scale: [f32; 3],
}

/// Estimate the scale between an imported skeleton and a reference one
///
/// Takes per-axis ratios `reference / local / accumulated`, discards zero
/// and non-finite ones and returns the median. `None` when nothing survives.
pub fn estimate_import_scale(samples: &[ScaleSample]) -> Option<f32> {
    let mut ratios: Vec<f32> = samples
        .iter()
        .flat_map(|sample| {
            (0..3).map(move |axis| {
                sample.reference_offset[axis]
                    / sample.local_translation[axis]
                    / sample.accumulated_scale[axis]
            })
        })
        .filter(|ratio| ratio.is_finite() && *ratio != 0.0)
        .collect();

    if ratios.is_empty() {
        return None;
    }
    ratios.sort_by(f32::total_cmp);
    Some(ratios[ratios.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_joint_chain() -> SkeletonTable {
        let root = Joint::new("J_root", None);
        let mut child = Joint::new("J_child", Some(0));
        child.translation = [0.0, 2.0, 0.0];
        SkeletonTable::new(vec![root, child])
    }

    #[test]
    fn test_joint_roundtrip() {
        let mut joint = Joint::new("AT_hand", Some(3));
        joint.translation = [1.0, -2.0, 3.5];
        joint.rotation = [0.0, 0.707_106_8, 0.0, 0.707_106_8];
        joint.local_scale = [2.0, 2.0, 2.0];
        joint.unknown = [5, 9];

        let bytes = joint.to_bytes();
        assert_eq!(&bytes[0..4], b"TNOJ");
        assert_eq!(i32::from_le_bytes(bytes[4..8].try_into().unwrap()), 3);
        // "AT_hand" + NUL = 8 bytes, already aligned
        assert_eq!(bytes.len(), JointRecord::SIZE + 8);
        assert_eq!(Joint::from_bytes(&bytes).unwrap(), joint);
    }

    #[test]
    fn test_name_padding() {
        let bytes = Joint::new("abcd", None).to_bytes();
        assert_eq!(bytes.len(), JointRecord::SIZE + 8);
        assert_eq!(&bytes[JointRecord::SIZE..], b"abcd\0\0\0\0");
        assert_eq!(i32::from_le_bytes(bytes[4..8].try_into().unwrap()), -1);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = Joint::new("x", None).to_bytes();
        bytes[0..4].copy_from_slice(b"TDTM");
        assert!(matches!(
            Joint::from_bytes(&bytes),
            Err(FormatError::BadMagic { table: "TNOJ", .. })
        ));
    }

    #[test]
    fn test_truncated_record() {
        let bytes = Joint::new("x", None).to_bytes();
        assert!(matches!(
            Joint::from_bytes(&bytes[..0x40]),
            Err(FormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_skeleton_roundtrip() {
        let skeleton = two_joint_chain();
        let bytes = skeleton.to_bytes();
        assert_eq!(&bytes[0..4], b"KCAP");
        assert_eq!(SkeletonTable::from_bytes(&bytes).unwrap(), skeleton);
        assert_eq!(skeleton.find("J_child"), Some(1));
        assert_eq!(skeleton.children(0).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_validate() {
        let mut skeleton = two_joint_chain();
        assert!(skeleton.validate().is_ok());

        skeleton.joints[1].parent = Some(1);
        assert!(matches!(
            skeleton.validate(),
            Err(FormatError::InvalidSkeleton(_))
        ));

        skeleton.joints[1].parent = Some(5);
        assert!(skeleton.validate().is_err());

        // 0 -> 1 -> 0
        skeleton.joints[1].parent = Some(0);
        skeleton.joints[0].parent = Some(1);
        assert!(skeleton.validate().is_err());
        assert!(skeleton.global_bind_matrices().is_err());
    }

    #[test]
    fn test_several_roots() {
        let mut skeleton = two_joint_chain();
        let mut weapon = Joint::new("AT_weapon", None);
        weapon.translation = [3.0, 0.0, 0.0];
        skeleton.joints.push(weapon);

        assert!(skeleton.validate().is_ok());
        assert_eq!(skeleton.roots().collect::<Vec<_>>(), vec![0, 2]);

        let parsed = SkeletonTable::from_bytes(&skeleton.to_bytes()).unwrap();
        assert_eq!(parsed, skeleton);
        let globals = parsed.global_bind_matrices().unwrap();
        assert_eq!(globals[2].transform_point3(Vec3::ZERO), Vec3::new(3.0, 0.0, 0.0));
    }

    #[test]
    fn test_parent_after_child() {
        // root, head (parent spine), spine (parent root)
        let mut head = Joint::new("J_head", Some(2));
        head.translation = [0.0, 1.0, 0.0];
        let mut spine = Joint::new("J_spine", Some(0));
        spine.translation = [0.0, 2.0, 0.0];
        let skeleton = SkeletonTable::new(vec![Joint::new("J_root", None), head, spine]);

        let parsed = SkeletonTable::from_bytes(&skeleton.to_bytes()).unwrap();
        assert_eq!(parsed.topological_order().unwrap(), vec![0, 2, 1]);

        let globals = parsed.global_bind_matrices().unwrap();
        let head_origin = globals[1].transform_point3(Vec3::ZERO);
        assert!((head_origin - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_row_major_conversion() {
        let matrix = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let rows = to_row_major(&matrix);
        assert_eq!([rows[3], rows[7], rows[11]], [1.0, 2.0, 3.0]);
        assert_eq!(rows[15], 1.0);
        assert_eq!(from_row_major(&rows), matrix);
        assert_eq!(to_row_major(&Mat4::IDENTITY), IDENTITY_ROW_MAJOR);
    }

    #[test]
    fn test_two_joint_inverse_bind() {
        let skeleton = two_joint_chain();
        let globals = skeleton.global_bind_matrices().unwrap();

        let root = compute_inverse_bind(globals[0], 0.5);
        assert_eq!(root, IDENTITY_ROW_MAJOR);

        let child = compute_inverse_bind(globals[1], 0.5);
        assert!((child[7] - -1.0).abs() < 1e-6);
        assert!(child[3].abs() < 1e-6);
        assert!(child[11].abs() < 1e-6);
        assert!((child[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_global_composition() {
        let mut skeleton = two_joint_chain();
        skeleton.joints[0].translation = [1.0, 0.0, 0.0];
        skeleton.joints[0].rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2).to_array();

        let globals = skeleton.global_bind_matrices().unwrap();
        let child_origin = globals[1].transform_point3(Vec3::ZERO);
        // Child's +Y offset is rotated onto -X
        assert!((child_origin - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_singular_falls_back_to_identity() {
        let flat = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        assert_eq!(compute_inverse_bind(flat, 1.0), IDENTITY_ROW_MAJOR);
    }

    #[test]
    fn test_scale_estimate_median() {
        let sample = |reference: f32, local: f32| ScaleSample {
            reference_offset: [0.0, reference, 0.0],
            local_translation: [0.0, local, 0.0],
            accumulated_scale: [1.0; 3],
        };
        // Ratios 2, 3, 100; zero offsets on X/Z are discarded
        let samples = [sample(2.0, 1.0), sample(6.0, 2.0), sample(100.0, 1.0)];
        assert_eq!(estimate_import_scale(&samples), Some(3.0));
    }

    #[test]
    fn test_scale_estimate_accounts_for_ancestors() {
        let samples = [ScaleSample {
            reference_offset: [4.0, 4.0, 4.0],
            local_translation: [1.0, 1.0, 1.0],
            accumulated_scale: [2.0, 2.0, 2.0],
        }];
        assert_eq!(estimate_import_scale(&samples), Some(2.0));
    }

    #[test]
    fn test_scale_estimate_empty() {
        assert_eq!(estimate_import_scale(&[]), None);
        let degenerate = [ScaleSample {
            reference_offset: [1.0, 0.0, 1.0],
            local_translation: [0.0, 1.0, 0.0],
            accumulated_scale: [1.0; 3],
        }];
        assert_eq!(estimate_import_scale(&degenerate), None);
    }
}
