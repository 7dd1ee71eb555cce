//! Curve reconstruction
//!
//! Walks a binding's channel program as a fold over an ordered set of time
//! samples. Each entry consumes the running state and returns the next one;
//! the final state becomes an immutable [`Curve`].

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::warn;

use super::{TransformBinding, TransformCategory, TransformKind, TransformTable};
use crate::error::{FormatError, Result};
use crate::formats::channel::{Axis, ChannelEntry};
use crate::formats::keyframes::KeyframeTable;

/// Engine ticks per second used by clip markers
pub const CLIP_TICKS_PER_SECOND: f32 = 333.0;

/// Index of the skeleton root joint
pub const ROOT_JOINT: u16 = 0;

/// Reconstructed time curve of one binding
#[derive(Debug, Clone, PartialEq)]
pub struct Curve {
    pub target: u16,
    pub kind: TransformKind,
    /// Strictly increasing sample times in seconds
    pub times: Vec<f32>,
    /// One tuple per time; only the first `kind.component_count()` values matter
    pub values: Vec<[f32; 4]>,
    pub min: [f32; 4],
    pub max: [f32; 4],
    /// Whether any keyframe table contributed samples
    pub animated: bool,
}

impl Curve {
    pub fn component_count(&self) -> usize {
        self.kind.component_count()
    }

    /// Values as 3-component tuples
    pub fn vec3_values(&self) -> Vec<[f32; 3]> {
        self.values.iter().map(|v| [v[0], v[1], v[2]]).collect()
    }

    /// Lower bound per used component
    pub fn min_bound(&self) -> &[f32] {
        &self.min[..self.component_count()]
    }

    /// Upper bound per used component
    pub fn max_bound(&self) -> &[f32] {
        &self.max[..self.component_count()]
    }
}

/// Which non-animated channels survive export
///
/// Channels driven by at least one keyframe table are always kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StaticChannelPolicy {
    /// Drop static channels that hold the channel default, except the root
    /// joint's translation
    #[default]
    KeepRootTranslation,
    /// Keep every channel
    KeepAll,
}

impl StaticChannelPolicy {
    /// Whether a static channel holding `value` is kept
    pub fn keeps_static(
        self,
        kind: TransformKind,
        target: u16,
        value: &[f32; 4],
        epsilon: f32,
    ) -> bool {
        match self {
            Self::KeepAll => true,
            Self::KeepRootTranslation => {
                (kind == TransformKind::Translation && target == ROOT_JOINT)
                    || !is_default_value(kind, value, epsilon)
            }
        }
    }

    /// Whether a reconstructed curve is kept
    pub fn keeps(self, curve: &Curve, epsilon: f32) -> bool {
        if curve.animated {
            return true;
        }
        curve
            .values
            .iter()
            .any(|value| self.keeps_static(curve.kind, curve.target, value, epsilon))
    }
}

/// Whether `value` equals the channel default within `epsilon`
///
/// Rotations also accept the negated identity.
pub fn is_default_value(kind: TransformKind, value: &[f32; 4], epsilon: f32) -> bool {
    let default = kind.default_value();
    let count = kind.component_count();
    let near = |sign: f32| {
        (0..count).all(|i| (value[i] - sign * default[i]).abs() <= epsilon)
    };
    near(1.0) || (kind == TransformKind::Rotation && near(-1.0))
}

impl TransformTable {
    /// Reconstruct the curve of one binding
    pub fn reconstruct(&self, binding: &TransformBinding) -> Result<Curve> {
        let program = self
            .programs
            .get(binding.program as usize)
            .ok_or(FormatError::IndexOutOfRange {
                what: "channel program",
                index: binding.program as usize,
                len: self.programs.len(),
            })?;

        let duration = self.markers.duration();
        program
            .entries
            .iter()
            .try_fold(CurveState::new(binding.kind), |state, entry| {
                state.apply(entry, &self.tables, duration)
            })
            .map(|state| state.finish(binding.target))
    }

    /// Reconstruct every joint curve of the clip
    ///
    /// Texture and material bindings are skipped. Bindings whose joint is
    /// outside `joint_count` are skipped with a warning.
    pub fn reconstruct_curves(&self, joint_count: usize) -> Result<Vec<Curve>> {
        let mut curves = Vec::new();
        for binding in &self.bindings {
            if binding.category() != TransformCategory::Joint {
                continue;
            }
            if binding.target as usize >= joint_count {
                warn!(
                    "Skipping {:?} binding for joint {} (skeleton has {} joints)",
                    binding.kind, binding.target, joint_count
                );
                continue;
            }
            curves.push(self.reconstruct(binding)?);
        }
        Ok(curves)
    }
}

// ============================================================================
// Fold State
// ============================================================================

type Sample = (f32, [f32; 4]);

/// Running state of one reconstruction
#[derive(Debug, Clone)]
struct CurveState {
    kind: TransformKind,
    /// Latest constant per axis, seeded with the channel default
    mask: [f32; 4],
    /// Axes written by a constant at least once
    constant_axes: [bool; 4],
    /// Sorted, de-duplicated samples
    samples: Vec<Sample>,
    animated: bool,
}

impl CurveState {
    fn new(kind: TransformKind) -> Self {
        Self {
            kind,
            mask: kind.default_value(),
            constant_axes: [false; 4],
            samples: Vec::new(),
            animated: false,
        }
    }

    /// Value for an axis at a time no keyframe covers
    fn fallback(&self, axis: usize) -> f32 {
        if self.constant_axes[axis] {
            self.mask[axis]
        } else {
            self.kind.default_value()[axis]
        }
    }

    fn fallback_tuple(&self) -> [f32; 4] {
        std::array::from_fn(|axis| self.fallback(axis))
    }

    fn apply(self, entry: &ChannelEntry, tables: &[KeyframeTable], duration: f32) -> Result<Self> {
        match entry {
            ChannelEntry::Constant { axis, values, .. } => Ok(self.apply_constant(*axis, values)),
            ChannelEntry::Copy { source, dest, .. } => Ok(self.apply_copy(*source, *dest)),
            ChannelEntry::KeyframeRef { axis, table } => {
                let table = tables
                    .get(*table as usize)
                    .ok_or(FormatError::IndexOutOfRange {
                        what: "keyframe table",
                        index: *table as usize,
                        len: tables.len(),
                    })?;
                Ok(self.apply_keyframes(*axis, table, duration))
            }
        }
    }

    fn apply_constant(mut self, axis: Axis, values: &[f32]) -> Self {
        let assignments: SmallVec<[(usize, f32); 4]> = match (values, axis.index()) {
            ([value], Some(index)) => SmallVec::from_slice(&[(index, *value)]),
            ([value], None) => (0..3).map(|i| (i, *value)).collect(),
            _ => values.iter().copied().enumerate().take(4).collect(),
        };

        for &(index, value) in &assignments {
            self.mask[index] = value;
            self.constant_axes[index] = true;
        }

        if self.samples.is_empty() {
            self.samples.push((0.0, self.mask));
        } else {
            for (_, tuple) in &mut self.samples {
                for &(index, value) in &assignments {
                    tuple[index] = value;
                }
            }
        }
        self
    }

    fn apply_copy(mut self, source: Axis, dest: Axis) -> Self {
        let (Some(src), Some(dst)) = (source.index(), dest.index()) else {
            return self;
        };
        for (_, tuple) in &mut self.samples {
            tuple[dst] = tuple[src];
        }
        self.mask[dst] = self.mask[src];
        self.constant_axes[dst] = self.constant_axes[src];
        self
    }

    fn apply_keyframes(mut self, axis: Axis, table: &KeyframeTable, duration: f32) -> Self {
        let raw = table.decoded_times();
        let last = raw.last().copied().unwrap_or(0.0);
        let times: Vec<f32> = raw
            .iter()
            .map(|&t| if last != 0.0 { duration * (t / last) } else { 0.0 })
            .collect();

        let components = table.component_count();
        let axes: SmallVec<[usize; 4]> = if components > 1 {
            (0..components.min(4)).collect()
        } else {
            SmallVec::from_slice(&[axis.index().unwrap_or(0)])
        };

        // Merge the table's times into the sample set
        let base = self.fallback_tuple();
        for &time in &times {
            if !time.is_finite() {
                warn!("Ignoring non-finite keyframe time {}", time);
                continue;
            }
            let position = self.samples.partition_point(|(t, _)| *t < time);
            if self.samples.get(position).is_none_or(|(t, _)| *t != time) {
                self.samples.insert(position, (time, base));
            }
        }

        // Written axes hold the fallback unless the table has a key there
        let fallback: SmallVec<[f32; 4]> = axes.iter().map(|&a| self.fallback(a)).collect();
        for (_, tuple) in &mut self.samples {
            for (&a, &value) in axes.iter().zip(&fallback) {
                tuple[a] = value;
            }
        }

        for (key, &time) in times.iter().enumerate() {
            let position = self.samples.partition_point(|(t, _)| *t < time);
            let Some((t, tuple)) = self.samples.get_mut(position) else {
                continue;
            };
            if *t != time {
                continue;
            }
            let decoded = table.decoded_components(key);
            for (slot, &a) in axes.iter().enumerate() {
                if let Some(&value) = decoded.get(slot) {
                    tuple[a] = value;
                }
            }
        }

        self.animated = true;
        self
    }

    fn finish(mut self, target: u16) -> Curve {
        if self.samples.is_empty() {
            self.samples.push((0.0, self.mask));
        }

        let count = self.kind.component_count();
        let mut min = [0.0f32; 4];
        let mut max = [0.0f32; 4];
        for i in 0..count {
            min[i] = f32::INFINITY;
            max[i] = f32::NEG_INFINITY;
        }
        for (_, tuple) in &self.samples {
            for i in 0..count {
                min[i] = min[i].min(tuple[i]);
                max[i] = max[i].max(tuple[i]);
            }
        }

        let (times, values) = self.samples.into_iter().unzip();
        Curve {
            target,
            kind: self.kind,
            times,
            values,
            min,
            max,
            animated: self.animated,
        }
    }
}
