//! Building transform tables from authoring keyframes

use super::{ClipMarkers, StaticChannelPolicy, TransformBinding, TransformKind, TransformTable};
use crate::formats::channel::{Axis, ChannelEntry, ChannelProgram};
use crate::formats::keyframes::{KeyframeTable, QuatKey, VectorKey};

/// How a channel ended up stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEncoding {
    /// Static default value dropped by the policy
    Skipped,
    /// Single-axis constants for the axes that differ from the default
    Constant,
    /// One constant holding the whole tuple
    Inline,
    /// A keyframe table
    Curve,
}

/// Accumulates bindings, programs and keyframe tables for one clip
#[derive(Debug, Clone)]
pub struct TransformTableBuilder {
    markers: ClipMarkers,
    policy: StaticChannelPolicy,
    epsilon: f32,
    table: TransformTable,
}

impl TransformTableBuilder {
    /// Start a clip of `duration` seconds
    pub fn new(duration: f32) -> Self {
        Self {
            markers: ClipMarkers::from_duration(duration),
            policy: StaticChannelPolicy::default(),
            epsilon: 1e-4,
            table: TransformTable::default(),
        }
    }

    /// Set the static channel policy and comparison tolerance
    pub fn with_policy(mut self, policy: StaticChannelPolicy, epsilon: f32) -> Self {
        self.policy = policy;
        self.epsilon = epsilon;
        self
    }

    /// Add a translation channel, scaling values by `scale`
    pub fn add_translation(
        &mut self,
        joint: u16,
        keys: &[VectorKey],
        ticks_per_second: f64,
        scale: f32,
    ) -> ChannelEncoding {
        let values: Vec<[f32; 4]> = keys
            .iter()
            .map(|k| [k.value[0] * scale, k.value[1] * scale, k.value[2] * scale, 0.0])
            .collect();
        self.add_channel(joint, TransformKind::Translation, &values, || {
            KeyframeTable::from_vector_keys(keys, ticks_per_second, scale)
        })
    }

    /// Add a scale channel
    pub fn add_scale(
        &mut self,
        joint: u16,
        keys: &[VectorKey],
        ticks_per_second: f64,
    ) -> ChannelEncoding {
        let values: Vec<[f32; 4]> = keys
            .iter()
            .map(|k| [k.value[0], k.value[1], k.value[2], 1.0])
            .collect();
        self.add_channel(joint, TransformKind::Scale, &values, || {
            KeyframeTable::from_vector_keys(keys, ticks_per_second, 1.0)
        })
    }

    /// Add a rotation channel
    pub fn add_rotation(
        &mut self,
        joint: u16,
        keys: &[QuatKey],
        ticks_per_second: f64,
    ) -> ChannelEncoding {
        let values: Vec<[f32; 4]> = keys.iter().map(|k| k.value).collect();
        self.add_channel(joint, TransformKind::Rotation, &values, || {
            KeyframeTable::from_quat_keys(keys, ticks_per_second)
        })
    }

    /// Decide how a channel is stored
    pub fn classify(&self, joint: u16, kind: TransformKind, values: &[[f32; 4]]) -> ChannelEncoding {
        let Some(first) = values.first() else {
            return ChannelEncoding::Skipped;
        };
        let count = kind.component_count();
        let is_static = values
            .iter()
            .all(|v| (0..count).all(|i| (v[i] - first[i]).abs() <= self.epsilon));

        if !is_static {
            return ChannelEncoding::Curve;
        }
        if !self.policy.keeps_static(kind, joint, first, self.epsilon) {
            return ChannelEncoding::Skipped;
        }
        if kind != TransformKind::Rotation && self.differing_axes(kind, first).len() == 1 {
            ChannelEncoding::Constant
        } else {
            ChannelEncoding::Inline
        }
    }

    fn differing_axes(&self, kind: TransformKind, value: &[f32; 4]) -> Vec<Axis> {
        let default = kind.default_value();
        [Axis::X, Axis::Y, Axis::Z]
            .into_iter()
            .filter(|axis| {
                axis.index()
                    .is_some_and(|i| (value[i] - default[i]).abs() > self.epsilon)
            })
            .collect()
    }

    fn add_channel(
        &mut self,
        joint: u16,
        kind: TransformKind,
        values: &[[f32; 4]],
        curve: impl FnOnce() -> KeyframeTable,
    ) -> ChannelEncoding {
        let encoding = self.classify(joint, kind, values);
        let entries = match encoding {
            ChannelEncoding::Skipped => return encoding,
            ChannelEncoding::Constant => self
                .differing_axes(kind, &values[0])
                .into_iter()
                .filter_map(|axis| {
                    axis.index()
                        .map(|i| ChannelEntry::constant_axis(axis, values[0][i]))
                })
                .collect(),
            ChannelEncoding::Inline => match kind {
                TransformKind::Rotation => vec![ChannelEntry::constant_quat(values[0])],
                _ => vec![ChannelEntry::constant_vec3([
                    values[0][0],
                    values[0][1],
                    values[0][2],
                ])],
            },
            ChannelEncoding::Curve => {
                let index = self.table.tables.len() as u32;
                self.table.tables.push(curve());
                vec![ChannelEntry::keyframes(index)]
            }
        };

        let program = self.table.programs.len() as u32;
        self.table.programs.push(ChannelProgram::new(entries));
        self.table
            .bindings
            .push(TransformBinding::joint(joint, kind, program));
        encoding
    }

    /// Number of bindings added so far
    pub fn binding_count(&self) -> usize {
        self.table.bindings.len()
    }

    pub fn build(self) -> TransformTable {
        TransformTable {
            markers: self.markers,
            ..self.table
        }
    }
}
