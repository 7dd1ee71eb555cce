//! Programmatic GLB generation for integration tests.
//!
//! The generated scene holds:
//! - an `Armature` group node above a 3-joint chain (J_root → J_spine → J_head)
//! - a skinned `Body` mesh with one triangle per joint
//! - an `idle` clip (root translation, spine rotation), a `run` clip with a
//!   single static head rotation, and a `dance` clip that matches no slot

use gltf_json as json;
use json::validation::Checked::Valid;
use std::collections::BTreeMap;
use std::f32::consts::FRAC_1_SQRT_2;

/// Joint count of the generated skeleton
pub const JOINT_COUNT: usize = 3;
/// Joint names in chain order
pub const JOINT_NAMES: [&str; JOINT_COUNT] = ["J_root", "J_spine", "J_head"];
/// Distance between consecutive joints along +Y
pub const SEGMENT_HEIGHT: f32 = 1.0;
/// Root translation at the end of `idle`
pub const IDLE_ROOT_END: [f32; 3] = [0.0, 0.5, 0.0];
/// Spine rotation at the end of `idle` (90° about Z)
pub const IDLE_SPINE_END: [f32; 4] = [0.0, 0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2];

const ARMATURE_NODE: u32 = 0;
const FIRST_JOINT_NODE: u32 = 1;
const BODY_NODE: u32 = 4;

/// Binary buffer under construction
#[derive(Default)]
struct Packer {
    data: Vec<u8>,
    views: Vec<json::buffer::View>,
    accessors: Vec<json::Accessor>,
}

impl Packer {
    fn push<T: bytemuck::Pod>(
        &mut self,
        values: &[T],
        count: usize,
        component_type: json::accessor::ComponentType,
        type_: json::accessor::Type,
        bounds: Option<(Vec<f32>, Vec<f32>)>,
        target: Option<json::buffer::Target>,
    ) -> json::Index<json::Accessor> {
        while self.data.len() % 4 != 0 {
            self.data.push(0);
        }
        let offset = self.data.len();
        self.data.extend_from_slice(bytemuck::cast_slice(values));

        self.views.push(json::buffer::View {
            buffer: json::Index::new(0),
            byte_length: (self.data.len() - offset).into(),
            byte_offset: Some(offset.into()),
            byte_stride: None,
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            target: target.map(Valid),
        });

        let to_value =
            |v: Vec<f32>| json::Value::Array(v.into_iter().map(json::Value::from).collect());
        let (min, max) = match bounds {
            Some((min, max)) => (Some(to_value(min)), Some(to_value(max))),
            None => (None, None),
        };
        self.accessors.push(json::Accessor {
            buffer_view: Some(json::Index::new(self.views.len() as u32 - 1)),
            byte_offset: Some(0u64.into()),
            count: count.into(),
            component_type: Valid(json::accessor::GenericComponentType(component_type)),
            extensions: Default::default(),
            extras: Default::default(),
            type_: Valid(type_),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
        });
        json::Index::new(self.accessors.len() as u32 - 1)
    }

    fn vec3(&mut self, values: &[[f32; 3]], bounds: bool) -> json::Index<json::Accessor> {
        let bounds = bounds.then(|| compute_bounds(values));
        self.push(
            values,
            values.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec3,
            bounds,
            None,
        )
    }

    fn vec4(&mut self, values: &[[f32; 4]]) -> json::Index<json::Accessor> {
        self.push(
            values,
            values.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Vec4,
            None,
            None,
        )
    }

    fn times(&mut self, times: &[f32]) -> json::Index<json::Accessor> {
        let min = times.iter().copied().fold(f32::INFINITY, f32::min);
        let max = times.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        self.push(
            times,
            times.len(),
            json::accessor::ComponentType::F32,
            json::accessor::Type::Scalar,
            Some((vec![min], vec![max])),
            None,
        )
    }
}

fn compute_bounds(values: &[[f32; 3]]) -> (Vec<f32>, Vec<f32>) {
    let mut min = vec![f32::INFINITY; 3];
    let mut max = vec![f32::NEG_INFINITY; 3];
    for value in values {
        for i in 0..3 {
            min[i] = min[i].min(value[i]);
            max[i] = max[i].max(value[i]);
        }
    }
    (min, max)
}

struct Channel {
    node: u32,
    path: json::animation::Property,
    times: json::Index<json::Accessor>,
    values: json::Index<json::Accessor>,
}

fn animation(name: &str, channels: &[Channel]) -> json::Animation {
    let samplers = channels
        .iter()
        .map(|c| json::animation::Sampler {
            input: c.times,
            interpolation: Valid(json::animation::Interpolation::Linear),
            output: c.values,
            extensions: Default::default(),
            extras: Default::default(),
        })
        .collect();
    let targets = channels
        .iter()
        .enumerate()
        .map(|(i, c)| json::animation::Channel {
            sampler: json::Index::new(i as u32),
            target: json::animation::Target {
                node: json::Index::new(c.node),
                path: Valid(c.path),
                extensions: Default::default(),
                extras: Default::default(),
            },
            extensions: Default::default(),
            extras: Default::default(),
        })
        .collect();
    json::Animation {
        channels: targets,
        extensions: Default::default(),
        extras: Default::default(),
        name: Some(name.to_string()),
        samplers,
    }
}

fn node(
    name: &str,
    children: &[u32],
    translation: Option<[f32; 3]>,
    mesh: Option<u32>,
    skin: Option<u32>,
) -> json::Node {
    json::Node {
        camera: None,
        children: if children.is_empty() {
            None
        } else {
            Some(children.iter().map(|&c| json::Index::new(c)).collect())
        },
        extensions: Default::default(),
        extras: Default::default(),
        matrix: None,
        mesh: mesh.map(json::Index::new),
        name: Some(name.to_string()),
        rotation: None,
        scale: None,
        translation,
        skin: skin.map(json::Index::new),
        weights: None,
    }
}

/// Generate the complete test scene as GLB bytes
pub fn generate_scene_glb() -> Vec<u8> {
    let mut packer = Packer::default();

    // One triangle per joint, stacked along +Y
    let mut positions = Vec::new();
    let mut joints: Vec<[u16; 4]> = Vec::new();
    let mut weights: Vec<[f32; 4]> = Vec::new();
    for joint in 0..JOINT_COUNT {
        let y = joint as f32 * SEGMENT_HEIGHT;
        positions.extend_from_slice(&[[-0.5, y, 0.0], [0.5, y, 0.0], [0.0, y + 0.5, 0.0]]);
        for _ in 0..3 {
            joints.push([joint as u16, 0, 0, 0]);
            weights.push([1.0, 0.0, 0.0, 0.0]);
        }
    }
    // The apex of the last triangle is shared with the spine
    joints[8] = [2, 1, 0, 0];
    weights[8] = [0.75, 0.25, 0.0, 0.0];
    let indices: Vec<u32> = (0..positions.len() as u32).collect();

    let position_accessor = packer.vec3(&positions, true);
    let joints_accessor = packer.push(
        &joints,
        joints.len(),
        json::accessor::ComponentType::U16,
        json::accessor::Type::Vec4,
        None,
        None,
    );
    let weights_accessor = packer.vec4(&weights);
    let indices_accessor = packer.push(
        &indices,
        indices.len(),
        json::accessor::ComponentType::U32,
        json::accessor::Type::Scalar,
        None,
        Some(json::buffer::Target::ElementArrayBuffer),
    );

    // Column-major inverse binds: translate by -y for each joint
    let inverse_binds: Vec<[f32; 16]> = (0..JOINT_COUNT)
        .map(|joint| {
            let mut m = [0.0f32; 16];
            m[0] = 1.0;
            m[5] = 1.0;
            m[10] = 1.0;
            m[15] = 1.0;
            m[13] = -(joint as f32) * SEGMENT_HEIGHT;
            m
        })
        .collect();
    let ibm_accessor = packer.push(
        &inverse_binds,
        inverse_binds.len(),
        json::accessor::ComponentType::F32,
        json::accessor::Type::Mat4,
        None,
        None,
    );

    let times = [0.0f32, 1.0];
    let idle_times = packer.times(&times);
    let root_translation = packer.vec3(&[[0.0, 0.0, 0.0], IDLE_ROOT_END], true);
    let spine_rotation = packer.vec4(&[[0.0, 0.0, 0.0, 1.0], IDLE_SPINE_END]);
    let run_times = packer.times(&times);
    let head_rotation = packer.vec4(&[[0.0, 0.0, 0.0, 1.0], [0.0, 0.0, 0.0, 1.0]]);
    let dance_times = packer.times(&times);
    let dance_translation = packer.vec3(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], true);

    let animations = vec![
        animation(
            "idle",
            &[
                Channel {
                    node: FIRST_JOINT_NODE,
                    path: json::animation::Property::Translation,
                    times: idle_times,
                    values: root_translation,
                },
                Channel {
                    node: FIRST_JOINT_NODE + 1,
                    path: json::animation::Property::Rotation,
                    times: idle_times,
                    values: spine_rotation,
                },
            ],
        ),
        animation(
            "run",
            &[Channel {
                node: FIRST_JOINT_NODE + 2,
                path: json::animation::Property::Rotation,
                times: run_times,
                values: head_rotation,
            }],
        ),
        animation(
            "dance",
            &[Channel {
                node: FIRST_JOINT_NODE,
                path: json::animation::Property::Translation,
                times: dance_times,
                values: dance_translation,
            }],
        ),
    ];

    let nodes = vec![
        node("Armature", &[FIRST_JOINT_NODE, BODY_NODE], None, None, None),
        node(JOINT_NAMES[0], &[FIRST_JOINT_NODE + 1], None, None, None),
        node(
            JOINT_NAMES[1],
            &[FIRST_JOINT_NODE + 2],
            Some([0.0, SEGMENT_HEIGHT, 0.0]),
            None,
            None,
        ),
        node(
            JOINT_NAMES[2],
            &[],
            Some([0.0, SEGMENT_HEIGHT, 0.0]),
            None,
            None,
        ),
        node("Body", &[], None, Some(0), Some(0)),
    ];

    let mut attributes = BTreeMap::new();
    attributes.insert(Valid(json::mesh::Semantic::Positions), position_accessor);
    attributes.insert(Valid(json::mesh::Semantic::Joints(0)), joints_accessor);
    attributes.insert(Valid(json::mesh::Semantic::Weights(0)), weights_accessor);

    let root = json::Root {
        accessors: packer.accessors.clone(),
        animations,
        asset: json::Asset {
            copyright: None,
            extensions: Default::default(),
            extras: Default::default(),
            generator: Some("kcap-export tests".to_string()),
            min_version: None,
            version: "2.0".to_string(),
        },
        buffers: vec![json::Buffer {
            byte_length: packer.data.len().into(),
            extensions: Default::default(),
            extras: Default::default(),
            name: None,
            uri: None,
        }],
        buffer_views: packer.views.clone(),
        meshes: vec![json::Mesh {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some("Body".to_string()),
            primitives: vec![json::mesh::Primitive {
                attributes,
                extensions: Default::default(),
                extras: Default::default(),
                indices: Some(indices_accessor),
                material: None,
                mode: Valid(json::mesh::Mode::Triangles),
                targets: None,
            }],
            weights: None,
        }],
        nodes,
        scene: Some(json::Index::new(0)),
        scenes: vec![json::Scene {
            extensions: Default::default(),
            extras: Default::default(),
            name: Some("Scene".to_string()),
            nodes: vec![json::Index::new(ARMATURE_NODE)],
        }],
        skins: vec![json::Skin {
            extensions: Default::default(),
            extras: Default::default(),
            inverse_bind_matrices: Some(ibm_accessor),
            joints: (0..JOINT_COUNT as u32)
                .map(|j| json::Index::new(FIRST_JOINT_NODE + j))
                .collect(),
            name: Some("Armature".to_string()),
            skeleton: Some(json::Index::new(FIRST_JOINT_NODE)),
        }],
        ..Default::default()
    };

    kcap_export::glb::assemble_glb(&root, &packer.data).expect("Failed to assemble GLB")
}
