//! Import staging: scene → skeleton, mesh tables and transform tables

use anyhow::{bail, Context, Result};
use glam::Quat;
use hashbrown::HashMap;
use kcap_common::formats::skeleton::{compute_inverse_bind, estimate_import_scale, ScaleSample};
use kcap_common::{Joint, MeshPayload, SkeletonTable, TransformTable, TransformTableBuilder};
use tracing::{debug, info, warn};

use crate::config::KcapConfig;
use crate::mesh::{DrawInput, Influences, MeshTableBuilder};
use crate::scene::{ImportedScene, SceneAnimation};

/// One staged clip
#[derive(Debug, Clone)]
pub struct ImportedClip {
    pub slot: usize,
    pub name: String,
    pub table: TransformTable,
}

/// Everything produced from one scene
#[derive(Debug, Clone)]
pub struct ImportedAsset {
    pub skeleton: SkeletonTable,
    pub meshes: MeshPayload,
    /// Clips ordered by slot
    pub clips: Vec<ImportedClip>,
    /// Scale applied to translations and positions
    pub scale: f32,
}

/// Where the import scale came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleSource {
    CommandLine(f32),
    Config(f32),
    Estimated(f32),
    Default,
}

impl ScaleSource {
    pub fn value(self) -> f32 {
        match self {
            Self::CommandLine(scale) | Self::Config(scale) | Self::Estimated(scale) => scale,
            Self::Default => 1.0,
        }
    }
}

/// Import-side inputs beyond the scene itself
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions<'a> {
    /// Skeleton whose joint order and proportions the import should follow
    pub reference: Option<&'a SkeletonTable>,
    /// Scale given on the command line
    pub scale: Option<f32>,
}

/// Stage a whole scene
pub fn import_scene(
    scene: &ImportedScene,
    config: &KcapConfig,
    options: ImportOptions,
) -> Result<ImportedAsset> {
    let joint_nodes = select_joints(scene, config, options.reference)?;
    let source = resolve_scale(scene, config, &joint_nodes, options);
    let scale = source.value();
    info!(
        "Importing {} joints with scale {} ({:?})",
        joint_nodes.len(),
        scale,
        source
    );

    let skeleton = build_skeleton(scene, &joint_nodes, scale)?;
    let joint_of: HashMap<usize, u16> = joint_nodes
        .iter()
        .enumerate()
        .map(|(joint, &node)| (node, joint as u16))
        .collect();

    let meshes = build_meshes(scene, config, &joint_of, scale)?;

    let mut clips: Vec<ImportedClip> = Vec::new();
    for animation in &scene.animations {
        let Some(slot) = config.import.clip_slot(&animation.name, &config.export) else {
            warn!("Skipping animation '{}': no clip slot has that name", animation.name);
            continue;
        };
        if clips.iter().any(|c| c.slot == slot) {
            warn!(
                "Skipping animation '{}': clip slot {} is already taken",
                animation.name, slot
            );
            continue;
        }
        clips.push(ImportedClip {
            slot,
            name: animation.name.clone(),
            table: build_clip(animation, config, &joint_of, scale),
        });
    }
    clips.sort_by_key(|c| c.slot);

    Ok(ImportedAsset {
        skeleton,
        meshes,
        clips,
        scale,
    })
}

// ============================================================================
// Joints
// ============================================================================

/// Scene nodes that become skeleton joints, in skeleton order
///
/// Nodes are matched by name prefix in depth-first order; when none match,
/// the skin joints are used. A reference skeleton reorders the result to
/// follow its joint names.
pub fn select_joints(
    scene: &ImportedScene,
    config: &KcapConfig,
    reference: Option<&SkeletonTable>,
) -> Result<Vec<usize>> {
    let order = scene.depth_first();

    let mut joints: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&n| config.import.is_joint_name(&scene.nodes[n].name))
        .collect();

    if joints.is_empty() {
        debug!("No node matches the joint prefixes, falling back to skin joints");
        joints = order
            .iter()
            .copied()
            .filter(|n| scene.skins.iter().any(|skin| skin.contains(n)))
            .collect();
    }
    if joints.is_empty() {
        bail!("Scene has no joint nodes and no skins");
    }

    let Some(reference) = reference else {
        return Ok(joints);
    };

    let mut ordered: Vec<usize> = Vec::with_capacity(joints.len());
    for joint in &reference.joints {
        match joints.iter().find(|&&n| scene.nodes[n].name == joint.name) {
            Some(&node) => ordered.push(node),
            None => warn!("Reference joint '{}' is missing from the scene", joint.name),
        }
    }
    for &node in &joints {
        if !ordered.contains(&node) {
            warn!(
                "Joint '{}' is not in the reference skeleton, appending it",
                scene.nodes[node].name
            );
            ordered.push(node);
        }
    }
    Ok(ordered)
}

/// Pick the import scale: command line, then config, then estimate
pub fn resolve_scale(
    scene: &ImportedScene,
    config: &KcapConfig,
    joint_nodes: &[usize],
    options: ImportOptions,
) -> ScaleSource {
    if let Some(scale) = options.scale {
        return ScaleSource::CommandLine(scale);
    }
    if let Some(scale) = config.import.scale {
        return ScaleSource::Config(scale);
    }

    let Some(reference) = options.reference else {
        return ScaleSource::Default;
    };
    let samples: Vec<ScaleSample> = joint_nodes
        .iter()
        .filter_map(|&node| {
            let scene_node = &scene.nodes[node];
            let joint = reference.find(&scene_node.name)?;
            Some(ScaleSample {
                reference_offset: reference.joints[joint].translation,
                local_translation: scene_node.translation,
                accumulated_scale: scene.accumulated_scale(node),
            })
        })
        .collect();

    match estimate_import_scale(&samples) {
        Some(scale) => ScaleSource::Estimated(scale),
        None => {
            warn!("Could not estimate the import scale from the reference skeleton");
            ScaleSource::Default
        }
    }
}

/// Build the skeleton table for the selected joint nodes
pub fn build_skeleton(
    scene: &ImportedScene,
    joint_nodes: &[usize],
    scale: f32,
) -> Result<SkeletonTable> {
    let mut joints = Vec::with_capacity(joint_nodes.len());
    for &node in joint_nodes {
        let scene_node = &scene.nodes[node];
        let parent = scene
            .ancestors(node)
            .find_map(|a| joint_nodes.iter().position(|&n| n == a))
            .map(|p| p as u16);

        let mut joint = Joint::new(scene_node.name.clone(), parent);
        joint.translation = scene_node.translation.map(|c| c * scale);
        joint.rotation = Quat::from_array(scene_node.rotation).normalize().to_array();
        joint.local_scale = scene_node.scale;
        joint.inverse_bind = compute_inverse_bind(scene.global_matrix(node), scale);
        joints.push(joint);
    }

    let skeleton = SkeletonTable::new(joints);
    skeleton
        .validate()
        .context("Selected joints do not form a valid hierarchy")?;
    Ok(skeleton)
}

// ============================================================================
// Meshes
// ============================================================================

fn build_meshes(
    scene: &ImportedScene,
    config: &KcapConfig,
    joint_of: &HashMap<usize, u16>,
    scale: f32,
) -> Result<MeshPayload> {
    let influences: Vec<Option<Vec<Influences>>> = scene
        .primitives
        .iter()
        .map(|primitive| {
            primitive
                .influences
                .as_ref()
                .map(|per_vertex| {
                    per_vertex
                        .iter()
                        .map(|set| remap_influences(scene, joint_of, set))
                        .collect::<Result<Vec<_>>>()
                })
                .transpose()
                .with_context(|| format!("Failed to map influences of {}", primitive.name))
        })
        .collect::<Result<_>>()?;

    let draws: Vec<DrawInput> = scene
        .primitives
        .iter()
        .zip(&influences)
        .map(|(primitive, influences)| -> Result<DrawInput> {
            Ok(DrawInput {
                geometry: &primitive.geometry,
                influences: influences.as_deref(),
                material: primitive.material.map(u16::try_from).transpose()?,
                texture: primitive.texture.map(u16::try_from).transpose()?,
                render_state: primitive.render_state,
            })
        })
        .collect::<Result<_>>()?;

    let payload = MeshTableBuilder::new(config.import.max_joints_per_draw)
        .with_scale(scale)
        .build(&draws)?;
    info!(
        "Built {} draw calls ({} joint assignment changes)",
        payload.draw_calls().len(),
        payload.assignment_changes()
    );
    Ok(payload)
}

/// Map node influences to skeleton joints
///
/// An influence on a node outside the skeleton moves to its nearest joint
/// ancestor.
fn remap_influences(
    scene: &ImportedScene,
    joint_of: &HashMap<usize, u16>,
    influences: &[(usize, f32); 4],
) -> Result<Influences> {
    let mut out: Influences = [(0, 0.0); 4];
    for (slot, &(node, weight)) in influences.iter().enumerate() {
        if weight <= 0.0 {
            continue;
        }
        let joint = std::iter::once(node)
            .chain(scene.ancestors(node))
            .find_map(|n| joint_of.get(&n).copied());
        match joint {
            Some(joint) => out[slot] = (joint, weight),
            None => bail!(
                "Node '{}' is weighted but neither it nor an ancestor is a joint",
                scene.nodes[node].name
            ),
        }
    }
    Ok(out)
}

// ============================================================================
// Clips
// ============================================================================

/// Build one clip's transform table
pub fn build_clip(
    animation: &SceneAnimation,
    config: &KcapConfig,
    joint_of: &HashMap<usize, u16>,
    scale: f32,
) -> TransformTable {
    let mut builder = TransformTableBuilder::new(animation.duration)
        .with_policy(config.export.static_channels, config.import.identity_epsilon);
    let tps = animation.ticks_per_second;

    for channels in &animation.channels {
        let Some(&joint) = joint_of.get(&channels.node) else {
            debug!(
                "Animation '{}' drives node {} which is not a joint",
                animation.name, channels.node
            );
            continue;
        };
        if !channels.translations.is_empty() {
            builder.add_translation(joint, &channels.translations, tps, scale);
        }
        if !channels.rotations.is_empty() {
            builder.add_rotation(joint, &channels.rotations, tps);
        }
        if !channels.scales.is_empty() {
            builder.add_scale(joint, &channels.scales, tps);
        }
    }

    debug!(
        "Clip '{}': {:.3}s, {} bindings",
        animation.name,
        animation.duration,
        builder.binding_count()
    );
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Geometry, RenderState};
    use crate::scene::{NodeChannels, SceneNode, ScenePrimitive};
    use kcap_common::{TransformKind, VectorKey};

    fn node(name: &str, parent: Option<usize>, children: Vec<usize>, y: f32) -> SceneNode {
        SceneNode {
            name: name.to_string(),
            parent,
            children,
            translation: [0.0, y, 0.0],
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0; 3],
        }
    }

    /// Armature → J_root → J_spine → J_head, plus a helper under the head
    fn scene() -> ImportedScene {
        ImportedScene {
            nodes: vec![
                node("Armature", None, vec![1], 0.0),
                node("J_root", Some(0), vec![2], 0.0),
                node("J_spine", Some(1), vec![3], 2.0),
                node("J_head", Some(2), vec![4], 4.0),
                node("helper", Some(3), vec![], 1.0),
            ],
            primitives: vec![ScenePrimitive {
                name: "body.0".to_string(),
                geometry: Geometry {
                    positions: vec![[0.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 6.0, 0.0]],
                    indices: vec![0, 1, 2],
                    ..Default::default()
                },
                influences: Some(vec![
                    [(1, 1.0), (0, 0.0), (0, 0.0), (0, 0.0)],
                    [(2, 0.5), (3, 0.5), (0, 0.0), (0, 0.0)],
                    [(4, 1.0), (0, 0.0), (0, 0.0), (0, 0.0)],
                ]),
                material: Some(0),
                texture: None,
                render_state: RenderState::default(),
            }],
            skins: vec![vec![1, 2, 3, 4]],
            animations: vec![
                SceneAnimation {
                    name: "run".to_string(),
                    duration: 1.0,
                    ticks_per_second: 1.0,
                    channels: vec![NodeChannels {
                        node: 2,
                        translations: vec![
                            VectorKey {
                                time: 0.0,
                                value: [0.0, 2.0, 0.0],
                            },
                            VectorKey {
                                time: 1.0,
                                value: [0.0, 3.0, 0.0],
                            },
                        ],
                        ..Default::default()
                    }],
                },
                SceneAnimation {
                    name: "dance".to_string(),
                    duration: 1.0,
                    ticks_per_second: 1.0,
                    channels: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn test_select_joints_by_prefix() {
        let joints = select_joints(&scene(), &KcapConfig::default(), None).unwrap();
        assert_eq!(joints, vec![1, 2, 3]);
    }

    #[test]
    fn test_select_joints_falls_back_to_skin() {
        let mut config = KcapConfig::default();
        config.import.joint_prefixes = vec!["bone_".to_string()];
        let joints = select_joints(&scene(), &config, None).unwrap();
        assert_eq!(joints, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_select_joints_follows_reference() {
        let reference = SkeletonTable::new(vec![
            Joint::new("J_root", None),
            Joint::new("J_head", Some(0)),
            Joint::new("J_missing", Some(0)),
        ]);
        let joints = select_joints(&scene(), &KcapConfig::default(), Some(&reference)).unwrap();
        assert_eq!(joints, vec![1, 3, 2]);
    }

    #[test]
    fn test_scale_priority() {
        let scene = scene();
        let mut config = KcapConfig::default();
        let joints = vec![1, 2, 3];

        let mut reference_joints = vec![Joint::new("J_root", None)];
        let mut spine = Joint::new("J_spine", Some(0));
        spine.translation = [0.0, 1.0, 0.0];
        let mut head = Joint::new("J_head", Some(1));
        head.translation = [0.0, 2.0, 0.0];
        reference_joints.extend([spine, head]);
        let reference = SkeletonTable::new(reference_joints);

        let estimated = resolve_scale(
            &scene,
            &config,
            &joints,
            ImportOptions {
                reference: Some(&reference),
                scale: None,
            },
        );
        assert_eq!(estimated, ScaleSource::Estimated(0.5));

        config.import.scale = Some(3.0);
        let configured = resolve_scale(
            &scene,
            &config,
            &joints,
            ImportOptions {
                reference: Some(&reference),
                scale: None,
            },
        );
        assert_eq!(configured, ScaleSource::Config(3.0));

        let cli = resolve_scale(
            &scene,
            &config,
            &joints,
            ImportOptions {
                reference: None,
                scale: Some(2.0),
            },
        );
        assert_eq!(cli.value(), 2.0);

        config.import.scale = None;
        let default = resolve_scale(&scene, &config, &joints, ImportOptions::default());
        assert_eq!(default.value(), 1.0);
    }

    #[test]
    fn test_skeleton_scaled_with_inverse_binds() {
        let scene = scene();
        let skeleton = build_skeleton(&scene, &[1, 2, 3], 0.5).unwrap();

        assert_eq!(skeleton.joints[0].parent, None);
        assert_eq!(skeleton.joints[2].parent, Some(1));
        assert_eq!(skeleton.joints[2].translation, [0.0, 2.0, 0.0]);
        // Head sits at y = 6 before scaling; the inverse bind moves it back
        assert!((skeleton.joints[2].inverse_bind[7] + 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_import_scene() {
        let asset = import_scene(&scene(), &KcapConfig::default(), ImportOptions::default()).unwrap();

        assert_eq!(asset.skeleton.len(), 3);
        assert_eq!(asset.scale, 1.0);

        // The helper's weight lands on its joint ancestor (head)
        let call = &asset.meshes.draw_calls()[0];
        assert_eq!(call.assignment.values().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(call.material, Some(0));

        // "dance" has no slot
        assert_eq!(asset.clips.len(), 1);
        assert_eq!(asset.clips[0].slot, 1);
        let table = &asset.clips[0].table;
        assert_eq!(table.bindings.len(), 1);
        assert_eq!(table.bindings[0].kind, TransformKind::Translation);
        assert_eq!(table.bindings[0].target, 1);
        assert_eq!(table.tables.len(), 1);
    }

    #[test]
    fn test_import_follows_reference_order() {
        let reference = SkeletonTable::new(vec![
            Joint::new("J_root", None),
            Joint::new("J_head", Some(0)),
            Joint::new("J_spine", Some(0)),
        ]);
        let options = ImportOptions {
            reference: Some(&reference),
            scale: None,
        };
        let asset = import_scene(&scene(), &KcapConfig::default(), options).unwrap();

        let names: Vec<&str> = asset.skeleton.joints.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["J_root", "J_head", "J_spine"]);
        let parents: Vec<Option<u16>> = asset.skeleton.joints.iter().map(|j| j.parent).collect();
        assert_eq!(parents, vec![None, Some(2), Some(0)]);

        // Zero reference offsets give no estimate
        assert_eq!(asset.scale, 1.0);
        assert!((asset.skeleton.joints[1].inverse_bind[7] + 6.0).abs() < 1e-5);
        assert!((asset.skeleton.joints[2].inverse_bind[7] + 2.0).abs() < 1e-5);

        // The spine's clip channel follows the spine to joint 2
        assert_eq!(asset.clips[0].table.bindings[0].target, 2);

        let bytes = asset.skeleton.to_bytes();
        assert_eq!(SkeletonTable::from_bytes(&bytes).unwrap(), asset.skeleton);
    }

    #[test]
    fn test_attachment_joint_outside_the_chain() {
        let mut scene = scene();
        scene.nodes[0].children.push(5);
        scene.nodes.push(node("AT_weapon", Some(0), vec![], 1.5));

        let asset = import_scene(&scene, &KcapConfig::default(), ImportOptions::default()).unwrap();
        let weapon = asset.skeleton.find("AT_weapon").unwrap();
        assert_eq!(asset.skeleton.joints[weapon].parent, None);
        assert_eq!(asset.skeleton.roots().count(), 2);
    }

    #[test]
    fn test_unreachable_weighted_node_is_error() {
        let mut scene = scene();
        scene.primitives[0].influences.as_mut().unwrap()[0][0] = (0, 1.0);
        assert!(import_scene(&scene, &KcapConfig::default(), ImportOptions::default()).is_err());
    }
}
