//! Integration tests for the import and export pipeline.
//!
//! Tests the complete flow:
//! 1. Generate a GLB scene programmatically
//! 2. Stage it into KCAP tables and write them to disk
//! 3. Read the tables back, export to GLB and validate with the gltf crate

mod scene_generator;

use gltf::animation::util::ReadOutputs;
use tempfile::tempdir;

use kcap_common::{ChannelEntry, ChannelProgram, ClipMarkers, TransformBinding, TransformKind};
use kcap_common::{Joint, QuatKey, SkeletonTable, TransformTable, TransformTableBuilder, VectorKey};
use kcap_export::formats;
use kcap_export::{export, import, scene, ExportConfig, ImportOptions, KcapConfig};

fn approx(a: &[f32], b: &[f32], tolerance: f32) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance)
}

fn import_fixture() -> import::ImportedAsset {
    let scene = scene::load_gltf_slice(&scene_generator::generate_scene_glb())
        .expect("Failed to load generated scene");
    import::import_scene(&scene, &KcapConfig::default(), ImportOptions::default())
        .expect("Failed to import scene")
}

/// Animation outputs of `node`/`property` read back from a GLB document
fn read_channel(
    document: &gltf::Document,
    buffers: &[gltf::buffer::Data],
    animation: &str,
    node: usize,
    property: gltf::animation::Property,
) -> Option<(Vec<f32>, Vec<Vec<f32>>)> {
    let animation = document
        .animations()
        .find(|a| a.name() == Some(animation))?;
    let channel = animation
        .channels()
        .find(|c| c.target().node().index() == node && c.target().property() == property)?;
    let reader = channel.reader(|buffer| Some(&buffers[buffer.index()]));
    let times: Vec<f32> = reader.read_inputs()?.collect();
    let values: Vec<Vec<f32>> = match reader.read_outputs()? {
        ReadOutputs::Translations(iter) | ReadOutputs::Scales(iter) => {
            iter.map(|v| v.to_vec()).collect()
        }
        ReadOutputs::Rotations(iter) => iter.into_f32().map(|v| v.to_vec()).collect(),
        ReadOutputs::MorphTargetWeights(_) => return None,
    };
    Some((times, values))
}

#[test]
fn test_generated_scene_is_valid() {
    let glb = scene_generator::generate_scene_glb();
    assert_eq!(&glb[0..4], b"glTF");

    let (document, _, _) = gltf::import_slice(&glb).expect("Failed to parse generated GLB");
    assert_eq!(document.nodes().count(), 5);
    assert_eq!(document.skins().count(), 1);
    assert_eq!(document.animations().count(), 3);
}

#[test]
fn test_import_stages_skeleton_and_clips() {
    let asset = import_fixture();

    let names: Vec<&str> = asset.skeleton.joints.iter().map(|j| j.name.as_str()).collect();
    assert_eq!(names, scene_generator::JOINT_NAMES);
    let parents: Vec<Option<u16>> = asset.skeleton.joints.iter().map(|j| j.parent).collect();
    assert_eq!(parents, vec![None, Some(0), Some(1)]);
    assert_eq!(asset.scale, 1.0);

    // Head sits two segments up; its inverse bind moves it back down
    let head = &asset.skeleton.joints[2];
    assert!(approx(&[head.inverse_bind[7]], &[-2.0], 1e-5));

    // `dance` has no clip slot
    let slots: Vec<(usize, &str)> = asset
        .clips
        .iter()
        .map(|c| (c.slot, c.name.as_str()))
        .collect();
    assert_eq!(slots, vec![(0, "idle"), (1, "run")]);

    // The static identity head rotation of `run` is dropped
    assert_eq!(asset.clips[1].table.bindings.len(), 0);
    assert_eq!(asset.clips[0].table.bindings.len(), 2);
    assert!(approx(&[asset.clips[0].table.markers.duration()], &[1.0], 1e-4));

    let draws = asset.meshes.draw_calls();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].assignment.len(), 3);
    assert_eq!(asset.meshes.vertex_tables[0].vertex_count(), 9);
}

#[test]
fn test_import_files_then_export_glb() {
    let asset = import_fixture();
    let dir = tempdir().expect("Failed to create temp dir");

    let skeleton_path = dir.path().join("skeleton.tnoj");
    formats::save_skeleton(&skeleton_path, &asset.skeleton).unwrap();
    for clip in &asset.clips {
        formats::save_clip(&dir.path().join(formats::clip_file_name(clip.slot)), &clip.table)
            .unwrap();
    }

    let skeleton = formats::read_skeleton(&skeleton_path).unwrap();
    let idle_path = dir.path().join("clip_00.tdtm");
    let idle = formats::read_clip(&idle_path).unwrap();
    let run = formats::read_clip(&dir.path().join("clip_01.tdtm")).unwrap();
    let slot = formats::clip_slot_from_path(&idle_path).unwrap();

    let clips = [
        export::ClipInput { slot, table: &idle },
        export::ClipInput {
            slot: 1,
            table: &run,
        },
    ];
    let glb = export::export_glb(
        &skeleton,
        &clips,
        std::slice::from_ref(&asset.meshes),
        &ExportConfig::default(),
    )
    .expect("Failed to export GLB");

    let glb_path = dir.path().join("out.glb");
    formats::save_glb(&glb_path, &glb).unwrap();
    let (document, buffers, _) = gltf::import(&glb_path).expect("Failed to import exported GLB");

    // Three joints, then one node per draw call
    assert_eq!(document.nodes().count(), 4);
    let root = document.nodes().next().unwrap();
    assert_eq!(root.name(), Some("J_root"));
    assert_eq!(root.children().map(|c| c.index()).collect::<Vec<_>>(), vec![1]);

    // `run` holds no channels and is skipped
    let names: Vec<&str> = document.animations().filter_map(|a| a.name()).collect();
    assert_eq!(names, vec!["idle"]);

    let (times, values) = read_channel(
        &document,
        &buffers,
        "idle",
        0,
        gltf::animation::Property::Translation,
    )
    .expect("Missing root translation");
    assert!(approx(&times, &[0.0, 1.0], 1e-3));
    assert!(approx(&values[1], &scene_generator::IDLE_ROOT_END, 1e-2));

    let (_, rotations) = read_channel(
        &document,
        &buffers,
        "idle",
        1,
        gltf::animation::Property::Rotation,
    )
    .expect("Missing spine rotation");
    assert!(approx(
        &rotations[rotations.len() - 1],
        &scene_generator::IDLE_SPINE_END,
        1e-2
    ));

    // Skinned mesh with the full skeleton bound
    let skin = document.skins().next().expect("Missing skin");
    let joints: Vec<usize> = skin.joints().map(|j| j.index()).collect();
    assert_eq!(joints.len(), 3);
    let reader = skin.reader(|buffer| Some(&buffers[buffer.index()]));
    let inverse_binds: Vec<[[f32; 4]; 4]> = reader.read_inverse_bind_matrices().unwrap().collect();
    let head = joints.iter().position(|&j| j == 2).unwrap();
    assert!(approx(&[inverse_binds[head][3][1]], &[-2.0], 1e-5));

    let mesh = document.meshes().next().expect("Missing mesh");
    let primitive = mesh.primitives().next().unwrap();
    let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
    let positions: Vec<[f32; 3]> = reader.read_positions().unwrap().collect();
    assert_eq!(positions.len(), 9);
    assert!(approx(&positions[8], &[0.0, 2.5, 0.0], 1e-3));

    let weights: Vec<[f32; 4]> = reader.read_weights(0).unwrap().into_f32().collect();
    let total: f32 = weights[8].iter().sum();
    assert!(approx(&[total], &[1.0], 1e-2));
    assert!(approx(&[weights[8][0]], &[0.75], 1e-2));
}

/// Three joints: root translation keys, child rotation keys, grandchild
/// constant scale. The curves survive the binary form and the GLB writer.
#[test]
fn test_three_joint_reconstruction_end_to_end() {
    let mut spine = Joint::new("J_spine", Some(0));
    spine.translation = [0.0, 1.0, 0.0];
    let mut head = Joint::new("J_head", Some(1));
    head.translation = [0.0, 1.0, 0.0];
    let skeleton = SkeletonTable::new(vec![Joint::new("J_root", None), spine, head]);

    let translations = [
        VectorKey {
            time: 0.0,
            value: [0.0, 0.0, 0.0],
        },
        VectorKey {
            time: 0.5,
            value: [0.0, 1.0, 0.0],
        },
        VectorKey {
            time: 1.0,
            value: [0.0, 0.0, 0.0],
        },
    ];
    let rotations = [
        QuatKey {
            time: 0.0,
            value: [0.0, 0.0, 0.0, 1.0],
        },
        QuatKey {
            time: 1.0,
            value: [0.0, std::f32::consts::FRAC_1_SQRT_2, 0.0, std::f32::consts::FRAC_1_SQRT_2],
        },
    ];
    let mut builder = TransformTableBuilder::new(1.0);
    builder.add_translation(0, &translations, 1.0, 1.0);
    builder.add_rotation(1, &rotations, 1.0);
    builder.add_scale(
        2,
        &[VectorKey {
            time: 0.0,
            value: [2.0, 2.0, 2.0],
        }],
        1.0,
    );
    let clip = TransformTable::from_bytes(&builder.build().to_bytes()).unwrap();

    let glb = export::export_glb(
        &skeleton,
        &[export::ClipInput {
            slot: 0,
            table: &clip,
        }],
        &[],
        &ExportConfig::default(),
    )
    .unwrap();
    let (document, buffers, _) = gltf::import_slice(&glb).unwrap();

    let (times, values) =
        read_channel(&document, &buffers, "idle", 0, gltf::animation::Property::Translation)
            .unwrap();
    // Key times are quantized to 1/33.3s before being stretched to the clip
    assert!(approx(&times, &[0.0, 0.5, 1.0], 2e-2));
    assert!(approx(&values[1], &[0.0, 1.0, 0.0], 1e-2));

    let (_, rotations) =
        read_channel(&document, &buffers, "idle", 1, gltf::animation::Property::Rotation)
            .unwrap();
    assert!(approx(
        &rotations[rotations.len() - 1],
        &[0.0, std::f32::consts::FRAC_1_SQRT_2, 0.0, std::f32::consts::FRAC_1_SQRT_2],
        1e-2
    ));

    let (_, scales) =
        read_channel(&document, &buffers, "idle", 2, gltf::animation::Property::Scale).unwrap();
    assert!(scales.iter().all(|s| approx(s, &[2.0, 2.0, 2.0], 1e-3)));
}

/// A hand-written clip whose bindings reference an out-of-range program is
/// rejected instead of producing a partial document.
#[test]
fn test_export_rejects_dangling_program() {
    let skeleton = SkeletonTable::new(vec![Joint::new("J_root", None)]);
    let clip = TransformTable {
        markers: ClipMarkers::from_duration(1.0),
        bindings: vec![TransformBinding::joint(0, TransformKind::Translation, 3)],
        programs: vec![ChannelProgram::new(vec![ChannelEntry::constant_vec3([
            0.0, 0.0, 0.0,
        ])])],
        tables: Vec::new(),
    };
    let result = export::export_glb(
        &skeleton,
        &[export::ClipInput {
            slot: 0,
            table: &clip,
        }],
        &[],
        &ExportConfig::default(),
    );
    assert!(result.is_err());
}
