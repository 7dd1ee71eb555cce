//! KCAP file reading and writing
//!
//! Re-exports the table formats from kcap-common and wraps their byte
//! parsers with file I/O and path context.

pub use kcap_common::formats::*;

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Read a skeleton (KCAP collection of TNOJ records)
pub fn read_skeleton(path: &Path) -> Result<SkeletonTable> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read skeleton: {:?}", path))?;
    SkeletonTable::from_bytes(&bytes)
        .with_context(|| format!("Failed to parse skeleton: {:?}", path))
}

/// Read a clip (TDTM transform table)
pub fn read_clip(path: &Path) -> Result<TransformTable> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read clip: {:?}", path))?;
    TransformTable::from_bytes(&bytes).with_context(|| format!("Failed to parse clip: {:?}", path))
}

/// Write a skeleton
pub fn write_skeleton<W: Write>(w: &mut W, skeleton: &SkeletonTable) -> Result<()> {
    w.write_all(&skeleton.to_bytes())?;
    Ok(())
}

/// Write a clip
pub fn write_clip<W: Write>(w: &mut W, clip: &TransformTable) -> Result<()> {
    w.write_all(&clip.to_bytes())?;
    Ok(())
}

/// Write a skeleton to `path`
pub fn save_skeleton(path: &Path, skeleton: &SkeletonTable) -> Result<()> {
    let mut file = fs::File::create(path)
        .with_context(|| format!("Failed to create skeleton file: {:?}", path))?;
    write_skeleton(&mut file, skeleton)
}

/// Write a clip to `path`
pub fn save_clip(path: &Path, clip: &TransformTable) -> Result<()> {
    let mut file =
        fs::File::create(path).with_context(|| format!("Failed to create clip file: {:?}", path))?;
    write_clip(&mut file, clip)
}

/// Write the joints of a skeleton as a Wavefront OBJ point cloud
///
/// Each joint is a group holding one vertex at its bind position (the
/// negated translation of its inverse bind matrix) and a one-point face.
pub fn write_joints_obj<W: Write>(w: &mut W, skeleton: &SkeletonTable) -> Result<()> {
    for (index, joint) in skeleton.joints.iter().enumerate() {
        let m = &joint.inverse_bind;
        writeln!(w, "g {}", joint.name)?;
        writeln!(w, "v {:.6} {:.6} {:.6}", -m[3], -m[7], -m[11])?;
        writeln!(w, "f {}", index + 1)?;
    }
    Ok(())
}

/// Write the joint OBJ dump to `path`
pub fn save_joints_obj(path: &Path, skeleton: &SkeletonTable) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("Failed to create OBJ file: {:?}", path))?;
    let mut writer = std::io::BufWriter::new(file);
    write_joints_obj(&mut writer, skeleton)?;
    writer
        .flush()
        .with_context(|| format!("Failed to write OBJ file: {:?}", path))
}

/// Write GLB bytes to `path`
pub fn save_glb(path: &Path, glb: &[u8]) -> Result<()> {
    fs::write(path, glb).with_context(|| format!("Failed to write GLB: {:?}", path))
}

/// File name of clip slot `slot`
pub fn clip_file_name(slot: usize) -> String {
    format!("clip_{:02}.tdtm", slot)
}

/// Clip slot encoded in a `clip_NN` file stem
pub fn clip_slot_from_path(path: &Path) -> Option<usize> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("clip_")?
        .parse()
        .ok()
}
