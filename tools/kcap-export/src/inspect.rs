//! Table inspection
//!
//! Identifies a KCAP file by its magic and summarizes its contents.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::formats::{
    read_collection, ChannelEntry, ChannelProgram, KeyframeTable, SkeletonTable, TransformTable,
    KCAP_MAGIC, QSTM_MAGIC, TDTM_MAGIC, TNOJ_MAGIC, VCTM_MAGIC,
};

/// Offset of the typed magic inside a KCAP-framed table
const TYPED_MAGIC_OFFSET: usize = 0x20;

/// Kind of table held by a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// TDTM transform table (one clip)
    Clip,
    /// KCAP collection of TNOJ joints
    Skeleton,
    /// QSTM channel program
    ChannelProgram,
    /// VCTM keyframe table
    KeyframeTable,
}

fn magic_at(bytes: &[u8], offset: usize) -> Option<u32> {
    let field = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
}

/// Identify the table in `bytes`
pub fn sniff(bytes: &[u8]) -> Result<TableKind> {
    match magic_at(bytes, 0) {
        Some(KCAP_MAGIC) => {
            if magic_at(bytes, TYPED_MAGIC_OFFSET) == Some(TDTM_MAGIC) {
                return Ok(TableKind::Clip);
            }
            let payloads = read_collection(bytes).context("Failed to read KCAP collection")?;
            match payloads.first().and_then(|p| magic_at(p, 0)) {
                Some(TNOJ_MAGIC) | None => Ok(TableKind::Skeleton),
                Some(other) => bail!(
                    "KCAP collection of unsupported payloads ({:?})",
                    String::from_utf8_lossy(&other.to_le_bytes())
                ),
            }
        }
        Some(QSTM_MAGIC) => Ok(TableKind::ChannelProgram),
        Some(VCTM_MAGIC) => Ok(TableKind::KeyframeTable),
        Some(other) => bail!(
            "Unknown magic {:?}",
            String::from_utf8_lossy(&other.to_le_bytes())
        ),
        None => bail!("File is too short to hold a table"),
    }
}

/// Human-readable summary lines of the table in `bytes`
pub fn describe(bytes: &[u8]) -> Result<Vec<String>> {
    let lines = match sniff(bytes)? {
        TableKind::Clip => describe_clip(&TransformTable::from_bytes(bytes)?),
        TableKind::Skeleton => describe_skeleton(&SkeletonTable::from_bytes(bytes)?),
        TableKind::ChannelProgram => describe_program(&ChannelProgram::from_bytes(bytes)?),
        TableKind::KeyframeTable => describe_keyframes(&KeyframeTable::from_bytes(bytes)?),
    };
    Ok(lines)
}

/// Log the summary of a file
pub fn inspect_file(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
    let lines = describe(&bytes).with_context(|| format!("Failed to inspect {:?}", path))?;
    tracing::info!("{:?}:", path);
    for line in lines {
        tracing::info!("  {}", line);
    }
    Ok(())
}

fn describe_clip(clip: &TransformTable) -> Vec<String> {
    let markers = &clip.markers;
    let mut lines = vec![
        format!(
            "TDTM clip: {:.3}s (start {}, end {}, loop {}..{})",
            markers.duration(),
            markers.start,
            markers.end,
            markers.loop_start,
            markers.loop_end
        ),
        format!(
            "{} bindings, {} channel programs, {} keyframe tables",
            clip.bindings.len(),
            clip.programs.len(),
            clip.tables.len()
        ),
    ];
    for binding in &clip.bindings {
        lines.push(format!(
            "[{:?} {}] {:?} -> program {}",
            binding.category(),
            binding.target,
            binding.kind,
            binding.program
        ));
    }
    lines
}

fn describe_skeleton(skeleton: &SkeletonTable) -> Vec<String> {
    let mut lines = vec![format!("TNOJ skeleton: {} joints", skeleton.len())];
    for (index, joint) in skeleton.joints.iter().enumerate() {
        let parent = joint
            .parent
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        lines.push(format!(
            "[{}] '{}' parent {} t {:?} r {:?} s {:?}",
            index,
            joint.name,
            parent,
            joint.translation,
            joint.rotation,
            joint.rest_scale()
        ));
    }
    lines
}

fn describe_program(program: &ChannelProgram) -> Vec<String> {
    let mut lines = vec![format!("QSTM channel program: {} entries", program.entries.len())];
    for entry in &program.entries {
        lines.push(match entry {
            ChannelEntry::Constant { axis, values, .. } => {
                format!("constant {:?} = {:?}", axis, values.as_slice())
            }
            ChannelEntry::Copy { source, dest, .. } => format!("copy {:?} -> {:?}", source, dest),
            ChannelEntry::KeyframeRef { axis, table } => {
                format!("keyframes {:?} <- table {}", axis, table)
            }
        });
    }
    lines
}

fn describe_keyframes(table: &KeyframeTable) -> Vec<String> {
    let times = table.decoded_times();
    vec![
        format!(
            "VCTM keyframe table: {} keys × {} components",
            table.len(),
            table.component_count()
        ),
        format!(
            "{:?}, values {:?}, times {:?} at {:?}",
            table.interpolation(),
            table.value_encoding(),
            table.time_encoding(),
            table.time_scale()
        ),
        format!(
            "time codes {:?}..{:?}",
            times.first().copied().unwrap_or(0.0),
            times.last().copied().unwrap_or(0.0)
        ),
    ]
}
