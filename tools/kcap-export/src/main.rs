//! kcap-export - KCAP animation asset tool
//!
//! Converts KCAP skeletons (.tnoj) and clips (.tdtm) to GLB, stages glTF
//! scenes back into KCAP tables, dumps joints to OBJ and inspects table
//! files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use kcap_export::{config, export, formats, import, inspect, scene};

#[derive(Parser)]
#[command(name = "kcap-export")]
#[command(about = "KCAP animation asset tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export a skeleton and clips to GLB
    ///
    /// The GLB holds the joint hierarchy and animations only; mesh tables
    /// have no standalone file form and are exported through the library.
    Export {
        /// Input .tdtm clips; a `clip_NN` file name selects slot NN
        clips: Vec<PathBuf>,

        /// Skeleton .tnoj file
        #[arg(short, long)]
        skeleton: PathBuf,

        /// Output .glb file
        #[arg(short, long, default_value = "out.glb")]
        output: PathBuf,

        /// Path to kcap.toml
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Stage a glTF/GLB scene into KCAP tables
    ///
    /// Writes skeleton.tnoj and one clip_NN.tdtm per matched animation.
    /// Mesh tables are built and validated, and their statistics logged,
    /// but they are not written to disk.
    Import {
        /// Input glTF/GLB scene
        scene: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Reference skeleton for joint order and scale estimation
        #[arg(short, long)]
        reference: Option<PathBuf>,

        /// Import scale (overrides config and estimation)
        #[arg(long)]
        scale: Option<f32>,

        /// Path to kcap.toml
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Dump the joint bind positions of a skeleton to OBJ
    Joints {
        /// Skeleton .tnoj file
        skeleton: PathBuf,

        /// Output .obj file
        #[arg(short, long, default_value = "joints.obj")]
        output: PathBuf,
    },

    /// Print a summary of a KCAP table file
    Inspect {
        /// Input .tdtm, .tnoj, QSTM or VCTM file
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    match cli.command {
        Commands::Export {
            clips,
            skeleton,
            output,
            config,
        } => {
            let config = config::load_or_default(config.as_deref())?;
            tracing::info!("Exporting {:?} -> {:?}", skeleton, output);
            run_export(&clips, &skeleton, &output, &config.export)?;
            tracing::info!("Done!");
        }

        Commands::Import {
            scene,
            output,
            reference,
            scale,
            config,
        } => {
            let config = config::load_or_default(config.as_deref())?;
            tracing::info!("Importing {:?} -> {:?}", scene, output);
            run_import(&scene, &output, reference.as_deref(), scale, &config)?;
            tracing::info!("Done!");
        }

        Commands::Joints { skeleton, output } => {
            let table = formats::read_skeleton(&skeleton)?;
            formats::save_joints_obj(&output, &table)?;
            tracing::info!("Wrote {} joints to {:?}", table.len(), output);
        }

        Commands::Inspect { file } => inspect::inspect_file(&file)?,
    }

    Ok(())
}

fn run_export(
    clip_paths: &[PathBuf],
    skeleton_path: &Path,
    output: &Path,
    config: &config::ExportConfig,
) -> Result<()> {
    let skeleton = formats::read_skeleton(skeleton_path)?;

    let mut tables = Vec::with_capacity(clip_paths.len());
    for (position, path) in clip_paths.iter().enumerate() {
        let slot = formats::clip_slot_from_path(path).unwrap_or(position);
        tables.push((slot, formats::read_clip(path)?));
    }
    let clips: Vec<export::ClipInput> = tables
        .iter()
        .map(|(slot, table)| export::ClipInput { slot: *slot, table })
        .collect();

    let glb = export::export_glb(&skeleton, &clips, &[], config)?;
    formats::save_glb(output, &glb)?;
    tracing::info!(
        "Wrote {} joints and {} clips ({} bytes)",
        skeleton.len(),
        clips.len(),
        glb.len()
    );
    Ok(())
}

fn run_import(
    scene_path: &Path,
    output: &Path,
    reference: Option<&Path>,
    scale: Option<f32>,
    config: &config::KcapConfig,
) -> Result<()> {
    let scene = scene::load_gltf(scene_path)?;
    let reference = reference.map(formats::read_skeleton).transpose()?;
    let options = import::ImportOptions {
        reference: reference.as_ref(),
        scale,
    };
    let asset = import::import_scene(&scene, config, options)?;

    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory: {:?}", output))?;

    formats::save_skeleton(&output.join("skeleton.tnoj"), &asset.skeleton)?;
    for clip in &asset.clips {
        let path = output.join(formats::clip_file_name(clip.slot));
        formats::save_clip(&path, &clip.table)?;
        tracing::info!("  [{}] '{}' -> {:?}", clip.slot, clip.name, path);
    }

    let draws = asset.meshes.draw_calls();
    let vertices: usize = asset
        .meshes
        .vertex_tables
        .iter()
        .map(|t| t.vertex_count())
        .sum();
    tracing::info!(
        "Meshes (not written): {} draw calls, {} vertices, {} joint assignment changes",
        draws.len(),
        vertices,
        asset.meshes.assignment_changes()
    );
    Ok(())
}
