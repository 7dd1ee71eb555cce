//! kcap-export library
//!
//! Converts KCAP skeletons, clips and mesh tables to glTF/GLB and stages
//! glTF scenes back into KCAP tables.

pub mod config;
pub mod export;
pub mod formats;
pub mod glb;
pub mod import;
pub mod inspect;
pub mod mesh;
pub mod scene;

pub use config::{load_config, load_or_default, ExportConfig, ImportConfig, KcapConfig};
pub use export::{build_gltf, export_glb, ClipInput};
pub use import::{import_scene, ImportOptions, ImportedAsset, ImportedClip};
pub use scene::{load_gltf, load_gltf_slice, ImportedScene};
