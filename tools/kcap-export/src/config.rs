//! Tool configuration
//!
//! Parses `kcap.toml`. Every field has a default, so an empty or missing
//! file yields [`KcapConfig::default`].

use anyhow::{bail, Context, Result};
use kcap_common::{StaticChannelPolicy, MAX_BONE_SLOTS};
use serde::Deserialize;
use std::path::Path;

/// Clip slot names used by the game's animation tables
pub const DEFAULT_CLIP_NAMES: [&str; 14] = [
    "idle",
    "run",
    "happy",
    "refuse",
    "sleep",
    "exhausted",
    "attack",
    "attack2",
    "attack3",
    "guard",
    "hit",
    "defeated",
    "specialattack",
    "backstep",
];

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct KcapConfig {
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    /// Which non-animated channels are written
    #[serde(default)]
    pub static_channels: StaticChannelPolicy,
    /// Animation name per clip slot
    #[serde(default = "default_clip_names")]
    pub clip_names: Vec<String>,
    /// UV transforms per texture slot
    #[serde(default)]
    pub uv_transforms: Vec<UvTransform>,
    /// Tolerance when comparing static values to channel defaults
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            static_channels: StaticChannelPolicy::default(),
            clip_names: default_clip_names(),
            uv_transforms: Vec::new(),
            epsilon: default_epsilon(),
        }
    }
}

impl ExportConfig {
    /// Name of clip slot `index`, `anim_N` past the configured list
    pub fn clip_name(&self, index: usize) -> String {
        self.clip_names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("anim_{}", index))
    }

    /// Transform for UV set `slot`, identity when not configured
    pub fn uv_transform(&self, slot: u16) -> UvTransform {
        UvTransform::for_slot(&self.uv_transforms, slot)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ImportConfig {
    /// Fixed import scale; estimated from a reference skeleton when absent
    #[serde(default)]
    pub scale: Option<f32>,
    /// Node name prefixes that mark skeleton joints
    #[serde(default = "default_joint_prefixes")]
    pub joint_prefixes: Vec<String>,
    /// Joint slots available to one draw call
    #[serde(default = "default_max_joints")]
    pub max_joints_per_draw: usize,
    /// Tolerance when comparing static values to channel defaults
    #[serde(default = "default_epsilon")]
    pub identity_epsilon: f32,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            scale: None,
            joint_prefixes: default_joint_prefixes(),
            max_joints_per_draw: default_max_joints(),
            identity_epsilon: default_epsilon(),
        }
    }
}

impl ImportConfig {
    /// Slot of a clip called `name`
    ///
    /// Accepts configured clip names and `anim_N`.
    pub fn clip_slot(&self, name: &str, export: &ExportConfig) -> Option<usize> {
        export
            .clip_names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(name))
            .or_else(|| name.strip_prefix("anim_")?.parse().ok())
    }

    pub fn is_joint_name(&self, name: &str) -> bool {
        self.joint_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }

    /// Reject values the mesh tables cannot store
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_BONE_SLOTS).contains(&self.max_joints_per_draw) {
            bail!(
                "import.max_joints_per_draw is {} but must be between 1 and {}",
                self.max_joints_per_draw,
                MAX_BONE_SLOTS
            );
        }
        Ok(())
    }
}

/// Scale and bias applied to one UV set
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct UvTransform {
    pub slot: u16,
    #[serde(default = "default_uv_scale")]
    pub scale: [f32; 2],
    #[serde(default)]
    pub offset: [f32; 2],
}

impl UvTransform {
    pub const fn identity(slot: u16) -> Self {
        Self {
            slot,
            scale: [1.0, 1.0],
            offset: [0.0, 0.0],
        }
    }

    /// The transform listed for `slot`, identity when absent
    pub fn for_slot(transforms: &[UvTransform], slot: u16) -> Self {
        transforms
            .iter()
            .find(|t| t.slot == slot)
            .copied()
            .unwrap_or(Self::identity(slot))
    }

    pub fn apply(&self, uv: [f32; 2]) -> [f32; 2] {
        [
            uv[0] * self.scale[0] + self.offset[0],
            uv[1] * self.scale[1] + self.offset[1],
        ]
    }
}

fn default_clip_names() -> Vec<String> {
    DEFAULT_CLIP_NAMES.iter().map(|s| s.to_string()).collect()
}

fn default_joint_prefixes() -> Vec<String> {
    vec!["J_".to_string(), "AT_".to_string()]
}

fn default_max_joints() -> usize {
    16
}

fn default_epsilon() -> f32 {
    1e-4
}

fn default_uv_scale() -> [f32; 2] {
    [1.0, 1.0]
}

/// Load and parse a config file
pub fn load_config(path: &Path) -> Result<KcapConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {:?}", path))?;
    let config: KcapConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {:?}", path))?;
    config
        .import
        .validate()
        .with_context(|| format!("Invalid config: {:?}", path))?;
    Ok(config)
}

/// Load `path` when given, defaults otherwise
pub fn load_or_default(path: Option<&Path>) -> Result<KcapConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(KcapConfig::default()),
    }
}
