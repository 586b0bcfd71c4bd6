use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tierstack_core::merge::{MergeMode, MergeOptions};
use tierstack_core::split::SplitOptions;
use tierstack_core::stack::{StackOptions, StackingStyle};

use crate::format::{read_json, write_json, Result};

/// Settings of one 3D flow run, stored as JSON next to its artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub name: String,
    pub stack: StackSettings,
    /// Design name of each tier, bottom first; `part<i>` when missing.
    pub tier_designs: Vec<String>,
    /// Name of the merged or partitioned top design.
    pub top_name: Option<String>,
    pub split: SplitSettings,
    pub artifacts: Artifacts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackSettings {
    pub style: StackingStyle,
    /// Routing layers per tier, bottom first.
    pub num_layers: Vec<usize>,
    /// ILV cut size per tier boundary (microns).
    pub ilv_size: Vec<f64>,
    pub ilv_spacing: Vec<f64>,
    pub row_splitting: bool,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            style: StackingStyle::FaceToBack,
            num_layers: vec![6, 6],
            ilv_size: vec![0.07],
            ilv_spacing: vec![0.07],
            row_splitting: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSettings {
    pub exclude_wires: bool,
    /// Where graph renderings of suspicious cuts are written.
    pub dump_dir: Option<PathBuf>,
}

/// Input and output files. Relative paths resolve against the config
/// file's directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Artifacts {
    pub tech_files: Vec<PathBuf>,
    pub design_file: Option<PathBuf>,
    pub partition_file: Option<PathBuf>,
    pub tech_3d_file: Option<PathBuf>,
    pub tier_map_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            name: "flow".to_string(),
            stack: StackSettings::default(),
            tier_designs: Vec::new(),
            top_name: None,
            split: SplitSettings::default(),
            artifacts: Artifacts::default(),
        }
    }
}

impl FlowConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Load a config, resolving its artifact paths against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: FlowConfig = read_json(path)?;
        if let Some(base) = path.parent() {
            config.artifacts.resolve(base);
        }
        log::info!("loaded flow config {} from {}", config.name, path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }

    pub fn tiers(&self) -> usize {
        self.stack.num_layers.len()
    }

    pub fn tier_names(&self) -> Vec<String> {
        (0..self.tiers())
            .map(|t| {
                self.tier_designs
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| format!("part{t}"))
            })
            .collect()
    }

    pub fn stack_options(&self) -> StackOptions {
        StackOptions {
            style: self.stack.style,
            num_layers: self.stack.num_layers.clone(),
            ilv_size: self.stack.ilv_size.clone(),
            ilv_spacing: self.stack.ilv_spacing.clone(),
            row_splitting: self.stack.row_splitting,
        }
    }

    pub fn merge_options(&self, mode: MergeMode) -> MergeOptions {
        MergeOptions {
            style: self.stack.style,
            mode,
            design_order: self.tier_names(),
            top_name: self.top_name.clone(),
            row_splitting: self.stack.row_splitting,
        }
    }

    pub fn split_options(&self) -> SplitOptions {
        SplitOptions {
            row_splitting: self.stack.row_splitting,
            exclude_wires: self.split.exclude_wires,
            names: self.tier_names(),
        }
    }
}

impl Artifacts {
    fn resolve(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.tech_files.iter_mut().for_each(&join);
        for p in [
            &mut self.design_file,
            &mut self.partition_file,
            &mut self.tech_3d_file,
            &mut self.tier_map_file,
            &mut self.output_dir,
        ]
        .into_iter()
        .flatten()
        {
            join(p);
        }
    }
}
