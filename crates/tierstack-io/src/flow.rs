//! File-level steps of the 3D flow: each reads its inputs from the paths in
//! a [`FlowConfig`], runs one core transformation and writes the results.

use std::path::{Path, PathBuf};

use tierstack_core::merge::MergeMode;
use tierstack_core::split::SplitDiagnostic;
use tierstack_core::stack::Tech3d;
use tierstack_core::{
    make_3d, merge_tiers, partition_design, split_design, Design, DesignSet, StackError, Technology,
};

use crate::config::FlowConfig;
use crate::export::{export_design, export_technology};
use crate::format::{LayoutFormat, Result};
use crate::import::{import_design, import_technology};
use crate::tables::{read_partitions, TierTable};

/// Library file holding the black-box macros of partitioned designs.
pub const BLOCK_LIBRARY: &str = "blocks.json";

fn required<'a>(path: &'a Option<PathBuf>, what: &str) -> Result<&'a Path> {
    path.as_deref()
        .ok_or_else(|| StackError::config(format!("flow config has no {what}")).into())
}

pub fn design_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

pub fn load_technology(format: &impl LayoutFormat, files: &[PathBuf]) -> Result<Technology> {
    let raw = format.parse_technology(files)?;
    Ok(import_technology(&raw))
}

/// Read a design and drop every reference that does not resolve in `tech`.
pub fn load_design(format: &impl LayoutFormat, file: &Path, tech: &Technology) -> Result<Design> {
    let raw = format.parse_design(file)?;
    Ok(import_design(&raw, tech).rebind(tech))
}

pub fn save_technology(format: &impl LayoutFormat, tech: &Technology, file: &Path) -> Result<()> {
    format.write_technology(&export_technology(tech, false), file)
}

pub fn save_design(format: &impl LayoutFormat, design: &Design, file: &Path) -> Result<()> {
    format.write_design(&export_design(design, false), file)
}

/// Write every design of `set` as `<dir>/<name>.json`, plus the block
/// library when the set defines block macros.
pub fn save_design_set(
    format: &impl LayoutFormat,
    set: &DesignSet,
    tech: &Technology,
    dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(set.designs.len() + 1);
    for design in set.designs.values() {
        let path = design_path(dir, &design.name);
        save_design(format, design, &path)?;
        written.push(path);
    }
    if !set.block_macros.is_empty() {
        let mut blocks = tech.copy_only_header();
        for block in set.block_macros.values() {
            blocks.add_macro(block.clone());
        }
        let path = dir.join(BLOCK_LIBRARY);
        format.write_technology(&export_technology(&blocks, true), &path)?;
        written.push(path);
    }
    Ok(written)
}

/// Dump the graph renderings of each diagnostic as
/// `<net>.<cut layer>.{before,after}.dot`.
pub fn write_diagnostics(dir: &Path, diagnostics: &[SplitDiagnostic]) -> Result<Vec<PathBuf>> {
    if diagnostics.is_empty() {
        return Ok(Vec::new());
    }
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(diagnostics.len() * 2);
    for diag in diagnostics {
        log::warn!(
            "net {} cut at {}: expected {} subnets, found {}",
            diag.net,
            diag.cut_layer,
            diag.expected,
            diag.found
        );
        for (stage, dot) in [("before", &diag.before_dot), ("after", &diag.after_dot)] {
            let path = dir.join(format!("{}.{}.{}.dot", diag.net, diag.cut_layer, stage));
            std::fs::write(&path, dot)?;
            written.push(path);
        }
    }
    Ok(written)
}

// ── Steps ────────────────────────────────────────────────────────────

/// Build the 3D technology and write it with its tier table.
pub fn run_make_3d(format: &impl LayoutFormat, config: &FlowConfig) -> Result<Tech3d> {
    let tech = load_technology(format, &config.artifacts.tech_files)?;
    let tech3d = make_3d(&tech, &config.stack_options())?;
    let tech_file = required(&config.artifacts.tech_3d_file, "3D technology file")?;
    let table_file = required(&config.artifacts.tier_map_file, "tier map file")?;
    save_technology(format, &tech3d.tech, tech_file)?;
    TierTable::from_tech(&tech3d).save(table_file)?;
    Ok(tech3d)
}

/// Partition the 2D design into the tier designs named by the config.
pub fn run_partition(format: &impl LayoutFormat, config: &FlowConfig) -> Result<DesignSet> {
    let tech = load_technology(format, &config.artifacts.tech_files)?;
    let design = load_design(format, required(&config.artifacts.design_file, "design file")?, &tech)?;
    let partitioning = read_partitions(required(&config.artifacts.partition_file, "partition file")?)?;
    let mut set = partition_design(&design, &tech, &partitioning, &config.tier_names())?;
    if let Some(top) = &config.top_name {
        if let Some(mut d) = set.designs.shift_remove(&design.name) {
            d.name = top.clone();
            set.insert(d);
        }
    }
    let out = required(&config.artifacts.output_dir, "output directory")?;
    save_design_set(format, &set, &tech, out)?;
    Ok(set)
}

fn load_tier_inputs(
    format: &impl LayoutFormat,
    config: &FlowConfig,
) -> Result<(Technology, TierTable)> {
    let tech_file = required(&config.artifacts.tech_3d_file, "3D technology file")?;
    let tech3d = load_technology(format, &[tech_file.to_path_buf()])?;
    let table = TierTable::load(required(&config.artifacts.tier_map_file, "tier map file")?)?;
    Ok((tech3d, table))
}

/// Merge the tier designs found in the output directory into one 3D design.
pub fn run_merge(format: &impl LayoutFormat, config: &FlowConfig, mode: MergeMode) -> Result<Design> {
    let (tech3d, table) = load_tier_inputs(format, config)?;
    let tech2d = load_technology(format, &config.artifacts.tech_files)?;
    let out = required(&config.artifacts.output_dir, "output directory")?;
    let mut set = DesignSet::new();
    for name in config.tier_names() {
        set.insert(load_design(format, &design_path(out, &name), &tech2d)?);
    }
    let options = config.merge_options(mode);
    let merged = merge_tiers(&set, &tech3d, &table.maps, &options)?;
    let design = merged
        .designs
        .into_values()
        .next()
        .ok_or_else(|| StackError::config("merge produced no design"))?;
    save_design(format, &design, &design_path(out, &design.name))?;
    Ok(design)
}

/// Split the routed 3D design back into tier designs, writing graph dumps
/// of suspicious cuts to the configured dump directory.
pub fn run_split(format: &impl LayoutFormat, config: &FlowConfig) -> Result<DesignSet> {
    let (tech3d, table) = load_tier_inputs(format, config)?;
    let tech2d = load_technology(format, &config.artifacts.tech_files)?;
    let design = load_design(format, required(&config.artifacts.design_file, "design file")?, &tech3d)?;
    let mut set = DesignSet::new();
    let name = design.name.clone();
    set.insert(design);

    let split = split_design(
        &set,
        &name,
        &table.ilv_layers,
        &tech3d,
        &tech2d,
        &table.inverse(),
        &config.split_options(),
    )?;
    if let Some(dir) = &config.split.dump_dir {
        write_diagnostics(dir, &split.diagnostics)?;
    }
    let out = required(&config.artifacts.output_dir, "output directory")?;
    save_design_set(format, &split.set, &tech2d, out)?;
    Ok(split.set)
}
