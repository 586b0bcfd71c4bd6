//! Merging per-tier designs into one 3D design over the synthesized
//! technology.
//!
//! Two modes are supported. `Route` takes placed tier designs (typically the
//! partitions produced by [`crate::partition`]) and joins their nets by name
//! without wiring, ready for a 3D router. `Merge` takes routed tier designs
//! (typically the output of [`crate::split`]) and reassembles every split net,
//! wires included, under its original name.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::design::{Design, DesignSet};
use crate::error::{Result, StackError};
use crate::floorplan::{Blockage, BlockageKind, Row};
use crate::geometry::{Orientation, Rect, Shape};
use crate::net::{Net, Path};
use crate::stack::{tier_name, StackingStyle, TierMaps};
use crate::tech::{retarget, NameMap, Technology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Connectivity only; boundary ports of a partitioning are removed.
    Route,
    /// Connectivity and wiring; ILV ports are removed and subnets rejoined.
    Merge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOptions {
    pub style: StackingStyle,
    pub mode: MergeMode,
    /// Design placed on each tier, bottom tier first.
    pub design_order: Vec<String>,
    /// Name of the merged design; the first tier design's name otherwise.
    #[serde(default)]
    pub top_name: Option<String>,
    #[serde(default)]
    pub row_splitting: bool,
}

// ── Name patterns ────────────────────────────────────────────────────

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("name pattern is a valid regex"))
}

fn partition_port() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^FLOWGEN_PART_(?:IN|OUT)_(.*)$")
}

fn ilv_port() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^ILV_(?:IN|OUT)_(.*)$")
}

fn subnet() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"^(.*)_SUBNET\d+$")
}

fn tier_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"_T(\d+)$")
}

/// Original net name of a split subnet.
pub fn base_net_name(name: &str) -> &str {
    subnet()
        .captures(name)
        .and_then(|c| c.get(1))
        .map_or(name, |m| m.as_str())
}

fn belongs_to_tier(name: &str, tier: usize) -> bool {
    tier_suffix()
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        == Some(tier)
}

/// Map a 2D name to its tier counterpart; a name that already carries this
/// tier's suffix and exists is kept.
fn to_tier(
    name: Option<&str>,
    map: &NameMap,
    tier: usize,
    exists: impl Fn(&str) -> bool,
    kind: &str,
    owner: &str,
) -> Option<String> {
    let name = name?;
    if !map.contains_key(name) && belongs_to_tier(name, tier) && exists(name) {
        return Some(name.to_string());
    }
    retarget(Some(name), map, exists, kind, owner)
}

fn retarget_path(path: &mut Path, maps: &TierMaps, tier: usize, tech: &Technology, owner: &str) {
    path.layer = to_tier(
        path.layer.as_deref(),
        &maps.layer[tier],
        tier,
        |n| tech.layers.contains(n),
        "layer",
        owner,
    );
    path.vias.retain_mut(|inst| {
        match to_tier(
            Some(&inst.via),
            &maps.via[tier],
            tier,
            |n| tech.vias.contains_key(n),
            "via",
            owner,
        ) {
            Some(v) => {
                inst.via = v;
                true
            }
            None => false,
        }
    });
}

// ── Floorplan ────────────────────────────────────────────────────────

/// Interleave split rows: each 2D row becomes one row per tier, stacked by
/// the tier site height, bottom tier first for rows facing north.
fn split_rows(reference: &Design, maps: &TierMaps, tech: &Technology) -> Result<Vec<(usize, Row)>> {
    let tiers = maps.tiers();
    let mut out = Vec::with_capacity(reference.rows.len() * tiers);
    for row in reference.rows.values() {
        let order: Vec<usize> = if row.orientation == Orientation::N {
            (0..tiers).collect()
        } else {
            (0..tiers).rev().collect()
        };
        let site_2d = row
            .site
            .as_deref()
            .ok_or_else(|| StackError::missing("site of row", &row.name))?;
        let mut cur_y = row.origin.y;
        for tier in order {
            let site_3d = maps.site[tier]
                .get(site_2d)
                .and_then(|s| tech.sites.get(s))
                .ok_or_else(|| StackError::missing("3D site", &tier_name(site_2d, tier)))?;
            let mut split = row.clone();
            split.name = tier_name(&row.name, tier);
            split.site = Some(site_3d.name.clone());
            split.origin.y = cur_y;
            cur_y += (site_3d.height * reference.dbu).trunc();
            out.push((tier, split));
        }
    }
    Ok(out)
}

/// Clip a placement blockage to the given rows; parts outside every row are
/// dropped.
fn clip_to_rows(blockage: &Blockage, rows: &[Rect]) -> Option<Blockage> {
    let shapes: Vec<Shape> = blockage
        .shapes
        .iter()
        .filter_map(Shape::as_rect)
        .flat_map(|r| rows.iter().filter_map(move |row| r.get_intersection(row)))
        .map(|r| Shape::rect(None, r))
        .collect();
    if shapes.is_empty() {
        return None;
    }
    Some(Blockage {
        shapes,
        ..blockage.clone()
    })
}

// ── Merge ────────────────────────────────────────────────────────────

/// Merge the designs listed in `options.design_order` into one design over
/// `tech3d`, tier `t` taking design `design_order[t]` and the `t`-th maps.
/// The result holds only the merged design, named `options.top_name`.
pub fn merge_tiers(
    set: &DesignSet,
    tech3d: &Technology,
    maps: &TierMaps,
    options: &MergeOptions,
) -> Result<DesignSet> {
    let tiers = maps.tiers();
    if options.design_order.len() != tiers {
        return Err(StackError::config(format!(
            "{} designs given for a {}-tier technology",
            options.design_order.len(),
            tiers
        )));
    }
    let reference = set.design(&options.design_order[0])?;
    let top_name = options
        .top_name
        .clone()
        .unwrap_or_else(|| reference.name.clone());
    log::info!(
        "start merging {} into {} ({:?} mode, {})",
        options.design_order.join(", "),
        top_name,
        options.mode,
        options.style
    );

    let mut merged = reference.copy_only_header(&top_name);
    merged.tracks.clear();
    merged.gcell_grids.clear();
    merged.vias.clear();
    merged.via_rules.clear();

    let mut tier_rows: Vec<Vec<Rect>> = vec![Vec::new(); tiers];
    if options.row_splitting {
        log::info!("splitting {} rows over {} tiers", reference.rows.len(), tiers);
        merged.rows.clear();
        for (tier, row) in split_rows(reference, maps, tech3d)? {
            if let Some(site) = row.site.as_deref().and_then(|s| tech3d.sites.get(s)) {
                tier_rows[tier].push(row.rect(site, merged.dbu));
            }
            merged.rows.insert(row.name.clone(), row);
        }
    } else {
        for row in merged.rows.values_mut() {
            let owner = format!("row {}", row.name);
            row.site = retarget(
                row.site.as_deref(),
                &maps.site[0],
                |n| tech3d.sites.contains_key(n),
                "site",
                &owner,
            );
        }
    }

    for (tier, design_name) in options.design_order.iter().enumerate() {
        let mut cur = set.design(design_name)?.clone();
        log::info!("merging tier {} from design {}", tier, cur.name);
        merge_components(&mut merged, &cur, tier, tech3d, maps, options)?;
        strip_ports(&mut cur, options.mode);
        merge_pins(&mut merged, &cur, tier, tech3d, maps);
        merge_blockages(&mut merged, &cur, tier, tech3d, maps, &tier_rows[tier], options);
        merge_nets(&mut merged, &cur, tier, tech3d, maps, options.mode);
    }

    merged.relink_pins();
    let mut out = set.copy_only_header();
    out.insert(merged);
    log::info!("end merging {}", top_name);
    Ok(out)
}

fn merge_components(
    merged: &mut Design,
    cur: &Design,
    tier: usize,
    tech3d: &Technology,
    maps: &TierMaps,
    options: &MergeOptions,
) -> Result<()> {
    let ilv = if options.style == StackingStyle::FaceToBack && tier > 0 {
        let name = format!("ILV_T{}{}", tier - 1, tier);
        if !tech3d.layers.contains(&name) {
            return Err(StackError::missing("ILV layer", &name));
        }
        Some(name)
    } else {
        None
    };

    for (name, comp) in &cur.components {
        let mut comp = comp.clone();
        let owner = format!("component {name}");
        comp.macro_name = retarget(
            comp.macro_name.as_deref(),
            &maps.macro_[tier],
            |n| tech3d.macros.contains_key(n),
            "macro",
            &owner,
        );
        let Some(macro_3d) = comp.macro_name.as_deref().and_then(|m| tech3d.macros.get(m)) else {
            merged.components.insert(name.clone(), comp);
            continue;
        };
        let height_2d = if options.row_splitting {
            macro_3d.height * 2.0
        } else {
            macro_3d.height
        };
        // the through-silicon keep-out covers the 2D footprint
        if let Some(ilv) = &ilv {
            let ll = comp.location;
            let rect = Rect::int(
                ll.x,
                ll.y,
                ll.x + (macro_3d.width * cur.dbu).trunc(),
                ll.y + (height_2d * cur.dbu).trunc(),
            );
            merged.blockages.push(Blockage::routing(ilv, rect, Some(name)));
        }
        if options.row_splitting && comp.is_shifted_by_row_splitting(tier) {
            comp.location.y += (macro_3d.height * cur.dbu).trunc();
        }
        if merged.components.insert(name.clone(), comp).is_some() {
            log::warn!("component {} appears on several tiers, keeping tier {}", name, tier);
        }
    }
    Ok(())
}

/// Remove the ports that only existed to connect tiers, renaming nets that
/// were named after such a port back to the net they stand for.
fn strip_ports(cur: &mut Design, mode: MergeMode) {
    let pattern = match mode {
        MergeMode::Route => partition_port(),
        MergeMode::Merge => ilv_port(),
    };
    let ports: Vec<String> = cur
        .pins
        .keys()
        .filter(|n| pattern.is_match(n))
        .cloned()
        .collect();
    for port in ports {
        let Some(pin) = cur.pins.shift_remove(&port) else { continue };
        let Some(net_name) = pin.net else { continue };
        let Some(mut net) = cur.nets.shift_remove(&net_name) else { continue };
        net.pins.retain(|p| p != &port);
        let renamed = match pattern.captures(&net_name).and_then(|c| c.get(1)) {
            Some(m) => m.as_str().to_string(),
            None => net_name.clone(),
        };
        if renamed != net_name {
            log::debug!("net {} renamed to {}", net_name, renamed);
            net.name = renamed.clone();
        }
        cur.nets.insert(renamed, net);
    }
}

fn merge_pins(merged: &mut Design, cur: &Design, tier: usize, tech3d: &Technology, maps: &TierMaps) {
    for (name, pin) in &cur.pins {
        if pin.is_supply() {
            log::debug!("supply pin {} is not merged", name);
            continue;
        }
        let mut pin = pin.clone();
        pin.change_layer(&maps.layer[tier], tech3d);
        pin.net = None;
        if merged.pins.insert(name.clone(), pin).is_some() {
            log::warn!("pin {} appears on several tiers, keeping tier {}", name, tier);
        }
    }
}

fn merge_blockages(
    merged: &mut Design,
    cur: &Design,
    tier: usize,
    tech3d: &Technology,
    maps: &TierMaps,
    rows: &[Rect],
    options: &MergeOptions,
) {
    for blockage in &cur.blockages {
        match blockage.kind {
            BlockageKind::Placement if options.row_splitting => {
                if let Some(clipped) = clip_to_rows(blockage, rows) {
                    merged.blockages.push(clipped);
                }
            }
            BlockageKind::Placement => {
                if !merged.blockages.contains(blockage) {
                    merged.blockages.push(blockage.clone());
                }
            }
            BlockageKind::Routing => {
                let mut b = blockage.clone();
                b.change_layer(&maps.layer[tier], tech3d);
                merged.blockages.push(b);
            }
        }
    }
}

fn merge_nets(
    merged: &mut Design,
    cur: &Design,
    tier: usize,
    tech3d: &Technology,
    maps: &TierMaps,
    mode: MergeMode,
) {
    for net in cur.nets.values() {
        let name = match mode {
            MergeMode::Route => net.name.as_str(),
            MergeMode::Merge => base_net_name(&net.name),
        };
        let target = merged
            .nets
            .entry(name.to_string())
            .or_insert_with(|| net.copy_only_header(name));
        for pin in &net.pins {
            target.add_pin(pin);
        }
        for cp in &net.component_pins {
            target.add_component_pin(cp.clone());
        }
        if mode == MergeMode::Route {
            continue;
        }
        let owner = format!("net {}", net.name);
        for wire in &net.wires {
            let mut wire = wire.clone();
            wire.layer = to_tier(
                wire.layer.as_deref(),
                &maps.layer[tier],
                tier,
                |n| tech3d.layers.contains(n),
                "layer",
                &owner,
            );
            for path in &mut wire.paths {
                retarget_path(path, maps, tier, tech3d, &owner);
            }
            target.wires.push(wire);
        }
    }
}

/// Net names in `merged` that no tier design contributed wiring to.
pub fn unrouted_nets(merged: &Design) -> Vec<&Net> {
    merged.nets.values().filter(|n| n.wires.is_empty()).collect()
}
