//! 3D technology synthesis: stack per-tier copies of a 2D technology with
//! inter-layer via (ILV) cut layers in between, and record how every 2D name
//! maps onto each tier.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StackError};
use crate::geometry::{Rect, Shape};
use crate::layer::{Layer, LayerClass};
use crate::tech::{NameMap, Technology};
use crate::via::{Via, ViaRule, ViaRuleLayer};

// ── Options ──────────────────────────────────────────────────────────

/// How consecutive tiers are bonded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StackingStyle {
    /// Every tier keeps its bottom-to-top layer order.
    #[serde(rename = "f2b")]
    FaceToBack,
    /// Odd tiers are flipped so facing tiers meet at their top metals.
    #[serde(rename = "f2f")]
    FaceToFace,
}

impl FromStr for StackingStyle {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "f2b" => Ok(StackingStyle::FaceToBack),
            "f2f" => Ok(StackingStyle::FaceToFace),
            other => Err(StackError::config(format!(
                "invalid stacking style '{other}', expected f2b or f2f"
            ))),
        }
    }
}

impl fmt::Display for StackingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StackingStyle::FaceToBack => "f2b",
            StackingStyle::FaceToFace => "f2f",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackOptions {
    pub style: StackingStyle,
    /// Routing layers used by each tier, bottom tier first.
    pub num_layers: Vec<usize>,
    /// ILV cut size (microns) between tier `t` and `t + 1`.
    pub ilv_size: Vec<f64>,
    pub ilv_spacing: Vec<f64>,
    /// Halve site and cell heights so two tiers share one 2D row.
    #[serde(default)]
    pub row_splitting: bool,
}

impl StackOptions {
    pub fn tiers(&self) -> usize {
        self.num_layers.len()
    }

    fn validate(&self, tech: &Technology) -> Result<()> {
        let available = tech.layers.routing().len();
        if self.num_layers.is_empty() {
            return Err(StackError::config("at least one tier is required"));
        }
        if let Some(n) = self
            .num_layers
            .iter()
            .find(|n| **n == 0 || **n > available)
        {
            return Err(StackError::config(format!(
                "tier routing layer count {n} is outside 1..={available}"
            )));
        }
        let boundaries = self.tiers() - 1;
        if self.ilv_size.len() < boundaries || self.ilv_spacing.len() < boundaries {
            return Err(StackError::config(format!(
                "{} tiers need {} ILV sizes and spacings, got {} and {}",
                self.tiers(),
                boundaries,
                self.ilv_size.len(),
                self.ilv_spacing.len()
            )));
        }
        Ok(())
    }
}

// ── Tier maps ────────────────────────────────────────────────────────

/// 2D name to 3D name, one map per tier, for each kind of technology
/// object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TierMaps {
    pub layer: Vec<NameMap>,
    pub via: Vec<NameMap>,
    pub via_rule: Vec<NameMap>,
    pub site: Vec<NameMap>,
    #[serde(rename = "macro")]
    pub macro_: Vec<NameMap>,
}

/// Where a 3D name came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierName {
    pub tier: usize,
    pub name: String,
}

/// 3D name to (tier, 2D name).
pub type InverseMap = IndexMap<String, TierName>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InverseTierMaps {
    pub layer: InverseMap,
    pub via: InverseMap,
    pub via_rule: InverseMap,
    pub site: InverseMap,
    #[serde(rename = "macro")]
    pub macro_: InverseMap,
}

fn invert(maps: &[NameMap]) -> InverseMap {
    let mut out = InverseMap::new();
    for (tier, map) in maps.iter().enumerate() {
        for (name_2d, name_3d) in map {
            out.insert(
                name_3d.clone(),
                TierName {
                    tier,
                    name: name_2d.clone(),
                },
            );
        }
    }
    out
}

/// 3D name to 2D name, dropping the tier.
pub fn flatten(map: &InverseMap) -> NameMap {
    map.iter()
        .map(|(name_3d, entry)| (name_3d.clone(), entry.name.clone()))
        .collect()
}

impl TierMaps {
    fn with_tiers(tiers: usize) -> Self {
        Self {
            layer: vec![NameMap::new(); tiers],
            via: vec![NameMap::new(); tiers],
            via_rule: vec![NameMap::new(); tiers],
            site: vec![NameMap::new(); tiers],
            macro_: vec![NameMap::new(); tiers],
        }
    }

    pub fn tiers(&self) -> usize {
        self.layer.len()
    }

    /// Names shared by several tiers (header and footer layers, unsplit
    /// sites) resolve to the last tier that lists them.
    pub fn invert(&self) -> InverseTierMaps {
        InverseTierMaps {
            layer: invert(&self.layer),
            via: invert(&self.via),
            via_rule: invert(&self.via_rule),
            site: invert(&self.site),
            macro_: invert(&self.macro_),
        }
    }
}

// ── Synthesis ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Tech3d {
    pub tech: Technology,
    /// ILV cut layers, bottom boundary first.
    pub ilv_layers: Vec<String>,
    pub maps: TierMaps,
}

pub fn tier_name(name: &str, tier: usize) -> String {
    format!("{name}_T{tier}")
}

fn square(layer: &str, size: f64) -> Shape {
    let h = size / 2.0;
    Shape::rect(Some(layer), Rect::new(-h, -h, h, h))
}

/// Build the 3D technology for `options`.
pub fn make_3d(tech: &Technology, options: &StackOptions) -> Result<Tech3d> {
    options.validate(tech)?;
    let tiers = options.tiers();
    log::info!(
        "building {} 3D technology: {} tiers with {:?} routing layers, ILV size {:?}",
        options.style,
        tiers,
        options.num_layers,
        options.ilv_size
    );

    let mut tech3d = tech.copy_only_header();
    let mut maps = TierMaps::with_tiers(tiers);
    let mut ilv_layers = Vec::new();
    // routing layers of each tier in 3D stack order
    let mut tier_routing: Vec<Vec<String>> = vec![Vec::new(); tiers];

    let routing = tech.layers.routing();
    let order = tech.layers.order();
    let (Some(first), Some(last)) = (routing.first(), routing.last()) else {
        return Err(StackError::config("technology has no routing layers"));
    };
    let bot_idx = tech.layers.index_of(first).unwrap_or(0);
    let top_idx = tech.layers.index_of(last).unwrap_or(order.len() - 1);

    log::info!("building 3D layers");
    let shared = |tech3d: &mut Technology, maps: &mut TierMaps, names: &[String]| {
        for name in names {
            if let Some(layer) = tech.layer(name) {
                tech3d.layers.push(layer.clone());
                for map in maps.layer.iter_mut() {
                    map.insert(name.clone(), name.clone());
                }
            }
        }
    };
    shared(&mut tech3d, &mut maps, &order[..bot_idx]);

    for tier in 0..tiers {
        let tier_top = routing[options.num_layers[tier] - 1].as_str();
        let tier_top_idx = tech.layers.index_of(tier_top).unwrap_or(top_idx);
        let mut names: Vec<&String> = order[bot_idx..=tier_top_idx].iter().collect();
        if options.style == StackingStyle::FaceToFace && tier % 2 == 1 {
            names.reverse();
        }
        for name in names {
            let Some(layer) = tech.layer(name) else { continue };
            let mut copy = layer.clone();
            copy.name = tier_name(name, tier);
            if copy.class == LayerClass::Routing {
                tier_routing[tier].push(copy.name.clone());
            }
            maps.layer[tier].insert(name.clone(), copy.name.clone());
            tech3d.layers.push(copy);
        }
        if tier + 1 < tiers {
            let ilv = format!("ILV_T{}{}", tier, tier + 1);
            let mut layer = Layer::new(&ilv, LayerClass::Cut);
            layer.width = Some(options.ilv_size[tier]);
            layer.spacing = Some(options.ilv_spacing[tier]);
            tech3d.layers.push(layer);
            ilv_layers.push(ilv);
        }
    }
    shared(&mut tech3d, &mut maps, &order[top_idx + 1..]);

    log::info!("building 3D vias");
    for (name, via) in &tech.vias {
        let Some(top) = via.top_layer.as_deref().and_then(|l| tech.routing_index(l)) else {
            log::warn!("via {} has no routing top layer, not copied to 3D", name);
            continue;
        };
        for tier in 0..tiers {
            if top >= options.num_layers[tier] {
                continue;
            }
            let mut copy = via.clone();
            copy.name = tier_name(name, tier);
            copy.change_layer(&maps.layer[tier], &tech3d);
            maps.via[tier].insert(name.clone(), copy.name.clone());
            tech3d.add_via(copy);
        }
    }

    // the metal on both sides of each ILV and the width they share
    let mut boundaries = Vec::new();
    for (t, ilv) in ilv_layers.iter().enumerate() {
        let (Some(bot), Some(top)) = (tier_routing[t].last(), tier_routing[t + 1].first()) else {
            return Err(StackError::config(format!("no routing layers around {ilv}")));
        };
        let width = |l: &str| tech3d.layer(l).and_then(|l| l.effective_width());
        let enclosure = match (width(bot), width(top)) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => options.ilv_size[t],
        };
        boundaries.push((ilv.clone(), bot.clone(), top.clone(), enclosure));
    }
    for (t, (ilv, bot, top, enclosure)) in boundaries.iter().enumerate() {
        let mut via = Via::new(&format!("VIA_{ilv}"), bot, ilv, top);
        via.is_default = true;
        via.cut_shapes.push(square(ilv, options.ilv_size[t]));
        via.bottom_shapes.push(square(bot, *enclosure));
        via.top_shapes.push(square(top, *enclosure));
        tech3d.add_via(via);
    }

    log::info!("building 3D via rules");
    for (name, rule) in &tech.via_rules {
        let top = rule
            .top
            .as_ref()
            .and_then(|r| r.layer.as_deref())
            .and_then(|l| tech.routing_index(l));
        let Some(top) = top else {
            log::warn!("via rule {} has no routing top layer, not copied to 3D", name);
            continue;
        };
        for tier in 0..tiers {
            if top >= options.num_layers[tier] {
                continue;
            }
            let mut copy = rule.clone();
            copy.name = tier_name(name, tier);
            copy.change_layer(&maps.layer[tier], &maps.via[tier], &tech3d);
            maps.via_rule[tier].insert(name.clone(), copy.name.clone());
            tech3d.add_via_rule(copy);
        }
    }
    for (t, (ilv, bot, top, enclosure)) in boundaries.iter().enumerate() {
        let mut cut = ViaRuleLayer::on(ilv);
        cut.shapes.push(square(ilv, options.ilv_size[t]));
        cut.spacing = vec![options.ilv_spacing[t]; 2];
        let mut bottom = ViaRuleLayer::on(bot);
        bottom.enclosure = vec![*enclosure; 2];
        let mut upper = ViaRuleLayer::on(top);
        upper.enclosure = vec![*enclosure; 2];
        tech3d.add_via_rule(ViaRule {
            name: format!("VIARULE_{ilv}"),
            is_generate: true,
            is_default: false,
            cut: Some(cut),
            bottom: Some(bottom),
            top: Some(upper),
            vias: Vec::new(),
        });
    }

    log::info!("building 3D sites");
    for (name, site) in &tech.sites {
        if options.row_splitting {
            for tier in 0..tiers {
                let mut copy = site.clone();
                copy.name = tier_name(name, tier);
                copy.height /= 2.0;
                maps.site[tier].insert(name.clone(), copy.name.clone());
                tech3d.add_site(copy);
            }
        } else {
            for map in maps.site.iter_mut() {
                map.insert(name.clone(), name.clone());
            }
            tech3d.add_site(site.clone());
        }
    }

    log::info!("building 3D macros");
    for (name, m) in &tech.macros {
        for tier in 0..tiers {
            let mut copy = m.clone();
            copy.name = tier_name(name, tier);
            copy.foreign = Some(tier_name(m.foreign.as_deref().unwrap_or(name), tier));
            copy.change_layer(&maps.layer[tier], &tech3d);
            if options.row_splitting {
                copy.height /= 2.0;
                if tier % 2 == 1 {
                    copy.origin.y = -copy.height;
                }
                copy.site = copy
                    .site
                    .as_deref()
                    .and_then(|s| maps.site[tier].get(s))
                    .cloned();
            }
            maps.macro_[tier].insert(name.clone(), copy.name.clone());
            tech3d.add_macro(copy);
        }
    }

    log::info!("building 3D max stack vias");
    for msv in &tech.max_stack_vias {
        for tier in 0..tiers {
            let mut copy = msv.clone();
            let top = copy.top_layer.as_deref().and_then(|l| tech.routing_index(l));
            if top.is_some_and(|i| i >= options.num_layers[tier]) {
                copy.top_layer = Some(routing[options.num_layers[tier] - 1].clone());
            }
            copy.change_layer(&maps.layer[tier], &tech3d);
            tech3d.max_stack_vias.push(copy);
        }
    }

    log::info!("end generating 3D technology");
    Ok(Tech3d {
        tech: tech3d,
        ilv_layers,
        maps,
    })
}
