//! Cutting nets at a cut layer and distributing a 3D design into per-tier
//! designs.
//!
//! A net is cut by walking its signal-flow graph: every edge that was made
//! through a via on the cut layer is replaced by a pair of inter-layer via
//! ports, one driven by the upstream side and one driving the downstream
//! side. The weakly connected pieces that remain become subnets.

use std::collections::HashMap;

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::cell::PinDirection;
use crate::design::{Design, DesignSet};
use crate::error::{Result, StackError};
use crate::geometry::{Orientation, Point, Transformable};
use crate::graph::{via_name, GraphContext, NetGraph, NodeKind};
use crate::instance::{Pin, PlacementStatus};
use crate::net::{Net, ViaKey, Wire};
use crate::partition::make_top_design;
use crate::stack::{flatten, InverseMap, InverseTierMaps};
use crate::tech::Technology;
use crate::via::Via;

/// Graph renderings kept when a cut does not produce the expected number of
/// subnets.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitDiagnostic {
    pub net: String,
    pub cut_layer: String,
    pub expected: usize,
    pub found: usize,
    pub before_dot: String,
    pub after_dot: String,
}

/// Subnets and new ports produced by cutting one net.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetSplit {
    pub subnets: Vec<Net>,
    /// ILV ports, already bound to their subnet.
    pub pins: Vec<Pin>,
    pub diagnostics: Vec<SplitDiagnostic>,
}

fn ilv_pin(name: String, direction: PinDirection, parent: &str, via: &Via, layer: &str, at: Point, dbu: f64) -> Pin {
    let mut pin = Pin::new(&name, Some(direction));
    pin.parent_net_name = Some(parent.to_string());
    let enclosure = if via.bottom_layer.as_deref() == Some(layer) {
        &via.bottom_shapes
    } else {
        &via.top_shapes
    };
    pin.shapes = enclosure
        .iter()
        .map(|s| {
            let mut s = s.clone();
            s.scale(dbu, None);
            s.to_integer();
            s
        })
        .collect();
    pin.status = Some(PlacementStatus::Fixed);
    pin.location = at;
    pin.orientation = Orientation::N;
    pin
}

/// Cut `net` at every via it has on `cut_layer`.
///
/// Fails with a topology error when the net has no driver; the net is then
/// left as it is.
pub fn split_net(
    net: &Net,
    cut_layer: &str,
    design: &Design,
    tech: &Technology,
    ctx: GraphContext<'_>,
) -> Result<NetSplit> {
    let mut graph = NetGraph::build(net, design, tech, ctx);
    if graph.root.is_none() {
        return Err(StackError::topology(&net.name, "cannot identify the driver"));
    }
    let before = graph.clone();

    let mut pins: IndexMap<String, Pin> = IndexMap::new();
    let mut cut_vias: Vec<ViaKey> = Vec::new();
    let edge_ids: Vec<String> = graph.edges.keys().cloned().collect();
    for id in edge_ids {
        let Some(edge) = graph.edges.get(&id).cloned() else {
            continue;
        };
        let mut cut = false;
        for key in &edge.vias {
            let Some(name) = via_name(net, key) else { continue };
            if design.via_cut_layer(name, tech) != Some(cut_layer) {
                continue;
            }
            let Some(via) = design.resolve_via(name, tech) else {
                log::warn!("via {} of net {} has no geometry, cannot place ILV ports", name, net.name);
                continue;
            };
            let Some(connected) = edge.layer.as_deref() else { continue };
            let Some(opposite) = via.opposite_layer(connected) else {
                log::warn!("via {} does not land on {} in net {}", name, connected, net.name);
                continue;
            };
            let (from_layer, to_layer) = if graph.nodes[edge.from].holds_via(key) {
                (opposite, connected)
            } else {
                (connected, opposite)
            };
            let at = net.wires[key.wire].paths[key.path].vias[key.via].loc;
            let n = cut_vias.len();
            let parent = format!("ILV_{}_{}", net.name, n);
            let out = ilv_pin(
                format!("ILV_OUT_{}_{}", net.name, n),
                PinDirection::Output,
                &parent,
                via,
                from_layer,
                at,
                design.dbu,
            );
            let inp = ilv_pin(
                format!("ILV_IN_{}_{}", net.name, n),
                PinDirection::Input,
                &parent,
                via,
                to_layer,
                at,
                design.dbu,
            );
            let out_idx = graph.add_node(
                format!("PIN_{}", out.name),
                NodeKind::Pin(out.name.clone()),
                vec![from_layer.to_string()],
            );
            let in_idx = graph.add_node(
                format!("PIN_{}", inp.name),
                NodeKind::Pin(inp.name.clone()),
                vec![to_layer.to_string()],
            );
            graph.add_edge(edge.from, out_idx, Vec::new(), Some(from_layer.to_string()));
            graph.add_edge(in_idx, edge.to, Vec::new(), Some(to_layer.to_string()));
            pins.insert(out.name.clone(), out);
            pins.insert(inp.name.clone(), inp);
            cut_vias.push(*key);
            cut = true;
        }
        if cut {
            graph.remove_edge(&id);
        }
    }

    let groups = graph.components();
    let expected = cut_vias.len() + 1;
    let mut diagnostics = Vec::new();
    if groups.len() != expected {
        log::warn!(
            "net {} split at {} gave {} subnets, expected {}",
            net.name,
            cut_layer,
            groups.len(),
            expected
        );
        let highlight = [cut_layer.to_string()];
        diagnostics.push(SplitDiagnostic {
            net: net.name.clone(),
            cut_layer: cut_layer.to_string(),
            expected,
            found: groups.len(),
            before_dot: before.to_dot(net, design, tech, &highlight),
            after_dot: graph.to_dot(net, design, tech, &highlight),
        });
    }

    let mut trimmed = net.clone();
    cut_vias.sort_unstable_by(|a, b| b.cmp(a));
    cut_vias.dedup();
    for key in &cut_vias {
        trimmed.wires[key.wire].paths[key.path].vias.remove(key.via);
    }

    let mut subnets = Vec::with_capacity(groups.len());
    for (i, members) in groups.iter().enumerate() {
        let mut sub = net.copy_only_header(&format!("{}_SUBNET{}", net.name, i));
        let mut paths = Vec::new();
        for &m in members {
            match &graph.nodes[m].kind {
                NodeKind::Pin(p) => sub.add_pin(p),
                NodeKind::ComponentPin(cp) => sub.add_component_pin(cp.clone()),
                NodeKind::Path { wire, path } => paths.push(trimmed.wires[*wire].paths[*path].clone()),
            }
        }
        if !paths.is_empty() {
            sub.wires.push(Wire::routed(paths));
        }
        bind_pins(&sub, &mut pins);
        subnets.push(sub);
    }

    Ok(NetSplit {
        subnets,
        pins: pins.into_values().collect(),
        diagnostics,
    })
}

fn bind_pins(net: &Net, pins: &mut IndexMap<String, Pin>) {
    for name in &net.pins {
        if let Some(pin) = pins.get_mut(name) {
            pin.net = Some(net.name.clone());
            pin.net_name = Some(net.name.clone());
        }
    }
}

/// Cut `net` at each of `cut_layers` it carries vias on. Pieces produced by
/// one cut are cut again by the following layers; only the final pieces are
/// returned, renamed `<net>_SUBNET<i>`.
pub fn split_net_by_cut_layers(
    net: &Net,
    cut_layers: &[String],
    design: &Design,
    tech: &Technology,
    row_split_macros: Option<&InverseMap>,
) -> Result<NetSplit> {
    let cuts = net.existing_cut_layers(cut_layers, design, tech);
    if cuts.is_empty() {
        return Ok(NetSplit {
            subnets: vec![net.clone()],
            ..NetSplit::default()
        });
    }
    let mut pending = vec![net.clone()];
    let mut pins: IndexMap<String, Pin> = IndexMap::new();
    let mut diagnostics = Vec::new();
    for cut in &cuts {
        let mut next = Vec::new();
        for piece in pending {
            if piece.existing_cut_layers(std::slice::from_ref(cut), design, tech).is_empty() {
                next.push(piece);
                continue;
            }
            let ctx = GraphContext {
                row_split_macros,
                extra_pins: Some(&pins),
            };
            let split = split_net(&piece, cut, design, tech, ctx)?;
            pins.extend(split.pins.into_iter().map(|p| (p.name.clone(), p)));
            diagnostics.extend(split.diagnostics);
            next.extend(split.subnets);
        }
        pending = next;
    }

    for (i, sub) in pending.iter_mut().enumerate() {
        sub.name = format!("{}_SUBNET{}", net.name, i);
        bind_pins(sub, &mut pins);
    }
    Ok(NetSplit {
        subnets: pending,
        pins: pins.into_values().collect(),
        diagnostics,
    })
}

/// Cut every net of `design` that carries vias on `cut_layers`, in place.
/// Nets keep their position; each is replaced by its subnets.
pub fn split_design_nets(
    design: &mut Design,
    cut_layers: &[String],
    tech: &Technology,
    row_split_macros: Option<&InverseMap>,
) -> Vec<SplitDiagnostic> {
    log::info!("splitting {} nets by cut layers {:?}", design.nets.len(), cut_layers);
    let snapshot: &Design = design;
    let results: Vec<Option<Result<NetSplit>>> = snapshot
        .nets
        .values()
        .collect::<Vec<_>>()
        .par_iter()
        .map(|net| {
            if net.existing_cut_layers(cut_layers, snapshot, tech).is_empty() {
                None
            } else {
                Some(split_net_by_cut_layers(net, cut_layers, snapshot, tech, row_split_macros))
            }
        })
        .collect();

    let mut diagnostics = Vec::new();
    let old = std::mem::take(&mut design.nets);
    let total = old.len();
    let step = (total / 10).max(1);
    for (i, (net, result)) in old.into_values().zip(results).enumerate() {
        if (i + 1) % step == 0 {
            log::info!("{}% of nets processed", (i + 1) * 100 / total);
        }
        match result {
            None => {
                design.nets.insert(net.name.clone(), net);
            }
            Some(Ok(split)) => {
                for pin in split.pins {
                    design.pins.insert(pin.name.clone(), pin);
                }
                for sub in split.subnets {
                    design.nets.insert(sub.name.clone(), sub);
                }
                diagnostics.extend(split.diagnostics);
            }
            Some(Err(e)) => {
                log::error!("{e}, net {} is not split", net.name);
                design.nets.insert(net.name.clone(), net);
            }
        }
    }
    log::info!("end splitting nets");
    diagnostics
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitOptions {
    /// The 3D design uses half-height rows shared by two tiers.
    pub row_splitting: bool,
    /// Drop routing from the tier designs, keeping connectivity.
    pub exclude_wires: bool,
    /// Tier design names; missing entries default to `split<i>`.
    pub names: Vec<String>,
}

/// Tier designs plus a top design that instantiates them.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignSplit {
    pub set: DesignSet,
    pub diagnostics: Vec<SplitDiagnostic>,
}

/// Split design `name` of `set` into one 2D design per tier at
/// `cut_layers`, then build a top design named after the original.
pub fn split_design(
    set: &DesignSet,
    name: &str,
    cut_layers: &[String],
    tech3d: &Technology,
    tech2d: &Technology,
    inverse: &InverseTierMaps,
    options: &SplitOptions,
) -> Result<DesignSplit> {
    log::info!("start splitting design {} by cut layers {:?}", name, cut_layers);
    let mut cur = set.design(name)?.clone();
    let tiers = cut_layers.len() + 1;
    let names: Vec<String> = (0..tiers)
        .map(|t| {
            options
                .names
                .get(t)
                .cloned()
                .unwrap_or_else(|| format!("split{t}"))
        })
        .collect();
    log::info!("tier designs: {}", names.join(", "));

    let row_split_macros = options.row_splitting.then_some(&inverse.macro_);
    let diagnostics = split_design_nets(&mut cur, cut_layers, tech3d, row_split_macros);

    let layer_map = flatten(&inverse.layer);
    let via_map = flatten(&inverse.via);
    let tier_of_layer = |layer: Option<&str>| layer.and_then(|l| inverse.layer.get(l)).map(|e| e.tier);

    let mut parts: Vec<Design> = names
        .iter()
        .map(|n| {
            let mut d = cur.copy_only_header(n);
            d.tracks.clear();
            d.gcell_grids.clear();
            d.vias.clear();
            d.via_rules.clear();
            d
        })
        .collect();

    for part in parts.iter_mut() {
        if options.row_splitting {
            part.rows.clear();
            for site_2d in tech2d.sites.keys() {
                let mut rows: Vec<_> = cur
                    .rows
                    .values()
                    .filter(|r| {
                        r.site
                            .as_deref()
                            .and_then(|s| inverse.site.get(s))
                            .is_some_and(|e| &e.name == site_2d)
                    })
                    .collect();
                rows.sort_by(|a, b| a.origin.y.total_cmp(&b.origin.y));
                for row in rows.into_iter().step_by(tiers) {
                    let mut merged = row.clone();
                    merged.site = Some(site_2d.clone());
                    part.rows.insert(merged.name.clone(), merged);
                }
            }
        } else {
            for row in part.rows.values_mut() {
                if let Some(entry) = row.site.as_deref().and_then(|s| inverse.site.get(s)) {
                    row.site = Some(entry.name.clone());
                }
            }
        }
    }

    log::info!("assigning components to tier designs");
    for (comp_name, comp) in &cur.components {
        let Some(macro_3d) = comp.macro_name.as_deref() else {
            log::error!("component {} has no macro, ignored", comp_name);
            continue;
        };
        let Some(entry) = inverse.macro_.get(macro_3d) else {
            log::error!("macro {} of component {} is not a tier macro, ignored", macro_3d, comp_name);
            continue;
        };
        let mut comp = comp.clone();
        if options.row_splitting && comp.is_shifted_by_row_splitting(entry.tier) {
            if let Some(m) = tech3d.macros.get(macro_3d) {
                comp.location.y -= (m.height * cur.dbu).trunc();
            }
        }
        comp.macro_name = Some(entry.name.clone());
        if !tech2d.macros.contains_key(&entry.name) {
            log::error!("macro {} is not defined in the tier technology", entry.name);
        }
        parts[entry.tier].components.insert(comp_name.clone(), comp);
    }

    log::info!("assigning pins to tier designs");
    let mut pin_owner: HashMap<&str, &Net> = HashMap::new();
    for net in cur.nets.values() {
        for p in &net.pins {
            pin_owner.entry(p.as_str()).or_insert(net);
        }
    }
    for (pin_name, pin) in &cur.pins {
        if pin.is_supply() {
            continue;
        }
        let tier = if let Some(shape) = pin.shapes.first() {
            tier_of_layer(shape.layer.as_deref())
        } else {
            pin_owner.get(pin_name.as_str()).and_then(|net| {
                net.pins
                    .iter()
                    .filter(|p| *p != pin_name)
                    .filter_map(|p| cur.pins.get(p))
                    .find_map(|p| p.shapes.first())
                    .and_then(|s| tier_of_layer(s.layer.as_deref()))
                    .or_else(|| {
                        let cp = net.component_pins.first()?;
                        let m = cur.components.get(&cp.component)?.macro_name.as_deref()?;
                        inverse.macro_.get(m).map(|e| e.tier)
                    })
            })
        };
        let Some(tier) = tier.filter(|t| *t < tiers) else {
            log::error!("tier for pin {} cannot be determined, ignored", pin_name);
            continue;
        };
        let mut pin = pin.clone();
        pin.change_layer(&layer_map, tech2d);
        parts[tier].pins.insert(pin_name.clone(), pin);
    }

    log::info!("assigning blockages to tier designs");
    for blkg in &cur.blockages {
        match blkg.layer.as_deref() {
            Some(l) if cut_layers.iter().any(|c| c == l) => {
                log::debug!("blockage on cut layer {} dropped", l);
            }
            Some(l) => {
                let Some(tier) = tier_of_layer(Some(l)).filter(|t| *t < tiers) else {
                    log::error!("blockage layer {} is not a tier layer, ignored", l);
                    continue;
                };
                let mut b = blkg.clone();
                b.change_layer(&layer_map, tech2d);
                parts[tier].blockages.push(b);
            }
            // Layerless placement blockages hold for every tier.
            None => {
                for part in parts.iter_mut() {
                    part.blockages.push(blkg.clone());
                }
            }
        }
    }

    log::info!("assigning nets to tier designs");
    for (net_name, net) in &cur.nets {
        let mut net = net.clone();
        let first_layer = net.wires.first().and_then(|w| {
            w.paths.first()?;
            w.layer.clone().or_else(|| w.paths[0].layer.clone())
        });
        let tier = if let Some(layer) = first_layer {
            if options.exclude_wires {
                net.wires.clear();
            } else {
                net.change_layer(&layer_map, &via_map, tech2d);
            }
            tier_of_layer(Some(&layer))
        } else {
            let by_pin = net
                .pins
                .iter()
                .filter_map(|p| parts.iter().rposition(|d| d.pins.contains_key(p)))
                .last();
            by_pin.or_else(|| {
                let cp = net.component_pins.first()?;
                parts.iter().rposition(|d| d.components.contains_key(&cp.component))
            })
        };
        let Some(tier) = tier.filter(|t| *t < tiers) else {
            log::error!("tier for net {} cannot be determined, ignored", net_name);
            continue;
        };
        parts[tier].nets.insert(net_name.clone(), net);
    }

    let mut out = set.copy_only_header();
    for mut part in parts {
        part.relink_pins();
        out.insert(part);
    }
    let top = make_top_design(&mut out, Some(names.as_slice()), name)?;
    out.insert(top);
    log::info!("end splitting design");
    Ok(DesignSplit { set: out, diagnostics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{chain_design, chain_tech, demo_design, demo_tech};
    use crate::floorplan::{Blockage, BlockageKind};
    use crate::geometry::{Rect, Shape};
    use crate::stack::{make_3d, StackOptions, StackingStyle};

    #[test]
    fn test_chain_split_at_v1() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tech = chain_tech();
        let design = chain_design();
        let net = &design.nets["N"];
        let split = split_net(net, "V1", &design, &tech, GraphContext::default()).unwrap();

        assert_eq!(split.subnets.len(), 3);
        assert!(split.diagnostics.is_empty());
        let names: Vec<&str> = split.subnets.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, ["N_SUBNET0", "N_SUBNET1", "N_SUBNET2"]);
        let vias: usize = split.subnets.iter().map(Net::via_count).sum();
        assert_eq!(vias, net.via_count() - 2);

        assert_eq!(split.pins.len(), 4);
        let out0 = split.pins.iter().find(|p| p.name == "ILV_OUT_N_0").unwrap();
        assert_eq!(out0.direction, Some(PinDirection::Output));
        assert_eq!(out0.parent_net_name.as_deref(), Some("ILV_N_0"));
        assert_eq!(out0.location, Point::int(1000.0, 0.0));
        assert_eq!(out0.shapes[0].layer.as_deref(), Some("M1"));
        assert_eq!(
            out0.shapes[0].as_rect(),
            Some(&crate::geometry::Rect::int(-70.0, -70.0, 70.0, 70.0))
        );
        let in0 = split.pins.iter().find(|p| p.name == "ILV_IN_N_0").unwrap();
        assert_eq!(in0.shapes[0].layer.as_deref(), Some("M2"));
        assert_eq!(in0.net.as_deref(), Some("N_SUBNET2"));

        // driver side keeps pin A and the first path
        let first = &split.subnets[0];
        assert!(first.pins.contains(&"A".to_string()));
        assert!(first.pins.contains(&"ILV_OUT_N_0".to_string()));
        assert_eq!(first.wires[0].paths.len(), 1);
        // pieces are numbered by their first node: pin C comes before the
        // middle path
        assert!(split.subnets[1].pins.contains(&"C".to_string()));
        assert_eq!(split.subnets[2].wires[0].paths[0].layer.as_deref(), Some("M2"));
        assert!(split.subnets[2].wires[0].paths[0].vias.is_empty());
    }

    #[test]
    fn test_cut_layer_without_vias_keeps_one_subnet() {
        let tech = chain_tech();
        let design = chain_design();
        let split = split_net(&design.nets["N"], "V2", &design, &tech, GraphContext::default()).unwrap();
        assert_eq!(split.subnets.len(), 1);
        assert!(split.pins.is_empty());
        assert_eq!(split.subnets[0].via_count(), 2);
    }

    #[test]
    fn test_split_without_driver_fails() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tech = chain_tech();
        let mut design = chain_design();
        design.pins["A"].direction = Some(PinDirection::Output);
        let err = split_net(&design.nets["N"], "V1", &design, &tech, GraphContext::default());
        assert!(matches!(err, Err(StackError::Topology { .. })));

        // the design pass leaves the net whole
        let diags = split_design_nets(&mut design, &["V1".to_string()], &tech, None);
        assert!(diags.is_empty());
        assert!(design.nets.contains_key("N"));
    }

    #[test]
    fn test_split_design_nets_keeps_order() {
        let tech = chain_tech();
        let mut design = chain_design();
        design.nets.insert("before".into(), Net::new("before"));
        design.nets.move_index(1, 0);
        design.nets.insert("after".into(), Net::new("after"));
        split_design_nets(&mut design, &["V1".to_string()], &tech, None);
        let names: Vec<&str> = design.nets.keys().map(String::as_str).collect();
        assert_eq!(names, ["before", "N_SUBNET0", "N_SUBNET1", "N_SUBNET2", "after"]);
        assert_eq!(design.pins["ILV_IN_N_1"].net.as_deref(), Some("N_SUBNET1"));
    }

    #[test]
    fn test_split_design_into_tiers() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tech2d = demo_tech();
        let t3 = make_3d(
            &tech2d,
            &StackOptions {
                style: StackingStyle::FaceToBack,
                num_layers: vec![3, 3],
                ilv_size: vec![0.07],
                ilv_spacing: vec![0.07],
                row_splitting: false,
            },
        )
        .unwrap();
        let inverse = t3.maps.invert();

        // u1 on the bottom tier, u2 on the top tier, n_mid crosses the ILV
        let mut d = demo_design();
        d.components["u1"].macro_name = Some("INV_T0".into());
        d.components["u2"].macro_name = Some("BUF_T1".into());
        d.pins["in"].shapes[0].layer = Some("M2_T0".into());
        d.pins["out"].shapes[0].layer = Some("M2_T1".into());
        d.blockages.push(Blockage {
            kind: BlockageKind::Placement,
            layer: None,
            partial: None,
            shapes: vec![Shape::rect(None, Rect::int(0.0, 0.0, 1000.0, 1400.0))],
            component: None,
        });
        let mut set = DesignSet::new();
        set.insert(d);

        let out = split_design(
            &set,
            "top",
            &t3.ilv_layers,
            &t3.tech,
            &tech2d,
            &inverse,
            &SplitOptions::default(),
        )
        .unwrap();
        let bottom = out.set.design("split0").unwrap();
        let upper = out.set.design("split1").unwrap();
        assert_eq!(bottom.components["u1"].macro_name.as_deref(), Some("INV"));
        assert_eq!(upper.components["u2"].macro_name.as_deref(), Some("BUF"));
        assert_eq!(bottom.pins["in"].shapes[0].layer.as_deref(), Some("M2"));
        assert!(bottom.nets.contains_key("n_in"));
        assert!(upper.nets.contains_key("n_out"));
        assert!(bottom.tracks.is_empty());
        assert_eq!(bottom.blockages.len(), 1);
        assert_eq!(upper.blockages, bottom.blockages);

        let top = out.set.design("top").unwrap();
        assert_eq!(top.components.len(), 2);
        assert_eq!(top.components["U_split0"].macro_name.as_deref(), Some("split0"));
        assert!(out.set.block_macros.contains_key("split1"));
    }
}
