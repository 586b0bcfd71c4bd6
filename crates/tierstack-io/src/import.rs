//! Raw tree to model conversion.
//!
//! Every statement is converted in one pass. Unknown keywords and
//! references that cannot be classified are logged and left out; nothing
//! here fails.

use tierstack_core::cell::{Macro, MacroPin, Site};
use tierstack_core::design::Design;
use tierstack_core::floorplan::{Blockage, DesignViaRule, GCellGrid, Row, Track};
use tierstack_core::geometry::{Point, Rect, Shape};
use tierstack_core::instance::{Component, ComponentPin, Pin};
use tierstack_core::layer::{Layer, LayerClass};
use tierstack_core::net::{Net, Path, PathPoint, ViaInstance, Wire};
use tierstack_core::tech::{PropertyDefinition, PropertyType, PropertyValue, Technology};
use tierstack_core::via::{MaxStackVia, Via, ViaRule, ViaRuleLayer};

use crate::keyword::{parse_all, parse_opt, Keyword};
use crate::raw::{
    RawDesignTree, RawDesignVia, RawNet, RawProperty, RawShape, RawTechTree, RawViaLayer,
    RawViaRuleLayer,
};

// ── Shared ───────────────────────────────────────────────────────────

/// Convert one raw shape. `point` builds coordinates: real for LEF,
/// integer for DEF.
fn shape(raw: &RawShape, point: fn(f64, f64) -> Point, owner: &str) -> Option<Shape> {
    let layer = raw.layer.as_deref();
    if let Some([llx, lly, urx, ury]) = raw.rect {
        let (ll, ur) = (point(llx, lly), point(urx, ury));
        return Some(Shape::rect(layer, Rect { ll, ur }));
    }
    if raw.polygon.len() >= 3 {
        let points = raw.polygon.iter().map(|[x, y]| point(*x, *y)).collect();
        return Some(Shape::polygon(layer, points));
    }
    log::error!("{owner}: shape without RECT or POLYGON, ignored");
    None
}

fn shapes(raws: &[RawShape], point: fn(f64, f64) -> Point, owner: &str) -> Vec<Shape> {
    raws.iter().filter_map(|r| shape(r, point, owner)).collect()
}

fn lef_shapes(raws: &[RawShape], owner: &str) -> Vec<Shape> {
    shapes(raws, Point::new, owner)
}

fn def_shapes(raws: &[RawShape], owner: &str) -> Vec<Shape> {
    shapes(raws, Point::int, owner)
}

fn def_point(xy: [i64; 2]) -> Point {
    Point::int(xy[0] as f64, xy[1] as f64)
}

fn property(raw: &RawProperty) -> Option<PropertyDefinition> {
    let owner = format!("property {}", raw.name);
    let value_type: PropertyType = parse_opt(Some(raw.value_type.as_str()), "property type", &owner)?;
    let value = raw.value.as_deref().and_then(|v| {
        let parsed = match value_type {
            PropertyType::Integer => v.trim().parse().ok().map(PropertyValue::Integer),
            PropertyType::Real => v.trim().parse().ok().map(PropertyValue::Real),
            PropertyType::String => Some(PropertyValue::String(v.to_string())),
        };
        if parsed.is_none() {
            log::error!("{owner}: value '{v}' is not {}", value_type.keyword());
        }
        parsed
    });
    Some(PropertyDefinition {
        object: raw.object.clone(),
        name: raw.name.clone(),
        value_type,
        range: raw.range,
        value,
    })
}

/// Sort the layer blocks of a via into bottom, cut and top using the layer
/// classes and stack order of `tech`.
fn classify<'r, T>(
    blocks: &'r [T],
    layer_of: impl Fn(&T) -> &str,
    tech: &Technology,
    owner: &str,
) -> [Option<&'r T>; 3] {
    let mut cut = None;
    let mut metals: Vec<(usize, &T)> = Vec::new();
    for block in blocks {
        let name = layer_of(block);
        match tech.layers.get(name) {
            Some(layer) if layer.class == LayerClass::Cut => cut = Some(block),
            Some(_) => metals.push((tech.layers.index_of(name).unwrap_or(usize::MAX), block)),
            None => log::error!("{owner}: layer '{name}' is not defined, ignored"),
        }
    }
    metals.sort_by_key(|(i, _)| *i);
    if cut.is_none() || metals.len() != 2 {
        log::warn!("{owner}: expected one cut and two routing layers, found {} blocks", blocks.len());
    }
    let bottom = metals.first().map(|(_, b)| *b);
    let top = if metals.len() > 1 { metals.last().map(|(_, b)| *b) } else { None };
    [bottom, cut, top]
}

fn via(name: &str, layers: &[RawViaLayer], tech: &Technology, point: fn(f64, f64) -> Point) -> Via {
    let owner = format!("via {name}");
    let [bottom, cut, top] = classify(layers, |l| l.layer.as_str(), tech, &owner);
    let layer = |b: Option<&RawViaLayer>| b.map(|b| b.layer.clone());
    let geometry = |b: Option<&RawViaLayer>| {
        b.map(|b| shapes(&with_layer(&b.shapes, &b.layer), point, &owner))
            .unwrap_or_default()
    };
    Via {
        name: name.to_string(),
        is_default: false,
        cut_layer: layer(cut),
        bottom_layer: layer(bottom),
        top_layer: layer(top),
        cut_shapes: geometry(cut),
        bottom_shapes: geometry(bottom),
        top_shapes: geometry(top),
    }
}

/// Shapes inside a layer block inherit the block's layer.
fn with_layer(raws: &[RawShape], layer: &str) -> Vec<RawShape> {
    raws.iter()
        .map(|r| RawShape {
            layer: Some(r.layer.clone().unwrap_or_else(|| layer.to_string())),
            ..r.clone()
        })
        .collect()
}

// ── Technology ───────────────────────────────────────────────────────

fn rule_layer(raw: &RawViaRuleLayer, owner: &str) -> ViaRuleLayer {
    ViaRuleLayer {
        layer: Some(raw.layer.clone()),
        direction: parse_opt(raw.direction.as_deref(), "direction", owner),
        enclosure: raw.enclosure.clone(),
        width: raw.width.clone(),
        spacing: raw.spacing.clone(),
        shapes: lef_shapes(&with_layer(&raw.shapes, &raw.layer), owner),
    }
}

pub fn import_technology(raw: &RawTechTree) -> Technology {
    log::info!(
        "importing technology: {} layers, {} vias, {} sites, {} macros",
        raw.layers.len(),
        raw.vias.len(),
        raw.sites.len(),
        raw.macros.len()
    );
    let mut tech = Technology::new();
    tech.version = raw.version.clone();
    tech.bus_bit_chars = raw.bus_bit_chars.clone();
    tech.divider_char = raw.divider_char.clone();
    tech.dbu = raw.units_database;
    tech.manufacturing_grid = raw.manufacturing_grid.unwrap_or_default();
    tech.clearance_measure = raw.clearance_measure.clone();
    tech.use_min_spacing = raw
        .use_min_spacing
        .as_deref()
        .map(|s| s.eq_ignore_ascii_case("ON"));
    tech.properties = raw.property_definitions.iter().filter_map(property).collect();

    for l in &raw.layers {
        let owner = format!("layer {}", l.name);
        let Some(class) = parse_opt(Some(l.layer_type.as_str()), "layer type", &owner) else {
            continue;
        };
        let mut layer = Layer::new(&l.name, class);
        layer.direction = parse_opt(l.direction.as_deref(), "direction", &owner);
        layer.width = l.width;
        layer.min_width = l.min_width;
        layer.spacing = l.spacing;
        layer.spacing_tables = l.spacing_tables.clone();
        layer.pitch = l.pitch.clone();
        layer.offset = l.offset.clone();
        layer.min_area = l.area;
        layer.thickness = l.thickness;
        layer.properties = l.properties.clone();
        tech.layers.push(layer);
    }

    for v in &raw.vias {
        let mut fixed = via(&v.name, &v.layers, &tech, Point::new);
        fixed.is_default = v.default;
        tech.add_via(fixed);
    }

    for r in &raw.via_rules {
        let owner = format!("via rule {}", r.name);
        let [bottom, cut, top] = classify(&r.layers, |l| l.layer.as_str(), &tech, &owner);
        tech.add_via_rule(ViaRule {
            name: r.name.clone(),
            is_generate: r.generate,
            is_default: r.default,
            cut: cut.map(|l| rule_layer(l, &owner)),
            bottom: bottom.map(|l| rule_layer(l, &owner)),
            top: top.map(|l| rule_layer(l, &owner)),
            vias: r.vias.clone(),
        });
    }

    for s in &raw.sites {
        let owner = format!("site {}", s.name);
        tech.add_site(Site {
            name: s.name.clone(),
            class: parse_opt(s.class.as_deref(), "site class", &owner),
            symmetry: parse_all(&s.symmetry, "symmetry", &owner),
            width: s.size[0],
            height: s.size[1],
        });
    }

    for m in &raw.macros {
        let owner = format!("macro {}", m.name);
        let mut cell = Macro::new(&m.name, m.size[0], m.size[1]);
        cell.class = parse_opt(m.class.as_deref(), "macro class", &owner);
        cell.subclass = m.subclass.clone();
        cell.foreign = m.foreign.clone();
        cell.origin = Point::new(m.origin[0], m.origin[1]);
        cell.symmetry = parse_all(&m.symmetry, "symmetry", &owner);
        cell.site = m.site.clone();
        cell.obstructions = lef_shapes(&m.obs, &owner);
        cell.properties = m.properties.clone();
        for p in &m.pins {
            let owner = format!("pin {}/{}", m.name, p.name);
            let mut pin = MacroPin::new(&p.name, parse_opt(p.direction.as_deref(), "direction", &owner));
            pin.signal_use = parse_opt(p.signal_use.as_deref(), "use", &owner);
            pin.port_shape = p.shape.clone();
            pin.shapes = lef_shapes(&p.ports, &owner);
            cell.add_pin(pin);
        }
        tech.add_macro(cell);
    }

    for stack in &raw.max_via_stack {
        let (bottom_layer, top_layer) = match &stack.range {
            Some([bottom, top]) => (Some(bottom.clone()), Some(top.clone())),
            None => (None, None),
        };
        tech.max_stack_vias.push(MaxStackVia {
            value: stack.value,
            bottom_layer,
            top_layer,
        });
    }
    tech
}

// ── Design ───────────────────────────────────────────────────────────

enum DesignVia {
    Fixed(Via),
    Generated(DesignViaRule),
}

fn design_via(raw: &RawDesignVia, tech: &Technology) -> DesignVia {
    let Some(p) = &raw.via_rule else {
        return DesignVia::Fixed(via(&raw.name, &raw.layers, tech, Point::int));
    };
    let [bottom, cut, top] = &p.layers;
    let [bx, by, tx, ty] = p.enclosure;
    DesignVia::Generated(DesignViaRule {
        name: raw.name.clone(),
        rule: Some(p.rule.clone()),
        cut_size: p.cut_size,
        cut_layer: Some(cut.clone()),
        bottom_layer: Some(bottom.clone()),
        top_layer: Some(top.clone()),
        cut_spacing: p.cut_spacing,
        bottom_enclosure: [bx, by],
        top_enclosure: [tx, ty],
        rowcol: p.rowcol,
    })
}

fn net(raw: &RawNet, design: &Design, special: bool) -> Net {
    let owner = format!("net {}", raw.name);
    let mut net = Net::new(&raw.name);
    net.source = raw.source.clone();
    net.signal_use = parse_opt(raw.signal_use.as_deref(), "use", &owner);
    net.pattern = raw.pattern.clone();
    net.voltage = raw.voltage;
    net.shape = raw.shape.clone();
    net.properties = raw.properties.clone();

    for [owner_name, pin] in &raw.connections {
        if owner_name == "PIN" {
            net.add_pin(pin);
            continue;
        }
        // `*` in a special net stands for every component
        if !design.components.contains_key(owner_name) && !(special && owner_name == "*") {
            log::warn!("{owner}: component {owner_name} is not defined");
        }
        net.add_component_pin(ComponentPin::new(owner_name, pin));
    }

    for w in &raw.wires {
        let paths = w
            .paths
            .iter()
            .map(|p| Path {
                layer: p.layer.clone(),
                shape: p.shape.clone(),
                points: p
                    .points
                    .iter()
                    .map(|pt| PathPoint {
                        at: Point::int(pt.x as f64, pt.y as f64),
                        extension: pt.ext.unwrap_or_default() as f64,
                        is_virtual: pt.is_virtual,
                        rect: pt.rect.map(|[a, b, c, d]| {
                            Rect::int(a as f64, b as f64, c as f64, d as f64)
                        }),
                    })
                    .collect(),
                vias: p
                    .vias
                    .iter()
                    .map(|v| ViaInstance {
                        via: v.via.clone(),
                        loc: def_point(v.at),
                    })
                    .collect(),
            })
            .collect();
        net.wires.push(Wire {
            status: parse_opt(w.status.as_deref(), "wire status", &owner),
            layer: w.layer.clone(),
            paths,
        });
    }
    net
}

/// Convert a design. `tech` classifies the layers of fixed design vias.
pub fn import_design(raw: &RawDesignTree, tech: &Technology) -> Design {
    log::info!(
        "importing design {}: {} components, {} pins, {} nets",
        raw.design,
        raw.components.len(),
        raw.pins.len(),
        raw.nets.len()
    );
    let mut d = Design::new(&raw.design, raw.units);
    d.technology = raw.technology.clone();
    d.history = raw.history.clone();
    d.properties = raw.property_definitions.iter().filter_map(property).collect();
    d.die_area = match raw.die_area.as_slice() {
        [] => None,
        [ll, ur] => Some(Shape::rect(None, Rect { ll: def_point(*ll), ur: def_point(*ur) })),
        points => Some(Shape::polygon(None, points.iter().map(|p| def_point(*p)).collect())),
    };

    for r in &raw.rows {
        let owner = format!("row {}", r.name);
        d.rows.insert(
            r.name.clone(),
            Row {
                name: r.name.clone(),
                site: Some(r.site.clone()),
                origin: def_point(r.origin),
                orientation: parse_opt(Some(r.orient.as_str()), "orientation", &owner).unwrap_or_default(),
                num_x: r.num_x,
                num_y: r.num_y,
                step_x: r.step[0],
                step_y: r.step[1],
            },
        );
    }
    for t in &raw.tracks {
        let Some(axis) = parse_opt(Some(t.axis.as_str()), "track axis", "tracks") else { continue };
        d.tracks.push(Track {
            axis,
            start: t.start,
            count: t.num,
            step: t.step,
            layers: t.layers.clone(),
        });
    }
    for g in &raw.gcell_grids {
        let Some(axis) = parse_opt(Some(g.axis.as_str()), "gcell axis", "gcell grid") else { continue };
        d.gcell_grids.push(GCellGrid {
            axis,
            start: g.start,
            count: g.num,
            step: g.step,
        });
    }
    for v in &raw.vias {
        match design_via(v, tech) {
            DesignVia::Fixed(via) => {
                d.vias.insert(via.name.clone(), via);
            }
            DesignVia::Generated(rule) => {
                d.via_rules.insert(rule.name.clone(), rule);
            }
        }
    }

    for c in &raw.components {
        let owner = format!("component {}", c.name);
        let location = c.location.map(def_point).unwrap_or_else(|| Point::int(0.0, 0.0));
        let orientation = parse_opt(c.orient.as_deref(), "orientation", &owner).unwrap_or_default();
        let mut comp = Component::new(&c.name, &c.macro_name, location.x, location.y, orientation);
        comp.eeq = c.eeq.clone();
        comp.source = c.source.clone();
        comp.status = parse_opt(c.status.as_deref(), "placement status", &owner);
        comp.weight = c.weight;
        comp.properties = c.properties.clone();
        d.components.insert(c.name.clone(), comp);
    }

    for p in &raw.pins {
        let owner = format!("pin {}", p.name);
        let mut pin = Pin::new(&p.name, parse_opt(p.direction.as_deref(), "direction", &owner));
        pin.net_name = p.net.clone();
        pin.special = p.special;
        pin.signal_use = parse_opt(p.signal_use.as_deref(), "use", &owner);
        pin.supply_sensitivity = p.supply_sensitivity.clone();
        pin.ground_sensitivity = p.ground_sensitivity.clone();
        pin.shapes = def_shapes(&p.shapes, &owner);
        pin.status = parse_opt(p.status.as_deref(), "placement status", &owner);
        if let Some(loc) = p.location {
            pin.location = def_point(loc);
        }
        pin.orientation = parse_opt(p.orient.as_deref(), "orientation", &owner).unwrap_or_default();
        pin.properties = p.properties.clone();
        d.pins.insert(p.name.clone(), pin);
    }

    for b in &raw.blockages {
        let Some(kind) = parse_opt(Some(b.kind.as_str()), "blockage kind", "blockage") else { continue };
        d.blockages.push(Blockage {
            kind,
            layer: b.layer.clone(),
            partial: b.partial,
            shapes: def_shapes(&with_layer_opt(&b.shapes, b.layer.as_deref()), "blockage"),
            component: b.component.clone(),
        });
    }

    for n in &raw.special_nets {
        let special = net(n, &d, true);
        d.special_nets.insert(special.name.clone(), special);
    }
    for n in &raw.nets {
        let regular = net(n, &d, false);
        d.nets.insert(regular.name.clone(), regular);
    }
    d.relink_pins();
    d
}

fn with_layer_opt(raws: &[RawShape], layer: Option<&str>) -> Vec<RawShape> {
    match layer {
        Some(layer) => with_layer(raws, layer),
        None => raws.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{export_design, export_technology};
    use crate::raw::{RawComponent, RawLayer, RawPath, RawPathPoint, RawPathVia, RawPin, RawVia, RawWire};
    use indexmap::IndexMap;
    use tierstack_core::cell::PinDirection;

    fn raw_layer(name: &str, layer_type: &str) -> RawLayer {
        RawLayer {
            name: name.into(),
            layer_type: layer_type.into(),
            direction: Some("HORIZONTAL".into()),
            width: Some(0.1),
            min_width: None,
            spacing: None,
            spacing_tables: Vec::new(),
            pitch: Vec::new(),
            offset: Vec::new(),
            area: None,
            thickness: None,
            properties: IndexMap::new(),
        }
    }

    fn block(layer: &str, half: f64) -> RawViaLayer {
        RawViaLayer {
            layer: layer.into(),
            shapes: vec![RawShape {
                layer: None,
                rect: Some([-half, -half, half, half]),
                polygon: Vec::new(),
            }],
        }
    }

    fn raw_tech() -> RawTechTree {
        RawTechTree {
            units_database: Some(1000.0),
            use_min_spacing: Some("OFF".into()),
            layers: vec![
                raw_layer("M1", "ROUTING"),
                raw_layer("V1", "CUT"),
                raw_layer("M2", "ROUTING"),
                raw_layer("BOGUS", "GLASS"),
            ],
            // blocks out of order on purpose
            vias: vec![RawVia {
                name: "VIA12".into(),
                default: true,
                layers: vec![block("M2", 0.07), block("V1", 0.035), block("M1", 0.07)],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_technology_layers_and_vias() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tech = import_technology(&raw_tech());
        assert_eq!(tech.layers.order(), ["M1", "V1", "M2"]);
        assert_eq!(tech.use_min_spacing, Some(false));
        let via = &tech.vias["VIA12"];
        assert!(via.is_default);
        assert_eq!(via.bottom_layer.as_deref(), Some("M1"));
        assert_eq!(via.cut_layer.as_deref(), Some("V1"));
        assert_eq!(via.top_layer.as_deref(), Some("M2"));
        assert_eq!(via.cut_shapes[0].layer.as_deref(), Some("V1"));
        assert!((via.cut_shapes[0].as_rect().unwrap().width() - 0.07).abs() < 1e-9);
    }

    fn raw_design() -> RawDesignTree {
        RawDesignTree {
            design: "top".into(),
            units: 1000.0,
            die_area: vec![[0, 0], [5000, 2800]],
            components: vec![RawComponent {
                name: "u1".into(),
                macro_name: "INV".into(),
                eeq: None,
                source: None,
                status: Some("PLACED".into()),
                location: Some([1000, 0]),
                orient: Some("FS".into()),
                weight: None,
                properties: IndexMap::new(),
            }],
            pins: vec![RawPin {
                name: "in".into(),
                net: Some("n_in".into()),
                special: false,
                direction: Some("INPUT".into()),
                signal_use: None,
                supply_sensitivity: None,
                ground_sensitivity: None,
                shapes: vec![RawShape {
                    layer: Some("M2".into()),
                    rect: Some([-70.0, 0.0, 70.0, 140.0]),
                    polygon: Vec::new(),
                }],
                status: Some("FIXED".into()),
                location: Some([70, 0]),
                orient: Some("N".into()),
                properties: IndexMap::new(),
            }],
            nets: vec![RawNet {
                name: "n_in".into(),
                connections: vec![["PIN".into(), "in".into()], ["u1".into(), "A".into()]],
                source: None,
                signal_use: None,
                pattern: None,
                wires: vec![RawWire {
                    status: Some("ROUTED".into()),
                    layer: None,
                    paths: vec![RawPath {
                        layer: Some("M1".into()),
                        shape: None,
                        points: vec![
                            RawPathPoint { x: 70, y: 0, ext: None, is_virtual: false, rect: None },
                            RawPathPoint { x: 1100, y: 0, ext: Some(35), is_virtual: false, rect: None },
                        ],
                        vias: vec![RawPathVia { via: "VIA12".into(), at: [1100, 0] }],
                    }, RawPath {
                        layer: Some("M2".into()),
                        shape: None,
                        points: vec![
                            RawPathPoint { x: 1100, y: 0, ext: None, is_virtual: false, rect: None },
                            RawPathPoint { x: 1100, y: 1400, ext: None, is_virtual: false, rect: None },
                        ],
                        vias: Vec::new(),
                    }],
                }],
                voltage: None,
                shape: None,
                properties: IndexMap::new(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_design_connections_and_routing() {
        let tech = import_technology(&raw_tech());
        let d = import_design(&raw_design(), &tech);

        assert_eq!(d.die_rect(), Some(Rect::int(0.0, 0.0, 5000.0, 2800.0)));
        assert_eq!(d.pins["in"].net.as_deref(), Some("n_in"));
        assert_eq!(d.pins["in"].direction, Some(PinDirection::Input));
        assert_eq!(d.components["u1"].pin_nets["A"], "n_in");
        assert_eq!(d.components["u1"].orientation, tierstack_core::Orientation::FS);
        let path = d.nets["n_in"].paths().next().unwrap();
        assert_eq!(path.points[1].extension, 35.0);
        assert_eq!(path.vias[0].loc, Point::int(1100.0, 0.0));
        assert_eq!(d.nets["n_in"].component_pins, [ComponentPin::new("u1", "A")]);
    }

    #[test]
    fn test_export_of_import_is_stable() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tech = import_technology(&raw_tech());
        let tech_once = export_technology(&tech, false);
        let tech_again = import_technology(&tech_once);
        assert_eq!(export_technology(&tech_again, false), tech_once);

        let design_once = export_design(&import_design(&raw_design(), &tech), false);
        let design_again = import_design(&design_once, &tech_again);
        assert_eq!(export_design(&design_again, false), design_once);
        assert_eq!(design_once.nets[0].wires[0].paths.len(), 2);
    }
}
