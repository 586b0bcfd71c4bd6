//! Model to raw tree conversion, the inverse of [`crate::import`].

use tierstack_core::cell::Macro;
use tierstack_core::design::Design;
use tierstack_core::geometry::{Geometry, Point, Shape};
use tierstack_core::net::Net;
use tierstack_core::tech::{PropertyDefinition, PropertyValue, Technology};
use tierstack_core::via::{Via, ViaRuleLayer};

use crate::keyword::{spell_all, Keyword};
use crate::raw::{
    RawBlockage, RawComponent, RawDesignTree, RawDesignVia, RawGrid, RawLayer, RawMacro,
    RawMacroPin, RawMaxViaStack, RawNet, RawPath, RawPathPoint, RawPathVia, RawPin, RawProperty,
    RawRow, RawShape, RawSite, RawTechTree, RawVia, RawViaLayer, RawViaRule, RawViaRuleLayer,
    RawViaRuleParams, RawWire,
};

fn shape(s: &Shape) -> RawShape {
    match &s.geometry {
        Geometry::Rect(r) => RawShape {
            layer: s.layer.clone(),
            rect: Some([r.ll.x, r.ll.y, r.ur.x, r.ur.y]),
            polygon: Vec::new(),
        },
        Geometry::Polygon(points) => RawShape {
            layer: s.layer.clone(),
            rect: None,
            polygon: points.iter().map(|p| [p.x, p.y]).collect(),
        },
    }
}

fn shapes(s: &[Shape]) -> Vec<RawShape> {
    s.iter().map(shape).collect()
}

/// Shapes of a layer block; the block names the layer.
fn block_shapes(s: &[Shape]) -> Vec<RawShape> {
    s.iter()
        .map(|s| RawShape {
            layer: None,
            ..shape(s)
        })
        .collect()
}

fn def_point(p: &Point) -> [i64; 2] {
    [p.x.round() as i64, p.y.round() as i64]
}

fn property(p: &PropertyDefinition) -> RawProperty {
    RawProperty {
        object: p.object.clone(),
        name: p.name.clone(),
        value_type: p.value_type.keyword().to_string(),
        range: p.range,
        value: p.value.as_ref().map(|v| match v {
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::Real(r) => r.to_string(),
            PropertyValue::String(s) => s.clone(),
        }),
    }
}

fn via_layers(via: &Via) -> Vec<RawViaLayer> {
    [
        (&via.bottom_layer, &via.bottom_shapes),
        (&via.cut_layer, &via.cut_shapes),
        (&via.top_layer, &via.top_shapes),
    ]
    .into_iter()
    .filter_map(|(layer, s)| {
        layer.as_ref().map(|layer| RawViaLayer {
            layer: layer.clone(),
            shapes: block_shapes(s),
        })
    })
    .collect()
}

fn rule_layer(l: &ViaRuleLayer) -> Option<RawViaRuleLayer> {
    Some(RawViaRuleLayer {
        layer: l.layer.clone()?,
        direction: l.direction.map(|d| d.keyword().to_string()),
        enclosure: l.enclosure.clone(),
        width: l.width.clone(),
        spacing: l.spacing.clone(),
        shapes: block_shapes(&l.shapes),
    })
}

fn raw_macro(m: &Macro) -> RawMacro {
    RawMacro {
        name: m.name.clone(),
        class: m.class.map(|c| c.keyword().to_string()),
        subclass: m.subclass.clone(),
        foreign: m.foreign.clone(),
        origin: [m.origin.x, m.origin.y],
        symmetry: spell_all(&m.symmetry),
        site: m.site.clone(),
        size: [m.width, m.height],
        pins: m
            .pins
            .values()
            .map(|p| RawMacroPin {
                name: p.name.clone(),
                direction: p.direction.map(|d| d.keyword().to_string()),
                signal_use: p.signal_use.map(|u| u.keyword().to_string()),
                shape: p.port_shape.clone(),
                ports: shapes(&p.shapes),
            })
            .collect(),
        obs: shapes(&m.obstructions),
        properties: m.properties.clone(),
    }
}

/// Convert a technology. With `only_macros` the tree holds the header and
/// the macros, as written for a block library.
pub fn export_technology(tech: &Technology, only_macros: bool) -> RawTechTree {
    let mut raw = RawTechTree {
        version: tech.version.clone(),
        bus_bit_chars: tech.bus_bit_chars.clone(),
        divider_char: tech.divider_char.clone(),
        units_database: tech.dbu,
        manufacturing_grid: (tech.manufacturing_grid > 0.0).then_some(tech.manufacturing_grid),
        clearance_measure: tech.clearance_measure.clone(),
        use_min_spacing: tech
            .use_min_spacing
            .map(|on| if on { "ON" } else { "OFF" }.to_string()),
        property_definitions: tech.properties.iter().map(property).collect(),
        macros: tech.macros.values().map(raw_macro).collect(),
        ..Default::default()
    };
    if only_macros {
        return raw;
    }

    raw.layers = tech
        .layers
        .iter()
        .map(|l| RawLayer {
            name: l.name.clone(),
            layer_type: l.class.keyword().to_string(),
            direction: l.direction.map(|d| d.keyword().to_string()),
            width: l.width,
            min_width: l.min_width,
            spacing: l.spacing,
            spacing_tables: l.spacing_tables.clone(),
            pitch: l.pitch.clone(),
            offset: l.offset.clone(),
            area: l.min_area,
            thickness: l.thickness,
            properties: l.properties.clone(),
        })
        .collect();
    raw.vias = tech
        .vias
        .values()
        .map(|v| RawVia {
            name: v.name.clone(),
            default: v.is_default,
            layers: via_layers(v),
        })
        .collect();
    raw.via_rules = tech
        .via_rules
        .values()
        .map(|r| RawViaRule {
            name: r.name.clone(),
            generate: r.is_generate,
            default: r.is_default,
            layers: r.layers().filter_map(rule_layer).collect(),
            vias: r.vias.clone(),
        })
        .collect();
    raw.sites = tech
        .sites
        .values()
        .map(|s| RawSite {
            name: s.name.clone(),
            class: s.class.map(|c| c.keyword().to_string()),
            symmetry: spell_all(&s.symmetry),
            size: [s.width, s.height],
        })
        .collect();
    raw.max_via_stack = tech
        .max_stack_vias
        .iter()
        .map(|m| RawMaxViaStack {
            value: m.value,
            range: m
                .bottom_layer
                .clone()
                .zip(m.top_layer.clone())
                .map(|(b, t)| [b, t]),
        })
        .collect();
    raw
}

fn net(n: &Net) -> RawNet {
    let connections = n
        .pins
        .iter()
        .map(|p| ["PIN".to_string(), p.clone()])
        .chain(
            n.component_pins
                .iter()
                .map(|cp| [cp.component.clone(), cp.pin.clone()]),
        )
        .collect();
    let wires = n
        .wires
        .iter()
        .map(|w| RawWire {
            status: w.status.map(|s| s.keyword().to_string()),
            layer: w.layer.clone(),
            paths: w
                .paths
                .iter()
                .map(|p| RawPath {
                    layer: p.layer.clone(),
                    shape: p.shape.clone(),
                    points: p
                        .points
                        .iter()
                        .map(|pt| {
                            let [x, y] = def_point(&pt.at);
                            RawPathPoint {
                                x,
                                y,
                                ext: (pt.extension != 0.0).then(|| pt.extension.round() as i64),
                                is_virtual: pt.is_virtual,
                                rect: pt.rect.map(|r| {
                                    let [a, b] = def_point(&r.ll);
                                    let [c, d] = def_point(&r.ur);
                                    [a, b, c, d]
                                }),
                            }
                        })
                        .collect(),
                    vias: p
                        .vias
                        .iter()
                        .map(|v| RawPathVia {
                            via: v.via.clone(),
                            at: def_point(&v.loc),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();
    RawNet {
        name: n.name.clone(),
        connections,
        source: n.source.clone(),
        signal_use: n.signal_use.map(|u| u.keyword().to_string()),
        pattern: n.pattern.clone(),
        wires,
        voltage: n.voltage,
        shape: n.shape.clone(),
        properties: n.properties.clone(),
    }
}

/// Convert a design. With `floorplan_only` components, pins and nets are
/// left out.
pub fn export_design(d: &Design, floorplan_only: bool) -> RawDesignTree {
    let die_area = match d.die_area.as_ref().map(|s| &s.geometry) {
        Some(Geometry::Rect(r)) => vec![def_point(&r.ll), def_point(&r.ur)],
        Some(Geometry::Polygon(points)) => points.iter().map(def_point).collect(),
        None => Vec::new(),
    };
    let mut raw = RawDesignTree {
        design: d.name.clone(),
        technology: d.technology.clone(),
        units: d.dbu,
        history: d.history.clone(),
        property_definitions: d.properties.iter().map(property).collect(),
        die_area,
        ..Default::default()
    };

    for row in d.rows.values() {
        let Some(site) = row.site.clone() else {
            log::error!("row {} has no site, not written", row.name);
            continue;
        };
        raw.rows.push(RawRow {
            name: row.name.clone(),
            site,
            origin: def_point(&row.origin),
            orient: row.orientation.keyword().to_string(),
            num_x: row.num_x,
            num_y: row.num_y,
            step: [row.step_x, row.step_y],
        });
    }
    raw.tracks = d
        .tracks
        .iter()
        .map(|t| RawGrid {
            axis: t.axis.keyword().to_string(),
            start: t.start,
            num: t.count,
            step: t.step,
            layers: t.layers.clone(),
        })
        .collect();
    raw.gcell_grids = d
        .gcell_grids
        .iter()
        .map(|g| RawGrid {
            axis: g.axis.keyword().to_string(),
            start: g.start,
            num: g.count,
            step: g.step,
            layers: Vec::new(),
        })
        .collect();
    raw.vias = d
        .vias
        .values()
        .map(|v| RawDesignVia {
            name: v.name.clone(),
            layers: via_layers(v),
            via_rule: None,
        })
        .collect();
    for r in d.via_rules.values() {
        let layers = [&r.bottom_layer, &r.cut_layer, &r.top_layer].map(|l| l.clone().unwrap_or_default());
        raw.vias.push(RawDesignVia {
            name: r.name.clone(),
            layers: Vec::new(),
            via_rule: Some(RawViaRuleParams {
                rule: r.rule.clone().unwrap_or_default(),
                cut_size: r.cut_size,
                layers,
                cut_spacing: r.cut_spacing,
                enclosure: [
                    r.bottom_enclosure[0],
                    r.bottom_enclosure[1],
                    r.top_enclosure[0],
                    r.top_enclosure[1],
                ],
                rowcol: r.rowcol,
            }),
        });
    }
    raw.blockages = d
        .blockages
        .iter()
        .map(|b| RawBlockage {
            kind: b.kind.keyword().to_string(),
            layer: b.layer.clone(),
            partial: b.partial,
            component: b.component.clone(),
            shapes: if b.layer.is_some() { block_shapes(&b.shapes) } else { shapes(&b.shapes) },
        })
        .collect();
    if floorplan_only {
        return raw;
    }

    raw.components = d
        .components
        .values()
        .map(|c| RawComponent {
            name: c.name.clone(),
            macro_name: c.macro_name.clone().unwrap_or_default(),
            eeq: c.eeq.clone(),
            source: c.source.clone(),
            status: c.status.map(|s| s.keyword().to_string()),
            location: Some(def_point(&c.location)),
            orient: Some(c.orientation.keyword().to_string()),
            weight: c.weight,
            properties: c.properties.clone(),
        })
        .collect();
    raw.pins = d
        .pins
        .values()
        .map(|p| RawPin {
            name: p.name.clone(),
            net: p.net.clone().or_else(|| p.net_name.clone()),
            special: p.special,
            direction: p.direction.map(|x| x.keyword().to_string()),
            signal_use: p.signal_use.map(|u| u.keyword().to_string()),
            supply_sensitivity: p.supply_sensitivity.clone(),
            ground_sensitivity: p.ground_sensitivity.clone(),
            shapes: shapes(&p.shapes),
            status: p.status.map(|s| s.keyword().to_string()),
            location: p.status.is_some().then(|| def_point(&p.location)),
            orient: p.status.is_some().then(|| p.orientation.keyword().to_string()),
            properties: p.properties.clone(),
        })
        .collect();
    raw.special_nets = d.special_nets.values().map(net).collect();
    raw.nets = d.nets.values().map(net).collect();
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierstack_core::cell::{MacroClass, PinDirection};
    use tierstack_core::floorplan::Blockage;
    use tierstack_core::geometry::{Orientation, Rect};
    use tierstack_core::instance::{Component, ComponentPin, Pin};
    use tierstack_core::layer::{Layer, LayerClass};

    #[test]
    fn test_net_connections_are_spelled_as_def() {
        let mut d = Design::new("top", 1000.0);
        d.components.insert(
            "u1".into(),
            Component::new("u1", "INV", 200.0, 0.0, Orientation::FS),
        );
        let mut pin = Pin::new("in", Some(PinDirection::Input));
        pin.net = Some("n".into());
        d.pins.insert("in".into(), pin);
        let mut n = Net::new("n");
        n.add_pin("in");
        n.add_component_pin(ComponentPin::new("u1", "A"));
        d.nets.insert("n".into(), n);
        d.blockages.push(Blockage::routing("M1", Rect::int(0.0, 0.0, 10.0, 10.0), None));

        let raw = export_design(&d, false);
        assert_eq!(
            raw.nets[0].connections,
            [["PIN".to_string(), "in".to_string()], ["u1".to_string(), "A".to_string()]]
        );
        assert_eq!(raw.components[0].orient.as_deref(), Some("FS"));
        assert_eq!(raw.components[0].status.as_deref(), Some("PLACED"));
        assert_eq!(raw.pins[0].direction.as_deref(), Some("INPUT"));
        // an unplaced pin has no location
        assert_eq!(raw.pins[0].location, None);
        assert_eq!(raw.blockages[0].kind, "LAYER");
        assert_eq!(raw.blockages[0].shapes[0].layer, None);

        let floorplan = export_design(&d, true);
        assert!(floorplan.components.is_empty() && floorplan.nets.is_empty());
        assert_eq!(floorplan.blockages.len(), 1);
    }

    #[test]
    fn test_only_macros_keeps_header() {
        let mut tech = Technology::new();
        tech.dbu = Some(2000.0);
        tech.layers.push(Layer::new("M1", LayerClass::Routing));
        let mut block = Macro::new("part0", 5.0, 2.8);
        block.class = Some(MacroClass::Block);
        tech.add_macro(block);

        let raw = export_technology(&tech, true);
        assert_eq!(raw.units_database, Some(2000.0));
        assert!(raw.layers.is_empty());
        assert_eq!(raw.macros[0].class.as_deref(), Some("BLOCK"));
        assert_eq!(export_technology(&tech, false).layers[0].layer_type, "ROUTING");
    }
}
