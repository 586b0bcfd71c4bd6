//! Small synthetic technology and designs shared by unit tests.

use crate::cell::{Macro, MacroPin, PinDirection, Site, SiteClass};
use crate::design::Design;
use crate::floorplan::{Axis, GCellGrid, Row, Track};
use crate::geometry::{Orientation, Point, Rect, Shape};
use crate::instance::{Component, ComponentPin, Pin};
use crate::layer::{Layer, LayerClass, RoutingDirection};
use crate::net::{Net, Path, PathPoint, Wire};
use crate::tech::Technology;
use crate::via::{MaxStackVia, Via, ViaRule, ViaRuleLayer};

fn via(name: &str, bottom: &str, cut: &str, top: &str) -> Via {
    let mut v = Via::new(name, bottom, cut, top);
    v.is_default = true;
    v.bottom_shapes
        .push(Shape::rect(Some(bottom), Rect::new(-0.07, -0.07, 0.07, 0.07)));
    v.cut_shapes
        .push(Shape::rect(Some(cut), Rect::new(-0.035, -0.035, 0.035, 0.035)));
    v.top_shapes
        .push(Shape::rect(Some(top), Rect::new(-0.07, -0.07, 0.07, 0.07)));
    v
}

/// OD | M1 V1 M2 V2 M3 | OVL, one site and two cells.
pub fn demo_tech() -> Technology {
    let mut tech = Technology::new();
    tech.version = Some("5.8".into());
    tech.bus_bit_chars = Some("[]".into());
    tech.divider_char = Some("/".into());
    tech.dbu = Some(1000.0);
    tech.manufacturing_grid = 0.005;

    tech.layers.push(Layer::new("OD", LayerClass::Masterslice));
    tech.layers.push(
        Layer::new("M1", LayerClass::Routing)
            .with_width(0.1)
            .with_spacing(0.1)
            .with_direction(RoutingDirection::Horizontal),
    );
    tech.layers
        .push(Layer::new("V1", LayerClass::Cut).with_width(0.07).with_spacing(0.07));
    tech.layers.push(
        Layer::new("M2", LayerClass::Routing)
            .with_width(0.14)
            .with_spacing(0.14)
            .with_direction(RoutingDirection::Vertical),
    );
    tech.layers
        .push(Layer::new("V2", LayerClass::Cut).with_width(0.07).with_spacing(0.07));
    tech.layers.push(
        Layer::new("M3", LayerClass::Routing)
            .with_width(0.14)
            .with_spacing(0.14)
            .with_direction(RoutingDirection::Horizontal),
    );
    tech.layers.push(Layer::new("OVL", LayerClass::Overlap));

    tech.add_via(via("VIA12", "M1", "V1", "M2"));
    tech.add_via(via("VIA23", "M2", "V2", "M3"));
    tech.add_via_rule(ViaRule {
        name: "VIA12_RULE".into(),
        is_generate: false,
        is_default: false,
        cut: Some(ViaRuleLayer::on("V1")),
        bottom: Some(ViaRuleLayer::on("M1")),
        top: Some(ViaRuleLayer::on("M2")),
        vias: vec!["VIA12".into()],
    });

    tech.add_site(Site {
        name: "core".into(),
        class: Some(SiteClass::Core),
        symmetry: Vec::new(),
        width: 0.2,
        height: 1.4,
    });

    for (name, width) in [("INV", 0.6), ("BUF", 0.8)] {
        let mut m = Macro::new(name, width, 1.4);
        m.site = Some("core".into());
        let mut a = MacroPin::new("A", Some(PinDirection::Input));
        a.shapes
            .push(Shape::rect(Some("M1"), Rect::new(0.1, 0.6, 0.2, 0.8)));
        let mut y = MacroPin::new("Y", Some(PinDirection::Output));
        y.shapes
            .push(Shape::rect(Some("M1"), Rect::new(width - 0.2, 0.6, width - 0.1, 0.8)));
        m.add_pin(a);
        m.add_pin(y);
        m.obstructions
            .push(Shape::rect(Some("M1"), Rect::new(0.0, 0.0, width, 0.1)));
        tech.add_macro(m);
    }

    tech.max_stack_vias.push(MaxStackVia {
        value: 4,
        bottom_layer: Some("M1".into()),
        top_layer: Some("M3".into()),
    });
    tech
}

fn port(name: &str, direction: PinDirection, net: &str, layer: &str, x: f64, y: f64) -> Pin {
    let mut pin = Pin::new(name, Some(direction));
    pin.net = Some(net.to_string());
    pin.net_name = Some(net.to_string());
    pin.shapes
        .push(Shape::rect(Some(layer), Rect::int(-70.0, 0.0, 70.0, 140.0)));
    pin.location = Point::int(x, y);
    pin
}

fn row(name: &str, y: f64) -> Row {
    Row {
        name: name.to_string(),
        site: Some("core".into()),
        origin: Point::int(0.0, y),
        orientation: if y == 0.0 { Orientation::N } else { Orientation::FS },
        num_x: 25,
        num_y: 1,
        step_x: 200.0,
        step_y: 0.0,
    }
}

/// in -> u1 (INV) -> u2 (BUF) -> out on a 5 x 2.8 um die with two rows.
pub fn demo_design() -> Design {
    let mut d = Design::new("top", 1000.0);
    d.die_area = Some(Shape::rect(None, Rect::int(0.0, 0.0, 5000.0, 2800.0)));
    d.rows.insert("ROW_0".into(), row("ROW_0", 0.0));
    d.rows.insert("ROW_1".into(), row("ROW_1", 1400.0));
    d.tracks.push(Track {
        axis: Axis::Y,
        start: 100,
        count: 14,
        step: 200,
        layers: vec!["M1".into()],
    });
    d.gcell_grids.push(GCellGrid {
        axis: Axis::X,
        start: 0,
        count: 5,
        step: 1000,
    });

    let mut u1 = Component::new("u1", "INV", 1000.0, 0.0, Orientation::N);
    u1.pin_nets.insert("A".into(), "n_in".into());
    u1.pin_nets.insert("Y".into(), "n_mid".into());
    let mut u2 = Component::new("u2", "BUF", 3000.0, 0.0, Orientation::N);
    u2.pin_nets.insert("A".into(), "n_mid".into());
    u2.pin_nets.insert("Y".into(), "n_out".into());
    d.components.insert("u1".into(), u1);
    d.components.insert("u2".into(), u2);

    let mut pin_in = port("in", PinDirection::Input, "n_in", "M2", 70.0, 0.0);
    pin_in.orientation = Orientation::N;
    d.pins.insert("in".into(), pin_in);
    d.pins
        .insert("out".into(), port("out", PinDirection::Output, "n_out", "M2", 4930.0, 0.0));

    let mut n_in = Net::new("n_in");
    n_in.add_pin("in");
    n_in.add_component_pin(ComponentPin::new("u1", "A"));
    let mut n_mid = Net::new("n_mid");
    n_mid.add_component_pin(ComponentPin::new("u1", "Y"));
    n_mid.add_component_pin(ComponentPin::new("u2", "A"));
    let mut n_out = Net::new("n_out");
    n_out.add_component_pin(ComponentPin::new("u2", "Y"));
    n_out.add_pin("out");
    for net in [n_in, n_mid, n_out] {
        d.nets.insert(net.name.clone(), net);
    }
    d
}

pub fn chain_tech() -> Technology {
    demo_tech()
}

/// Net N routed M1 - V1 - M2 - V1 - M1 from pin A (driver) to pin C.
pub fn chain_design() -> Design {
    let mut d = Design::new("chain", 1000.0);
    d.die_area = Some(Shape::rect(None, Rect::int(0.0, 0.0, 3000.0, 2000.0)));
    for (name, dir, x, y) in [
        ("A", PinDirection::Input, 0.0, 0.0),
        ("C", PinDirection::Output, 2000.0, 1000.0),
    ] {
        let mut pin = Pin::new(name, Some(dir));
        pin.net = Some("N".into());
        pin.net_name = Some("N".into());
        pin.shapes
            .push(Shape::rect(Some("M1"), Rect::int(-50.0, -50.0, 50.0, 50.0)));
        pin.location = Point::int(x, y);
        d.pins.insert(name.into(), pin);
    }
    let mut net = Net::new("N");
    net.add_pin("A");
    net.add_pin("C");
    net.wires.push(Wire::routed(vec![
        Path::new("M1", vec![PathPoint::new(0.0, 0.0), PathPoint::new(1000.0, 0.0)]).with_via("VIA12"),
        Path::new("M2", vec![PathPoint::new(1000.0, 0.0), PathPoint::new(1000.0, 1000.0)])
            .with_via("VIA12"),
        Path::new("M1", vec![PathPoint::new(1000.0, 1000.0), PathPoint::new(2000.0, 1000.0)]),
    ]));
    d.nets.insert("N".into(), net);
    d
}
