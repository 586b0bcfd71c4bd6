//! Placed-and-routed design container and the design-wide passes that do
//! not belong to a single net.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cell::{Macro, MacroClass, MacroPin, SignalUse};
use crate::error::{Result, StackError};
use crate::floorplan::{Blockage, DesignViaRule, GCellGrid, Row, Track};
use crate::geometry::{Point, Rect, Shape, Transformable};
use crate::instance::{Component, Pin};
use crate::net::Net;
use crate::tech::{PropertyDefinition, PropertyValue, Technology};
use crate::via::Via;

const CORE_BOX_PREFIX: &str = "FE_CORE_BOX_";
const CORE_BOX_FIELDS: [&str; 4] = ["LL_X", "LL_Y", "UR_X", "UR_Y"];

/// One design. Geometry is in integer database units; every reference to a
/// technology entity is a name resolved against the `Technology` passed to
/// each operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Design {
    pub name: String,
    /// Database units per micron.
    pub dbu: f64,
    #[serde(default)]
    pub properties: Vec<PropertyDefinition>,
    #[serde(default)]
    pub die_area: Option<Shape>,
    #[serde(default)]
    pub rows: IndexMap<String, Row>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub gcell_grids: Vec<GCellGrid>,
    /// Vias defined inside the design, with drawn geometry.
    #[serde(default)]
    pub vias: IndexMap<String, Via>,
    #[serde(default)]
    pub via_rules: IndexMap<String, DesignViaRule>,
    #[serde(default)]
    pub components: IndexMap<String, Component>,
    #[serde(default)]
    pub pins: IndexMap<String, Pin>,
    #[serde(default)]
    pub blockages: Vec<Blockage>,
    #[serde(default)]
    pub special_nets: IndexMap<String, Net>,
    #[serde(default)]
    pub nets: IndexMap<String, Net>,
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub technology: Option<String>,
}

/// Clock-related object names found by [`Design::clock_objects`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockObjects {
    pub pins: Vec<String>,
    /// Cells that both receive and drive a clock (buffers, gates).
    pub components: Vec<String>,
    pub nets: Vec<String>,
}

impl Design {
    pub fn new(name: &str, dbu: f64) -> Self {
        Self {
            name: name.to_string(),
            dbu,
            properties: Vec::new(),
            die_area: None,
            rows: IndexMap::new(),
            tracks: Vec::new(),
            gcell_grids: Vec::new(),
            vias: IndexMap::new(),
            via_rules: IndexMap::new(),
            components: IndexMap::new(),
            pins: IndexMap::new(),
            blockages: Vec::new(),
            special_nets: IndexMap::new(),
            nets: IndexMap::new(),
            history: Vec::new(),
            technology: None,
        }
    }

    /// Bounding rectangle of the die area.
    pub fn die_rect(&self) -> Option<Rect> {
        let b = self.die_area.as_ref()?.bbox()?;
        Some(Rect::int(b.min.x, b.min.y, b.max.x, b.max.y))
    }

    /// Header only: floorplan, design vias and history are kept; components,
    /// pins, blockages and nets are not.
    pub fn copy_only_header(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            dbu: self.dbu,
            properties: self.properties.clone(),
            die_area: self.die_area.clone(),
            rows: self.rows.clone(),
            tracks: self.tracks.clone(),
            gcell_grids: self.gcell_grids.clone(),
            vias: self.vias.clone(),
            via_rules: self.via_rules.clone(),
            history: self.history.clone(),
            technology: self.technology.clone(),
            ..Design::new(name, self.dbu)
        }
    }

    /// Look a via up in the technology, then among the design's own vias.
    pub fn resolve_via<'a>(&'a self, name: &str, tech: &'a Technology) -> Option<&'a Via> {
        tech.resolve_via(name).or_else(|| self.vias.get(name))
    }

    /// Cut layer of a via instance name, also covering generated design vias
    /// that carry parameters only.
    pub fn via_cut_layer<'a>(&'a self, name: &str, tech: &'a Technology) -> Option<&'a str> {
        match self.resolve_via(name, tech) {
            Some(via) => via.cut_layer.as_deref(),
            None => self.via_rules.get(name)?.cut_layer.as_deref(),
        }
    }

    /// Routing layers below and above a via instance name.
    pub fn via_routing_layers<'a>(
        &'a self,
        name: &str,
        tech: &'a Technology,
    ) -> Option<(&'a str, &'a str)> {
        match self.resolve_via(name, tech) {
            Some(via) => Some((via.bottom_layer.as_deref()?, via.top_layer.as_deref()?)),
            None => {
                let rule = self.via_rules.get(name)?;
                Some((rule.bottom_layer.as_deref()?, rule.top_layer.as_deref()?))
            }
        }
    }

    pub fn require_net(&self, name: &str) -> Result<&Net> {
        self.nets
            .get(name)
            .ok_or_else(|| StackError::missing("net", name))
    }

    /// Bind every pin without a resolved net to the net its own declaration
    /// names, looking at special nets first.
    pub fn connect_pin_net(&mut self) {
        for (pin_name, pin) in self.pins.iter_mut() {
            if pin.net.is_some() {
                continue;
            }
            let wanted = pin.net_name.as_deref().unwrap_or_default();
            let net = if let Some(net) = self.special_nets.get_mut(wanted) {
                net
            } else if let Some(net) = self.nets.get_mut(wanted) {
                net
            } else {
                log::warn!(
                    "design pin {} is not connected to any regular or special net, cannot find net '{}' in design {}",
                    pin_name,
                    wanted,
                    self.name
                );
                continue;
            };
            net.add_pin(pin_name);
            pin.net = Some(net.name.clone());
        }
    }

    /// Rebuild pin and component-pin bindings from net membership, then
    /// connect the remaining pins by their declared net name.
    pub fn relink_pins(&mut self) {
        for pin in self.pins.values_mut() {
            pin.net = None;
        }
        for comp in self.components.values_mut() {
            comp.pin_nets.clear();
        }
        for net in self.special_nets.values().chain(self.nets.values()) {
            for pin_name in &net.pins {
                match self.pins.get_mut(pin_name) {
                    Some(pin) if pin.net.is_none() => pin.net = Some(net.name.clone()),
                    Some(pin) => log::warn!(
                        "pin {} is listed by nets {} and {}, keeping the first",
                        pin_name,
                        pin.net.as_deref().unwrap_or_default(),
                        net.name
                    ),
                    None => log::debug!("net {} lists unknown pin {}", net.name, pin_name),
                }
            }
            for cp in &net.component_pins {
                if let Some(comp) = self.components.get_mut(&cp.component) {
                    comp.pin_nets.insert(cp.pin.clone(), net.name.clone());
                }
            }
        }
        self.connect_pin_net();
    }

    /// Deep copy whose references all resolve in `tech`; anything that does
    /// not is dropped and logged.
    pub fn rebind(&self, tech: &Technology) -> Design {
        let mut cp = self.clone();
        let owner = format!("design {}", cp.name);
        for row in cp.rows.values_mut() {
            if let Some(site) = row.site.as_deref().filter(|s| !tech.sites.contains_key(*s)) {
                log::error!("{owner}: row {} site '{}' is not defined, dropping reference", row.name, site);
                row.site = None;
            }
        }
        for comp in cp.components.values_mut() {
            if let Some(m) = comp.macro_name.as_deref().filter(|m| !tech.macros.contains_key(*m)) {
                log::error!("{owner}: component {} macro '{}' is not defined, dropping reference", comp.name, m);
                comp.macro_name = None;
            }
        }
        let drop_layer = |shape: &mut Shape| {
            if let Some(l) = shape.layer.as_deref().filter(|l| !tech.layers.contains(l)) {
                log::error!("{owner}: layer '{}' is not defined, dropping reference", l);
                shape.layer = None;
            }
        };
        cp.pins
            .values_mut()
            .flat_map(|p| p.shapes.iter_mut())
            .for_each(drop_layer);
        cp.blockages.retain(|blkg| match blkg.layer.as_deref() {
            Some(l) if !tech.layers.contains(l) => {
                log::error!("{owner}: blockage layer '{}' is not defined, dropping blockage", l);
                false
            }
            _ => true,
        });
        for blkg in &mut cp.blockages {
            blkg.shapes.iter_mut().for_each(drop_layer);
        }
        let design_vias = cp.vias.clone();
        let design_rules: Vec<String> = cp.via_rules.keys().cloned().collect();
        for net in cp.special_nets.values_mut().chain(cp.nets.values_mut()) {
            for path in net.wires.iter_mut().flat_map(|w| w.paths.iter_mut()) {
                if path.layer.as_deref().is_some_and(|l| !tech.layers.contains(l)) {
                    log::error!("{owner}: net {} path layer is not defined, dropping reference", net.name);
                    path.layer = None;
                }
                path.vias.retain(|inst| {
                    let known = tech.vias.contains_key(&inst.via)
                        || design_vias.contains_key(&inst.via)
                        || design_rules.contains(&inst.via);
                    if !known {
                        log::error!("{owner}: net {} via '{}' is not defined, dropping it", net.name, inst.via);
                    }
                    known
                });
            }
        }
        cp
    }

    /// Scale the floorplan by `factor`. Routing, tracks and GCell grids are
    /// discarded; placement is snapped to the manufacturing grid.
    pub fn scale(&mut self, factor: f64, tech: &Technology) {
        log::info!("scaling design {} by {}", self.name, factor);
        let grid = self.dbu * tech.manufacturing_grid;
        let int_grid = grid.trunc();
        if let Some(die) = &mut self.die_area {
            die.scale(factor, Some(grid));
        }

        log::info!("fitting row width");
        if let Some(boundary) = self.die_rect() {
            let dbu = self.dbu;
            self.rows.retain(|_, row| {
                match row.site.as_deref().and_then(|s| tech.sites.get(s)) {
                    Some(site) => row.fit_width(&boundary, site, dbu),
                    None => {
                        log::warn!("row {} has no site, removing it", row.name);
                        false
                    }
                }
            });
        }
        self.tracks.clear();
        self.gcell_grids.clear();

        log::info!("changing the location of instances");
        for comp in self.components.values_mut() {
            comp.location.scale(factor, Some(int_grid));
        }
        log::info!("changing the location of pins");
        for pin in self.pins.values_mut().filter(|p| p.status.is_some()) {
            pin.location.scale(factor, Some(int_grid));
        }
        log::info!("changing the location of blockages");
        for shape in self.blockages.iter_mut().flat_map(|b| b.shapes.iter_mut()) {
            shape.scale(factor, Some(int_grid));
        }
        for net in self.special_nets.values_mut().chain(self.nets.values_mut()) {
            net.wires.clear();
        }
        for prop in &mut self.properties {
            let is_core_box = prop.object == "DESIGN"
                && prop
                    .name
                    .strip_prefix(CORE_BOX_PREFIX)
                    .is_some_and(|rest| CORE_BOX_FIELDS.iter().any(|f| rest.starts_with(f)));
            if let (true, Some(PropertyValue::Real(v))) = (is_core_box, prop.value.as_mut()) {
                *v *= factor;
            }
        }
    }

    /// Clock nets, the pins on them, and the components that appear on at
    /// least two clock-net endpoints.
    pub fn clock_objects(&self) -> ClockObjects {
        let mut out = ClockObjects::default();
        let mut pin_hits: IndexMap<&str, usize> = IndexMap::new();
        let mut comp_hits: IndexMap<&str, usize> = IndexMap::new();
        for (name, net) in &self.nets {
            if net.signal_use != Some(SignalUse::Clock) {
                continue;
            }
            out.nets.push(name.clone());
            for pin in &net.pins {
                *pin_hits.entry(pin.as_str()).or_default() += 1;
            }
            for cp in &net.component_pins {
                *comp_hits.entry(cp.component.as_str()).or_default() += 1;
            }
        }
        out.pins = self
            .pins
            .keys()
            .filter(|p| pin_hits.contains_key(p.as_str()))
            .cloned()
            .collect();
        out.components = self
            .components
            .keys()
            .filter(|c| comp_hits.get(c.as_str()).is_some_and(|n| *n >= 2))
            .cloned()
            .collect();
        out
    }

    /// Black-box macro standing for this design in a hierarchical top. Pin
    /// shapes are converted to microns relative to the die corner.
    pub fn make_design_macro(&self) -> Macro {
        let die = self.die_rect().unwrap_or_else(|| Rect::int(0.0, 0.0, 0.0, 0.0));
        let mut m = Macro::new(
            &self.name,
            die.width() / self.dbu,
            die.height() / self.dbu,
        );
        m.class = Some(MacroClass::Core);
        m.origin = Point::new(0.0, 0.0);
        for (name, pin) in &self.pins {
            let mut mp = MacroPin::new(name, pin.direction);
            mp.signal_use = pin.signal_use;
            mp.shapes = pin
                .shapes_in_design()
                .into_iter()
                .map(|mut s| {
                    s.to_real();
                    s.translate(-die.ll.x, -die.ll.y);
                    s.scale(1.0 / self.dbu, None);
                    s
                })
                .collect();
            m.add_pin(mp);
        }
        m
    }
}

/// A set of designs sharing one technology, as read from or written to one
/// design file set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DesignSet {
    pub version: Option<String>,
    pub divider_char: Option<String>,
    pub bus_bit_chars: Option<String>,
    #[serde(default)]
    pub designs: IndexMap<String, Design>,
    /// Black-box macros generated for hierarchical tops.
    #[serde(default)]
    pub block_macros: IndexMap<String, Macro>,
}

impl DesignSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty set with the same file header.
    pub fn copy_only_header(&self) -> Self {
        Self {
            version: self.version.clone(),
            divider_char: self.divider_char.clone(),
            bus_bit_chars: self.bus_bit_chars.clone(),
            ..Self::default()
        }
    }

    pub fn insert(&mut self, design: Design) {
        self.designs.insert(design.name.clone(), design);
    }

    pub fn design(&self, name: &str) -> Result<&Design> {
        self.designs
            .get(name)
            .ok_or_else(|| StackError::missing("design", name))
    }

    /// The technology with the generated block macros added, as needed to
    /// resolve the components of a hierarchical top.
    pub fn tech_with_blocks(&self, tech: &Technology) -> Technology {
        let mut t = tech.clone();
        for m in self.block_macros.values() {
            t.add_macro(m.clone());
        }
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{demo_design, demo_tech};
    use crate::instance::{ComponentPin, PlacementStatus};
    use crate::net::{Path, PathPoint, Wire};
    use crate::tech::PropertyType;

    #[test]
    fn test_connect_pin_net_prefers_special_nets() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut d = demo_design();
        let mut vdd = Pin::new("VDD", None);
        vdd.net_name = Some("VDD".into());
        d.pins.insert("VDD".into(), vdd);
        d.special_nets.insert("VDD".into(), Net::new("VDD"));
        d.nets.insert("VDD".into(), Net::new("VDD"));
        let mut lost = Pin::new("lost", None);
        lost.net_name = Some("nowhere".into());
        d.pins.insert("lost".into(), lost);

        d.connect_pin_net();
        assert_eq!(d.pins["VDD"].net.as_deref(), Some("VDD"));
        assert_eq!(d.special_nets["VDD"].pins, vec!["VDD".to_string()]);
        assert!(d.nets["VDD"].pins.is_empty());
        assert!(d.pins["lost"].net.is_none());
    }

    #[test]
    fn test_relink_pins_from_membership() {
        let mut d = demo_design();
        for pin in d.pins.values_mut() {
            pin.net = None;
        }
        d.relink_pins();
        assert_eq!(d.pins["in"].net.as_deref(), Some("n_in"));
        assert_eq!(d.components["u1"].pin_nets["A"], "n_in");
    }

    #[test]
    fn test_copy_only_header() {
        let d = demo_design();
        let h = d.copy_only_header("part0");
        assert_eq!(h.name, "part0");
        assert_eq!(h.rows.len(), d.rows.len());
        assert!(h.components.is_empty() && h.nets.is_empty() && h.pins.is_empty());
    }

    #[test]
    fn test_scale() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tech = demo_tech();
        let mut d = demo_design();
        d.properties.push(PropertyDefinition {
            object: "DESIGN".into(),
            name: "FE_CORE_BOX_UR_X".into(),
            value_type: PropertyType::Real,
            range: None,
            value: Some(PropertyValue::Real(10.0)),
        });
        d.pins["in"].status = Some(PlacementStatus::Fixed);
        d.scale(0.5, &tech);
        assert_eq!(d.die_rect(), Some(Rect::int(0.0, 0.0, 2500.0, 1400.0)));
        assert_eq!(d.components["u1"].location, Point::int(500.0, 0.0));
        assert!(d.nets.values().all(|n| n.wires.is_empty()));
        assert!(d.tracks.is_empty());
        assert_eq!(d.properties[0].value, Some(PropertyValue::Real(5.0)));
        // the row no longer fits in y and is dropped
        assert!(d.rows.values().all(|r| r.origin.y + 1400.0 <= 1400.0));
    }

    #[test]
    fn test_clock_objects() {
        let mut d = demo_design();
        let mut clk = Net::new("clk");
        clk.signal_use = Some(SignalUse::Clock);
        clk.add_pin("in");
        clk.add_component_pin(ComponentPin::new("u1", "A"));
        clk.add_component_pin(ComponentPin::new("u2", "A"));
        let mut gclk = Net::new("gclk");
        gclk.signal_use = Some(SignalUse::Clock);
        gclk.add_component_pin(ComponentPin::new("u1", "Y"));
        d.nets.insert("clk".into(), clk);
        d.nets.insert("gclk".into(), gclk);

        let c = d.clock_objects();
        assert_eq!(c.nets, vec!["clk", "gclk"]);
        assert_eq!(c.pins, vec!["in"]);
        assert_eq!(c.components, vec!["u1"]);
    }

    #[test]
    fn test_make_design_macro() {
        let d = demo_design();
        let m = d.make_design_macro();
        assert_eq!(m.class, Some(MacroClass::Core));
        assert_eq!(m.foreign.as_deref(), Some("top"));
        assert!((m.width - 5.0).abs() < 1e-9 && (m.height - 2.8).abs() < 1e-9);
        let r = *m.pins["in"].shapes[0].as_rect().unwrap();
        assert!((r.ll.x - 0.0).abs() < 1e-9 && (r.ur.x - 0.14).abs() < 1e-9);
        assert_eq!(m.pins["in"].direction, d.pins["in"].direction);
    }

    #[test]
    fn test_rebind_drops_unknown_references() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tech = demo_tech();
        let mut d = demo_design();
        d.components.insert(
            "ghost".into(),
            Component::new("ghost", "NOPE", 0.0, 0.0, Default::default()),
        );
        d.nets["n_in"].wires.push(Wire::routed(vec![Path::new(
            "M9",
            vec![PathPoint::new(0.0, 0.0), PathPoint::new(10.0, 0.0)],
        )
        .with_via("VIA99")]));
        d.blockages.push(Blockage::routing("M9", Rect::int(0.0, 0.0, 100.0, 100.0), None));
        d.blockages.push(Blockage::routing("M1", Rect::int(0.0, 0.0, 100.0, 100.0), None));
        let r = d.rebind(&tech);
        assert!(r.components["ghost"].macro_name.is_none());
        assert_eq!(r.blockages.len(), 1);
        assert_eq!(r.blockages[0].layer.as_deref(), Some("M1"));
        let path = r.nets["n_in"].wires.last().unwrap().paths[0].clone();
        assert!(path.layer.is_none() && path.vias.is_empty());
        assert_eq!(r.components["u1"].macro_name.as_deref(), Some("INV"));
    }

    #[test]
    fn test_design_set_lookup() {
        let mut set = DesignSet::new();
        set.insert(demo_design());
        assert!(set.design("top").is_ok());
        assert!(matches!(set.design("x"), Err(StackError::Integrity { .. })));
    }
}
