use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cell::{MacroPin, PinDirection, SignalUse};
use crate::design::Design;
use crate::geometry::{Orientation, Point, Rect, Shape, Transformable};
use crate::tech::{retarget_shapes, NameMap, Technology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlacementStatus {
    Unplaced,
    Placed,
    Fixed,
    Cover,
}

/// A placed macro instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    #[serde(rename = "macro")]
    pub macro_name: Option<String>,
    #[serde(default)]
    pub eeq: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub status: Option<PlacementStatus>,
    pub location: Point,
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default)]
    pub weight: Option<i64>,
    /// Macro pin name to the net it connects to.
    #[serde(default)]
    pub pin_nets: IndexMap<String, String>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

impl Component {
    pub fn new(name: &str, macro_name: &str, x: f64, y: f64, orientation: Orientation) -> Self {
        Self {
            name: name.to_string(),
            macro_name: Some(macro_name.to_string()),
            eeq: None,
            source: None,
            status: Some(PlacementStatus::Placed),
            location: Point::int(x, y),
            orientation,
            weight: None,
            pin_nets: IndexMap::new(),
            properties: IndexMap::new(),
        }
    }

    pub fn is_shifted_by_row_splitting(&self, tier: usize) -> bool {
        self.orientation.is_shifted_by_row_splitting(tier)
    }

    /// Unrotated footprint at the component location (layerless).
    pub fn shape(&self, tech: &Technology, dbu: f64) -> Option<Shape> {
        let m = tech.macros.get(self.macro_name.as_deref()?)?;
        let (x, y) = (self.location.x, self.location.y);
        Some(Shape::rect(
            None,
            Rect::int(
                x,
                y,
                x + (m.width * dbu).trunc(),
                y + (m.height * dbu).trunc(),
            ),
        ))
    }
}

/// A design-level port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub name: String,
    /// Resolved net (regular or special).
    #[serde(default)]
    pub net: Option<String>,
    /// Net name as declared on the pin itself.
    #[serde(default)]
    pub net_name: Option<String>,
    #[serde(default)]
    pub special: bool,
    #[serde(default)]
    pub direction: Option<PinDirection>,
    #[serde(default)]
    pub supply_sensitivity: Option<String>,
    #[serde(default)]
    pub ground_sensitivity: Option<String>,
    #[serde(default, rename = "use")]
    pub signal_use: Option<SignalUse>,
    /// Shapes relative to the pin location.
    #[serde(default)]
    pub shapes: Vec<Shape>,
    #[serde(default)]
    pub status: Option<PlacementStatus>,
    pub location: Point,
    #[serde(default)]
    pub orientation: Orientation,
    /// Net of the enclosing design that this boundary pin stands for.
    #[serde(default)]
    pub parent_net_name: Option<String>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

impl Pin {
    pub fn new(name: &str, direction: Option<PinDirection>) -> Self {
        Self {
            name: name.to_string(),
            net: None,
            net_name: None,
            special: false,
            direction,
            supply_sensitivity: None,
            ground_sensitivity: None,
            signal_use: None,
            shapes: Vec::new(),
            status: None,
            location: Point::int(0.0, 0.0),
            orientation: Orientation::N,
            parent_net_name: None,
            properties: IndexMap::new(),
        }
    }

    pub fn is_supply(&self) -> bool {
        self.signal_use.is_some_and(|u| u.is_supply())
    }

    pub fn change_layer(&mut self, map: &NameMap, tech: &Technology) {
        let owner = format!("pin {}", self.name);
        retarget_shapes(&mut self.shapes, map, tech, &owner);
    }

    /// Pin shapes oriented and moved to the pin location.
    pub fn shapes_in_design(&self) -> Vec<Shape> {
        let steps = self.orientation.design_pin_transforms();
        self.shapes
            .iter()
            .map(|shape| {
                let mut s = shape.clone();
                s.transform_all(&steps);
                s.translate(self.location.x, self.location.y);
                s
            })
            .collect()
    }
}

/// A (component, macro pin) endpoint of a net.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentPin {
    pub component: String,
    pub pin: String,
}

impl ComponentPin {
    pub fn new(component: &str, pin: &str) -> Self {
        Self {
            component: component.to_string(),
            pin: pin.to_string(),
        }
    }

    pub fn macro_pin<'t>(&self, design: &Design, tech: &'t Technology) -> Option<&'t MacroPin> {
        let comp = design.components.get(&self.component)?;
        tech.macros
            .get(comp.macro_name.as_deref()?)?
            .pins
            .get(&self.pin)
    }

    /// Macro pin geometry oriented inside the cell, converted to database
    /// units and moved to the component location.
    pub fn shapes_in_design(&self, design: &Design, tech: &Technology) -> Vec<Shape> {
        let Some(comp) = design.components.get(&self.component) else {
            return Vec::new();
        };
        let Some(m) = comp.macro_name.as_deref().and_then(|n| tech.macros.get(n)) else {
            return Vec::new();
        };
        let Some(pin) = m.pins.get(&self.pin) else {
            return Vec::new();
        };
        let (w, h) = m.extents();
        let steps = comp.orientation.macro_transforms(w, h);
        pin.shapes
            .iter()
            .map(|shape| {
                let mut s = shape.clone();
                s.transform_all(&steps);
                s.scale(design.dbu, None);
                s.to_integer();
                s.translate(comp.location.x, comp.location.y);
                s
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{demo_design, demo_tech};

    #[test]
    fn test_pin_shapes_in_design() {
        let mut pin = Pin::new("IN", Some(PinDirection::Input));
        pin.shapes
            .push(Shape::rect(Some("M2"), Rect::int(-70.0, 0.0, 70.0, 140.0)));
        pin.location = Point::int(1000.0, 0.0);
        pin.orientation = Orientation::S;
        let shapes = pin.shapes_in_design();
        assert_eq!(shapes[0].as_rect(), Some(&Rect::int(930.0, -140.0, 1070.0, 0.0)));
    }

    #[test]
    fn test_component_pin_shapes() {
        let tech = demo_tech();
        let design = demo_design();
        // u1 is an INV at (1000, 0), orientation N
        let a = ComponentPin::new("u1", "A").shapes_in_design(&design, &tech);
        assert_eq!(a[0].as_rect(), Some(&Rect::int(1100.0, 600.0, 1200.0, 800.0)));
        assert_eq!(a[0].layer.as_deref(), Some("M1"));

        let mut flipped = design.clone();
        flipped.components["u1"].orientation = Orientation::FS;
        let a = ComponentPin::new("u1", "A").shapes_in_design(&flipped, &tech);
        assert_eq!(a[0].as_rect(), Some(&Rect::int(1100.0, 600.0, 1200.0, 800.0)));
        assert!(ComponentPin::new("nope", "A").shapes_in_design(&design, &tech).is_empty());
    }

    #[test]
    fn test_component_shape() {
        let tech = demo_tech();
        let design = demo_design();
        let s = design.components["u1"].shape(&tech, design.dbu).unwrap();
        assert_eq!(s.as_rect(), Some(&Rect::int(1000.0, 0.0, 1600.0, 1400.0)));
    }
}
