use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::geometry::{Point, Shape, Transformable};
use crate::tech::{retarget_shapes, NameMap, Technology};

/// Port direction shared by macro pins and design pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinDirection {
    Input,
    Output,
    OutputTristate,
    Inout,
    Feedthru,
}

/// Signal use of a pin or net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalUse {
    Signal,
    Analog,
    Power,
    Ground,
    Clock,
    Tieoff,
    Scan,
    Reset,
}

impl SignalUse {
    pub fn is_supply(&self) -> bool {
        matches!(self, SignalUse::Power | SignalUse::Ground)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Symmetry {
    X,
    Y,
    R90,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteClass {
    Core,
    Pad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacroClass {
    Cover,
    Ring,
    Block,
    Pad,
    Core,
    Endcap,
}

/// A placement site (microns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub name: String,
    pub class: Option<SiteClass>,
    #[serde(default)]
    pub symmetry: Vec<Symmetry>,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroPin {
    pub name: String,
    #[serde(default)]
    pub direction: Option<PinDirection>,
    #[serde(default, rename = "use")]
    pub signal_use: Option<SignalUse>,
    /// Port shape keyword such as ABUTMENT or RING.
    #[serde(default)]
    pub port_shape: Option<String>,
    #[serde(default)]
    pub shapes: Vec<Shape>,
}

impl MacroPin {
    pub fn new(name: &str, direction: Option<PinDirection>) -> Self {
        Self {
            name: name.to_string(),
            direction,
            signal_use: None,
            port_shape: None,
            shapes: Vec::new(),
        }
    }
}

/// A library cell: footprint, pins and obstructions in microns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Macro {
    pub name: String,
    #[serde(default)]
    pub class: Option<MacroClass>,
    #[serde(default)]
    pub subclass: Option<String>,
    #[serde(default)]
    pub foreign: Option<String>,
    pub origin: Point,
    #[serde(default)]
    pub symmetry: Vec<Symmetry>,
    #[serde(default)]
    pub site: Option<String>,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub pins: IndexMap<String, MacroPin>,
    #[serde(default)]
    pub obstructions: Vec<Shape>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

impl Macro {
    pub fn new(name: &str, width: f64, height: f64) -> Self {
        Self {
            name: name.to_string(),
            class: Some(MacroClass::Core),
            subclass: None,
            foreign: Some(name.to_string()),
            origin: Point::new(0.0, 0.0),
            symmetry: Vec::new(),
            site: None,
            width,
            height,
            pins: IndexMap::new(),
            obstructions: Vec::new(),
            properties: IndexMap::new(),
        }
    }

    pub fn add_pin(&mut self, pin: MacroPin) {
        self.pins.insert(pin.name.clone(), pin);
    }

    /// Footprint extents measured from the macro origin, as used when
    /// orienting pin geometry.
    pub fn extents(&self) -> (f64, f64) {
        (self.width - self.origin.x, self.height - self.origin.y)
    }

    pub fn references_layer(&self, layer: &str) -> bool {
        self.pins
            .values()
            .flat_map(|p| p.shapes.iter())
            .chain(self.obstructions.iter())
            .any(|s| s.layer.as_deref() == Some(layer))
    }

    pub fn change_layer(&mut self, map: &NameMap, tech: &Technology) {
        let owner = format!("macro {}", self.name);
        for pin in self.pins.values_mut() {
            retarget_shapes(&mut pin.shapes, map, tech, &owner);
        }
        retarget_shapes(&mut self.obstructions, map, tech, &owner);
    }

    /// Scale the footprint onto the manufacturing grid. Pin and obstruction
    /// geometry is scaled too unless `preserve_pins` is set.
    pub fn scale(&mut self, factor: f64, preserve_pins: bool, grid: f64) {
        let snap = |v: f64| {
            if grid > 0.0 {
                (v * factor / grid).round_ties_even() * grid
            } else {
                v * factor
            }
        };
        self.width = snap(self.width);
        self.height = snap(self.height);
        if preserve_pins {
            return;
        }
        let grid = Some(grid).filter(|g| *g > 0.0);
        for shape in self
            .pins
            .values_mut()
            .flat_map(|p| p.shapes.iter_mut())
            .chain(self.obstructions.iter_mut())
        {
            shape.scale(factor, grid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn inv() -> Macro {
        let mut m = Macro::new("INV", 0.38, 1.4);
        let mut a = MacroPin::new("A", Some(PinDirection::Input));
        a.shapes
            .push(Shape::rect(Some("M1"), Rect::new(0.05, 0.2, 0.12, 0.6)));
        m.add_pin(a);
        m.obstructions
            .push(Shape::rect(Some("M1"), Rect::new(0.0, 0.0, 0.38, 0.05)));
        m
    }

    #[test]
    fn test_scale_snaps_to_grid() {
        let mut m = inv();
        m.scale(0.5, false, 0.005);
        assert!((m.width - 0.19).abs() < 1e-9);
        assert!((m.height - 0.7).abs() < 1e-9);
        let pin = m.pins["A"].shapes[0].as_rect().copied().unwrap();
        assert!((pin.ur.y - 0.3).abs() < 1e-9);
        assert!((pin.ll.x - 0.025).abs() < 1e-9);
    }

    #[test]
    fn test_scale_preserving_pins() {
        let mut m = inv();
        m.scale(2.0, true, 0.005);
        assert!((m.height - 2.8).abs() < 1e-9);
        assert_eq!(m.pins["A"].shapes, inv().pins["A"].shapes);
    }

    #[test]
    fn test_references_layer() {
        let m = inv();
        assert!(m.references_layer("M1"));
        assert!(!m.references_layer("M2"));
        assert_eq!(m.extents(), (0.38, 1.4));
    }
}
