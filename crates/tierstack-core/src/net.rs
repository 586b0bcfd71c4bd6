use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cell::SignalUse;
use crate::design::Design;
use crate::geometry::{Point, Rect, Shape};
use crate::instance::ComponentPin;
use crate::tech::{retarget, NameMap, Technology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireStatus {
    Cover,
    Fixed,
    Routed,
    Noshield,
    Shield,
}

/// A via placed at the end of a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViaInstance {
    pub via: String,
    pub loc: Point,
}

/// One point of a routed path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub at: Point,
    /// Wire extension past this point (database units).
    #[serde(default)]
    pub extension: f64,
    #[serde(default)]
    pub is_virtual: bool,
    /// Patch rectangle relative to the previous point, replacing a segment.
    #[serde(default)]
    pub rect: Option<Rect>,
}

impl PathPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            at: Point::int(x, y),
            extension: 0.0,
            is_virtual: false,
            rect: None,
        }
    }
}

/// Identity of a via instance inside one net: wire, path and via index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViaKey {
    pub wire: usize,
    pub path: usize,
    pub via: usize,
}

/// A shape materialized in the design frame, tagged with the via instance
/// it was drawn from.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedShape {
    pub shape: Shape,
    pub via: Option<ViaKey>,
}

impl TaggedShape {
    pub fn plain(shape: Shape) -> Self {
        Self { shape, via: None }
    }
}

/// Result of a successful connectivity test.
#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub vias: Vec<ViaKey>,
    /// Layer of the path-side shape that touched.
    pub layer: Option<String>,
}

/// The first intersecting pair of shapes decides the contact. Vias come
/// from whichever side drew the touching shape from a via.
pub fn contact(own: &[TaggedShape], other: &[TaggedShape]) -> Option<Contact> {
    for a in own {
        for b in other {
            if a.shape.is_intersected(&b.shape) {
                let vias = [a.via, b.via].into_iter().flatten().collect();
                return Some(Contact {
                    vias,
                    layer: a.shape.layer.clone(),
                });
            }
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub layer: Option<String>,
    /// Special-wire shape keyword (STRIPE, RING, ...).
    #[serde(default)]
    pub shape: Option<String>,
    #[serde(default)]
    pub points: Vec<PathPoint>,
    #[serde(default)]
    pub vias: Vec<ViaInstance>,
}

impl Path {
    pub fn new(layer: &str, points: Vec<PathPoint>) -> Self {
        Self {
            layer: Some(layer.to_string()),
            shape: None,
            points,
            vias: Vec::new(),
        }
    }

    pub fn with_via(mut self, via: &str) -> Self {
        let loc = self
            .points
            .last()
            .map(|p| p.at)
            .unwrap_or_else(|| Point::int(0.0, 0.0));
        self.vias.push(ViaInstance {
            via: via.to_string(),
            loc,
        });
        self
    }

    /// Metal shapes of each segment. Coordinates truncate toward zero.
    pub fn routing_shapes(&self, tech: &Technology, dbu: f64) -> Vec<Shape> {
        let layer = self.layer.as_deref();
        let half = layer
            .and_then(|l| tech.layer(l))
            .and_then(|l| l.effective_width())
            .unwrap_or(0.0)
            * dbu
            / 2.0;
        let mut shapes = Vec::new();
        let mut prev: Option<&PathPoint> = None;
        for pt in &self.points {
            if let Some(p) = prev {
                let (px, py) = (p.at.x, p.at.y);
                let (x, y) = (pt.at.x, pt.at.y);
                let shape = if let Some(r) = &pt.rect {
                    Shape::rect(
                        layer,
                        Rect::int(
                            (px + r.ll.x).trunc(),
                            (py + r.ll.y).trunc(),
                            (px + r.ur.x).trunc(),
                            (py + r.ur.y).trunc(),
                        ),
                    )
                } else if px == x {
                    Shape::rect(
                        layer,
                        Rect::int(
                            (px - half).trunc(),
                            (py - p.extension).trunc(),
                            (x + half).trunc(),
                            (y + pt.extension).trunc(),
                        ),
                    )
                } else if py == y {
                    Shape::rect(
                        layer,
                        Rect::int(
                            (px - p.extension).trunc(),
                            (py - half).trunc(),
                            (x + pt.extension).trunc(),
                            (y + half).trunc(),
                        ),
                    )
                } else {
                    // diagonal segments only occur on virtual paths
                    Shape::polygon(
                        layer,
                        vec![
                            Point::int((px - half).trunc(), (py - half).trunc()),
                            Point::int((x + half).trunc(), (py - half).trunc()),
                            Point::int((x + half).trunc(), (py + half).trunc()),
                            Point::int((px - half).trunc(), (py + half).trunc()),
                        ],
                    )
                };
                shapes.push(shape);
            }
            if pt.rect.is_none() {
                prev = Some(pt);
            }
        }
        shapes
    }

    /// Shapes of the path's vias placed at its last point, each tagged with
    /// its via instance. `wire` and `path` locate this path in its net.
    pub fn via_shapes(
        &self,
        wire: usize,
        path: usize,
        design: &Design,
        tech: &Technology,
    ) -> Vec<TaggedShape> {
        let Some(end) = self.points.last().map(|p| p.at) else {
            return Vec::new();
        };
        let dbu = design.dbu;
        let mut shapes = Vec::new();
        for (idx, inst) in self.vias.iter().enumerate() {
            let Some(via) = design.resolve_via(&inst.via, tech) else {
                log::debug!("via {} has no drawn geometry", inst.via);
                continue;
            };
            for s in via.shapes() {
                let Some(r) = s.bbox() else { continue };
                shapes.push(TaggedShape {
                    shape: Shape::rect(
                        s.layer.as_deref(),
                        Rect::int(
                            (end.x + r.min.x * dbu).trunc(),
                            (end.y + r.min.y * dbu).trunc(),
                            (end.x + r.max.x * dbu).trunc(),
                            (end.y + r.max.y * dbu).trunc(),
                        ),
                    ),
                    via: Some(ViaKey { wire, path, via: idx }),
                });
            }
        }
        shapes
    }

    /// Every shape of the path used for connectivity. Paths with more than
    /// two points are not supported and contribute vias only.
    pub fn tagged_shapes(
        &self,
        wire: usize,
        path: usize,
        design: &Design,
        tech: &Technology,
    ) -> Vec<TaggedShape> {
        let mut shapes = Vec::new();
        if self.points.len() > 2 {
            log::warn!(
                "there is a path with {} points, paths with more than 2 points are not supported",
                self.points.len()
            );
        } else {
            shapes.extend(
                self.routing_shapes(tech, design.dbu)
                    .into_iter()
                    .map(TaggedShape::plain),
            );
        }
        shapes.extend(self.via_shapes(wire, path, design, tech));
        shapes
    }

    /// Retarget the path layer and its vias. Vias that do not resolve are
    /// removed.
    pub fn change_layer(
        &mut self,
        layer_map: &NameMap,
        via_map: &NameMap,
        tech: &Technology,
        owner: &str,
    ) {
        self.layer = retarget(
            self.layer.as_deref(),
            layer_map,
            |n| tech.layers.contains(n),
            "layer",
            owner,
        );
        self.vias.retain_mut(|inst| {
            match retarget(Some(&inst.via), via_map, |n| tech.vias.contains_key(n), "via", owner) {
                Some(v) => {
                    inst.via = v;
                    true
                }
                None => false,
            }
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wire {
    #[serde(default)]
    pub status: Option<WireStatus>,
    /// Layer declared on the wire itself, if any; paths carry their own.
    #[serde(default)]
    pub layer: Option<String>,
    #[serde(default)]
    pub paths: Vec<Path>,
}

impl Wire {
    pub fn routed(paths: Vec<Path>) -> Self {
        Self {
            status: Some(WireStatus::Routed),
            layer: None,
            paths,
        }
    }
}

/// A regular or special net. Pins are referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default, rename = "use")]
    pub signal_use: Option<SignalUse>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub pins: Vec<String>,
    #[serde(default)]
    pub component_pins: Vec<ComponentPin>,
    #[serde(default)]
    pub wires: Vec<Wire>,
    #[serde(default)]
    pub voltage: Option<i64>,
    #[serde(default)]
    pub shape: Option<String>,
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

impl Net {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: None,
            signal_use: None,
            pattern: None,
            pins: Vec::new(),
            component_pins: Vec::new(),
            wires: Vec::new(),
            voltage: None,
            shape: None,
            properties: IndexMap::new(),
        }
    }

    /// Same net attributes without pins, component pins or wires.
    pub fn copy_only_header(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            source: self.source.clone(),
            signal_use: self.signal_use,
            pattern: self.pattern.clone(),
            voltage: self.voltage,
            shape: self.shape.clone(),
            properties: self.properties.clone(),
            ..Net::new(name)
        }
    }

    pub fn add_pin(&mut self, pin: &str) {
        if !self.pins.iter().any(|p| p == pin) {
            self.pins.push(pin.to_string());
        }
    }

    pub fn add_component_pin(&mut self, cp: ComponentPin) {
        if !self.component_pins.contains(&cp) {
            self.component_pins.push(cp);
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.wires.iter().flat_map(|w| w.paths.iter())
    }

    pub fn via_count(&self) -> usize {
        self.paths().map(|p| p.vias.len()).sum()
    }

    /// Cut layer of every via instance, with its key.
    pub fn via_cut_layers<'a>(
        &'a self,
        design: &'a Design,
        tech: &'a Technology,
    ) -> impl Iterator<Item = (ViaKey, Option<&'a str>)> + 'a {
        self.wires.iter().enumerate().flat_map(move |(w, wire)| {
            wire.paths.iter().enumerate().flat_map(move |(p, path)| {
                path.vias.iter().enumerate().map(move |(v, inst)| {
                    let cut = design.via_cut_layer(&inst.via, tech);
                    (ViaKey { wire: w, path: p, via: v }, cut)
                })
            })
        })
    }

    /// Which of `cut_layers` carry at least one via of this net, in the
    /// order given.
    pub fn existing_cut_layers(
        &self,
        cut_layers: &[String],
        design: &Design,
        tech: &Technology,
    ) -> Vec<String> {
        let present: Vec<Option<&str>> = self
            .via_cut_layers(design, tech)
            .map(|(_, cut)| cut)
            .collect();
        cut_layers
            .iter()
            .filter(|c| present.contains(&Some(c.as_str())))
            .cloned()
            .collect()
    }

    pub fn change_layer(&mut self, layer_map: &NameMap, via_map: &NameMap, tech: &Technology) {
        let owner = format!("net {}", self.name);
        for wire in &mut self.wires {
            for path in &mut wire.paths {
                path.change_layer(layer_map, via_map, tech, &owner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{demo_design, demo_tech};

    #[test]
    fn test_routing_shapes() {
        let tech = demo_tech();
        let horizontal = Path::new("M1", vec![PathPoint::new(0.0, 0.0), PathPoint::new(1000.0, 0.0)]);
        let shapes = horizontal.routing_shapes(&tech, 1000.0);
        assert_eq!(shapes.len(), 1);
        assert_eq!(shapes[0].as_rect(), Some(&Rect::int(0.0, -50.0, 1000.0, 50.0)));

        let mut start = PathPoint::new(0.0, -500.0);
        start.extension = 70.0;
        let mut up = PathPoint::new(0.0, 500.0);
        up.extension = 70.0;
        let vertical = Path::new("M2", vec![start, up]);
        let r = *vertical.routing_shapes(&tech, 1000.0)[0].as_rect().unwrap();
        assert_eq!(r, Rect::int(-70.0, -570.0, 70.0, 570.0));

        let mut patch = PathPoint::new(0.0, 0.0);
        patch.rect = Some(Rect::int(-10.0, -10.0, 10.0, 10.0));
        let p = Path::new("M1", vec![PathPoint::new(100.0, 100.0), patch]);
        assert_eq!(
            p.routing_shapes(&tech, 1000.0)[0].as_rect(),
            Some(&Rect::int(90.0, 90.0, 110.0, 110.0))
        );

        let single = Path::new("M1", vec![PathPoint::new(0.0, 0.0)]).with_via("VIA12");
        assert!(single.routing_shapes(&tech, 1000.0).is_empty());
    }

    #[test]
    fn test_via_shapes_at_last_point() {
        let tech = demo_tech();
        let design = demo_design();
        let p = Path::new("M1", vec![PathPoint::new(0.0, 0.0), PathPoint::new(1000.0, 0.0)])
            .with_via("VIA12");
        let shapes = p.via_shapes(0, 3, &design, &tech);
        assert_eq!(shapes.len(), 3);
        assert!(shapes.iter().all(|s| s.via == Some(ViaKey { wire: 0, path: 3, via: 0 })));
        assert_eq!(shapes[0].shape.layer.as_deref(), Some("M1"));
        assert_eq!(shapes[0].shape.as_rect(), Some(&Rect::int(930.0, -70.0, 1070.0, 70.0)));
    }

    #[test]
    fn test_contact_reports_via_and_layer() {
        let tech = demo_tech();
        let design = demo_design();
        let a = Path::new("M1", vec![PathPoint::new(0.0, 0.0), PathPoint::new(1000.0, 0.0)])
            .with_via("VIA12");
        let b = Path::new("M2", vec![PathPoint::new(1000.0, 0.0), PathPoint::new(1000.0, 2000.0)]);
        let sa = a.tagged_shapes(0, 0, &design, &tech);
        let sb = b.tagged_shapes(0, 1, &design, &tech);
        let c = contact(&sa, &sb).expect("paths touch through the via");
        assert_eq!(c.vias, vec![ViaKey { wire: 0, path: 0, via: 0 }]);
        assert_eq!(c.layer.as_deref(), Some("M2"));

        let far = Path::new("M2", vec![PathPoint::new(5000.0, 0.0), PathPoint::new(5000.0, 2000.0)]);
        assert!(contact(&sa, &far.tagged_shapes(0, 2, &design, &tech)).is_none());
    }

    #[test]
    fn test_copy_only_header() {
        let mut net = Net::new("n1");
        net.signal_use = Some(SignalUse::Clock);
        net.add_pin("p");
        net.add_pin("p");
        assert_eq!(net.pins.len(), 1);
        let h = net.copy_only_header("n1_SUBNET0");
        assert_eq!(h.signal_use, Some(SignalUse::Clock));
        assert!(h.pins.is_empty());
        assert_eq!(h.name, "n1_SUBNET0");
    }
}
