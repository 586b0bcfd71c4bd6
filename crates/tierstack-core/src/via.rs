use serde::{Deserialize, Serialize};

use crate::geometry::Shape;
use crate::layer::RoutingDirection;
use crate::tech::{retarget, retarget_layer, retarget_shapes, NameMap, Technology};

/// A fixed via: one cut layer between two routing layers, with the shapes
/// drawn on each (microns, relative to the via origin).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Via {
    pub name: String,
    #[serde(default)]
    pub is_default: bool,
    pub cut_layer: Option<String>,
    pub bottom_layer: Option<String>,
    pub top_layer: Option<String>,
    #[serde(default)]
    pub cut_shapes: Vec<Shape>,
    #[serde(default)]
    pub bottom_shapes: Vec<Shape>,
    #[serde(default)]
    pub top_shapes: Vec<Shape>,
}

impl Via {
    pub fn new(name: &str, bottom: &str, cut: &str, top: &str) -> Self {
        Self {
            name: name.to_string(),
            is_default: false,
            cut_layer: Some(cut.to_string()),
            bottom_layer: Some(bottom.to_string()),
            top_layer: Some(top.to_string()),
            cut_shapes: Vec::new(),
            bottom_shapes: Vec::new(),
            top_shapes: Vec::new(),
        }
    }

    /// Bottom, cut and top shapes in that order.
    pub fn shapes(&self) -> impl Iterator<Item = &Shape> {
        self.bottom_shapes
            .iter()
            .chain(self.cut_shapes.iter())
            .chain(self.top_shapes.iter())
    }

    pub fn shapes_on<'a>(&'a self, layer: &'a str) -> impl Iterator<Item = &'a Shape> {
        self.shapes()
            .filter(move |s| s.layer.as_deref() == Some(layer))
    }

    pub fn references_layer(&self, layer: &str) -> bool {
        [&self.cut_layer, &self.bottom_layer, &self.top_layer]
            .iter()
            .any(|l| l.as_deref() == Some(layer))
            || self.shapes().any(|s| s.layer.as_deref() == Some(layer))
    }

    /// The routing layer on the other side of the cut from `layer`.
    pub fn opposite_layer(&self, layer: &str) -> Option<&str> {
        if self.bottom_layer.as_deref() == Some(layer) {
            self.top_layer.as_deref()
        } else if self.top_layer.as_deref() == Some(layer) {
            self.bottom_layer.as_deref()
        } else {
            None
        }
    }

    pub fn change_layer(&mut self, map: &NameMap, tech: &Technology) {
        let owner = format!("via {}", self.name);
        self.cut_layer = retarget_layer(self.cut_layer.as_deref(), map, tech, &owner);
        self.bottom_layer = retarget_layer(self.bottom_layer.as_deref(), map, tech, &owner);
        self.top_layer = retarget_layer(self.top_layer.as_deref(), map, tech, &owner);
        retarget_shapes(&mut self.cut_shapes, map, tech, &owner);
        retarget_shapes(&mut self.bottom_shapes, map, tech, &owner);
        retarget_shapes(&mut self.top_shapes, map, tech, &owner);
    }
}

/// One layer entry of a via rule.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ViaRuleLayer {
    pub layer: Option<String>,
    #[serde(default)]
    pub direction: Option<RoutingDirection>,
    /// Enclosure overhangs in x and y.
    #[serde(default)]
    pub enclosure: Vec<f64>,
    #[serde(default)]
    pub width: Vec<f64>,
    #[serde(default)]
    pub spacing: Vec<f64>,
    #[serde(default)]
    pub shapes: Vec<Shape>,
}

impl ViaRuleLayer {
    pub fn on(layer: &str) -> Self {
        Self {
            layer: Some(layer.to_string()),
            ..Default::default()
        }
    }

    fn change_layer(&mut self, map: &NameMap, tech: &Technology, owner: &str) {
        self.layer = retarget_layer(self.layer.as_deref(), map, tech, owner);
        retarget_shapes(&mut self.shapes, map, tech, owner);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViaRule {
    pub name: String,
    #[serde(default)]
    pub is_generate: bool,
    #[serde(default)]
    pub is_default: bool,
    pub cut: Option<ViaRuleLayer>,
    pub bottom: Option<ViaRuleLayer>,
    pub top: Option<ViaRuleLayer>,
    /// Names of the concrete vias the rule enumerates.
    #[serde(default)]
    pub vias: Vec<String>,
}

impl ViaRule {
    pub fn layers(&self) -> impl Iterator<Item = &ViaRuleLayer> {
        [&self.bottom, &self.cut, &self.top]
            .into_iter()
            .filter_map(Option::as_ref)
    }

    pub fn references_layer(&self, layer: &str) -> bool {
        self.layers().any(|l| {
            l.layer.as_deref() == Some(layer)
                || l.shapes.iter().any(|s| s.layer.as_deref() == Some(layer))
        })
    }

    /// Retarget the rule's layers through `layer_map` and its vias through
    /// `via_map`; vias that do not resolve in `tech` are dropped.
    pub fn change_layer(&mut self, layer_map: &NameMap, via_map: &NameMap, tech: &Technology) {
        let owner = format!("via rule {}", self.name);
        for rule_layer in [&mut self.cut, &mut self.bottom, &mut self.top]
            .into_iter()
            .flatten()
        {
            rule_layer.change_layer(layer_map, tech, &owner);
        }
        self.vias = self
            .vias
            .iter()
            .filter_map(|v| retarget(Some(v.as_str()), via_map, |n| tech.vias.contains_key(n), "via", &owner))
            .collect();
    }
}

/// Limit on the number of single-cut vias stacked between two routing layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxStackVia {
    pub value: i64,
    pub bottom_layer: Option<String>,
    pub top_layer: Option<String>,
}

impl MaxStackVia {
    pub fn change_layer(&mut self, map: &NameMap, tech: &Technology) {
        let owner = format!("max stack via {}", self.value);
        self.bottom_layer = retarget_layer(self.bottom_layer.as_deref(), map, tech, &owner);
        self.top_layer = retarget_layer(self.top_layer.as_deref(), map, tech, &owner);
    }
}
